//! The design space: an ordered map of parameters plus graph utilities.

use crate::parameter::{create_parameter, Parameter, ParameterConfig};
use dse_types::{DesignPoint, DseResult, SpaceError};
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesignSpace {
    params: IndexMap<String, Parameter>,
}

impl DesignSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, rejecting a second definition of the same id.
    pub fn insert(&mut self, param: Parameter) -> DseResult<()> {
        if self.params.contains_key(&param.id) {
            return Err(SpaceError::Redefined { id: param.id }.into());
        }
        self.params.insert(param.id.clone(), param);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Parameter> {
        self.params.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Parameter> {
        self.params.get_mut(id)
    }

    /// Like [`get`](Self::get) but an unknown id is an error.
    pub fn param(&self, id: &str) -> DseResult<&Parameter> {
        self.params.get(id).ok_or_else(|| {
            SpaceError::UnknownParameter { id: id.to_string() }.into()
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.params.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.values()
    }

    /// The point assigning every parameter its default.
    pub fn default_point(&self) -> DesignPoint {
        self.params
            .values()
            .map(|p| (p.id.clone(), p.default.clone()))
            .collect()
    }

    /// Counts self-dependencies and dependencies on undefined parameters.
    pub fn check(&self) -> usize {
        let mut errors = 0;
        for (pid, param) in &self.params {
            for dep in &param.deps {
                if dep == pid {
                    error!(param = %pid, "Parameter cannot depend on itself");
                    errors += 1;
                }
                if !self.params.contains_key(dep) {
                    error!(param = %pid, dep = %dep, expr = %param.option_expr, "Parameter depends on an undefined parameter");
                    errors += 1;
                }
            }
        }
        errors
    }

    /// Depth-first topological order: each id follows its dependencies.
    ///
    /// Cycles do not raise. A cyclic space yields the DFS order reached from
    /// the first id of the cycle in definition order.
    pub fn topo_sort(&self) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::with_capacity(self.params.len());
        let mut sorted = Vec::with_capacity(self.params.len());
        let mut stack: Vec<(&str, usize)> = Vec::new();

        for root in self.params.keys() {
            if !visited.insert(root.as_str()) {
                continue;
            }
            stack.push((root.as_str(), 0));
            while let Some((id, next)) = stack.last_mut() {
                let deps = self.params.get(*id).map(|p| p.deps.as_slice()).unwrap_or(&[]);
                if let Some(dep) = deps.get(*next) {
                    *next += 1;
                    if self.params.contains_key(dep) && visited.insert(dep.as_str()) {
                        stack.push((dep.as_str(), 0));
                    }
                } else {
                    sorted.push(id.to_string());
                    stack.pop();
                }
            }
        }
        sorted
    }

    /// Fills every parameter's child list from the dependency edges.
    pub fn analyze_children(&mut self) {
        let edges: Vec<(String, String)> = self
            .params
            .values()
            .flat_map(|p| p.deps.iter().map(move |dep| (dep.clone(), p.id.clone())))
            .collect();
        for param in self.params.values_mut() {
            param.children.clear();
        }
        for (dep, child) in edges {
            if let Some(parent) = self.params.get_mut(&dep) {
                if !parent.children.contains(&child) {
                    parent.children.push(child);
                }
            }
        }
    }
}

/// Builds, validates and links a design space from its definition.
pub fn compile_design_space(
    definition: &IndexMap<String, ParameterConfig>,
) -> DseResult<DesignSpace> {
    let mut space = DesignSpace::new();
    for (id, config) in definition {
        space.insert(create_parameter(id, config)?)?;
    }

    let errors = space.check();
    if errors > 0 {
        error!(errors, "Design space has errors");
        return Err(SpaceError::CheckFailed { errors }.into());
    }
    space.analyze_children();

    info!(params = space.len(), "Finished design space compilation");
    Ok(space)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dse_types::DseError;
    use proptest::prelude::*;

    fn definition(entries: &[(&str, ParameterConfig)]) -> IndexMap<String, ParameterConfig> {
        entries
            .iter()
            .map(|(id, config)| (id.to_string(), config.clone()))
            .collect()
    }

    fn cfg(options: &str, default: impl Into<dse_types::ParamValue>) -> ParameterConfig {
        ParameterConfig::new(options, default)
    }

    #[test]
    fn test_check_reports_self_and_missing_deps() {
        let mut space = DesignSpace::new();
        space
            .insert(create_parameter("A", &cfg("[x for x in range(A)]", 0)).unwrap())
            .unwrap();
        assert_eq!(space.check(), 1);

        let mut space = DesignSpace::new();
        space
            .insert(create_parameter("A", &cfg("[x for x in range(B)]", 0)).unwrap())
            .unwrap();
        assert_eq!(space.check(), 1);
    }

    #[test]
    fn test_redefined_parameter() {
        let mut space = DesignSpace::new();
        let param = create_parameter("A", &cfg("[1]", 1)).unwrap();
        space.insert(param.clone()).unwrap();
        assert!(matches!(
            space.insert(param),
            Err(DseError::Space(SpaceError::Redefined { .. }))
        ));
    }

    #[test]
    fn test_topo_sort_places_deps_first() {
        let def = definition(&[
            ("A", cfg("[x for x in range(10) if x==0 or B!='flatten' and C!='flatten']", 0)),
            ("B", cfg("[x for x in ['off', '', 'flatten'] if x=='off' or C!='flatten']", "off")),
            ("C", cfg("[x for x in ['off', '', 'flatten']]", "off")),
        ]);
        let space = compile_design_space(&def).unwrap();
        assert_eq!(space.topo_sort(), vec!["C", "B", "A"]);

        let sorted = space.topo_sort();
        for param in space.iter() {
            let pos = sorted.iter().position(|id| *id == param.id).unwrap();
            for dep in &param.deps {
                assert!(sorted.iter().position(|id| id == dep).unwrap() < pos);
            }
        }
    }

    #[test]
    fn test_topo_sort_tolerates_cycles() {
        let mut space = DesignSpace::new();
        space
            .insert(create_parameter("A", &cfg("[x for x in range(B)]", 0)).unwrap())
            .unwrap();
        space
            .insert(create_parameter("B", &cfg("[x for x in range(A)]", 0)).unwrap())
            .unwrap();
        assert_eq!(space.topo_sort(), vec!["B", "A"]);
    }

    #[test]
    fn test_analyze_children() {
        let def = definition(&[
            ("A", cfg("[x for x in range(10) if x==1 or B!='flatten' and C!='flatten']", 0)),
            ("B", cfg("[x for x in ['off', ''] if x=='off' or C!='flatten']", "off")),
            ("C", cfg("[x for x in ['off', '', 'flatten'] if x=='off' or A&(A-1)==0]", "off")),
        ]);
        let space = compile_design_space(&def).unwrap();

        assert_eq!(space.get("A").unwrap().children, vec!["C"]);
        assert_eq!(space.get("B").unwrap().children, vec!["A"]);
        assert_eq!(space.get("C").unwrap().children, vec!["A", "B"]);
    }

    #[test]
    fn test_compile_rejects_dangling_dependency() {
        let def = definition(&[("A", cfg("[x for x in range(10) if x < N]", 0))]);
        assert!(matches!(
            compile_design_space(&def),
            Err(DseError::Space(SpaceError::CheckFailed { errors: 1 }))
        ));
    }

    #[test]
    fn test_default_point() {
        let def = definition(&[
            ("A", cfg("[1, 2]", 1)),
            ("B", cfg("['off', 'on']", "off")),
        ]);
        let space = compile_design_space(&def).unwrap();
        let point = space.default_point();
        assert_eq!(point.get("A"), Some(&1.into()));
        assert_eq!(point.get("B"), Some(&"off".into()));
    }

    /// Random acyclic dependency graphs over `P0..Pn`, inserted in shuffled
    /// order. Each `Pi` may only depend on lower-numbered parameters.
    fn acyclic_space() -> impl Strategy<Value = DesignSpace> {
        (1usize..7)
            .prop_flat_map(|n| {
                (
                    prop::collection::vec(prop::collection::vec(any::<bool>(), n), n),
                    Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
                )
            })
            .prop_map(|(edges, order)| {
                let mut space = DesignSpace::new();
                for i in order {
                    let deps: Vec<String> =
                        (0..i).filter(|&j| edges[i][j]).map(|j| format!("P{j}")).collect();
                    let options = if deps.is_empty() {
                        "[0, 1]".to_string()
                    } else {
                        format!("[x for x in [0, 1] if x==0 or {} >= 0]", deps.join(" + "))
                    };
                    let param = create_parameter(&format!("P{i}"), &cfg(&options, 0)).unwrap();
                    space.insert(param).unwrap();
                }
                space.analyze_children();
                space
            })
    }

    proptest! {
        #[test]
        fn prop_topo_sort_follows_dependencies(space in acyclic_space()) {
            let sorted = space.topo_sort();
            prop_assert_eq!(sorted.len(), space.len());
            prop_assert_eq!(sorted.iter().collect::<HashSet<_>>().len(), space.len());
            for param in space.iter() {
                let pos = sorted.iter().position(|id| *id == param.id).unwrap();
                for dep in &param.deps {
                    let dep_pos = sorted.iter().position(|id| id == dep).unwrap();
                    prop_assert!(dep_pos < pos, "{} must precede {}", dep, param.id);
                }
            }
        }
    }
}
