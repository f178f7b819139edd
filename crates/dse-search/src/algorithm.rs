//! The algorithm contract and dependency-aware point mutation.

use dse_space::DesignSpace;
use dse_types::{DesignPoint, DseResult, EvalResult, ParamValue};
use std::collections::HashMap;
use tracing::warn;

/// Common trait for all search algorithms.
pub trait SearchAlgorithm: Send {
    /// Produce the next batch of points, given the results of the previous
    /// batch keyed by point key (`None` on the first call). `Ok(None)` means
    /// the search is exhausted.
    fn next_batch(
        &mut self,
        previous: Option<&HashMap<String, EvalResult>>,
    ) -> DseResult<Option<Vec<DesignPoint>>>;

    /// Human-readable algorithm name.
    fn name(&self) -> &str;
}

/// Reads and mutates design points while keeping dependent parameters legal.
#[derive(Debug, Clone)]
pub struct PointMutator {
    space: DesignSpace,
}

impl PointMutator {
    pub fn new(space: DesignSpace) -> Self {
        Self { space }
    }

    pub fn space(&self) -> &DesignSpace {
        &self.space
    }

    pub fn default_point(&self) -> DesignPoint {
        self.space.default_point()
    }

    /// Legal values of `id` under the current values of its dependencies.
    pub fn options(&self, point: &DesignPoint, id: &str) -> DseResult<Vec<ParamValue>> {
        self.space.param(id)?.options_at(point)
    }

    /// Snaps the value of `id` back into its options. Returns whether it changed.
    fn validate_value(&self, point: &mut DesignPoint, id: &str) -> DseResult<bool> {
        let param = self.space.param(id)?;
        let options = param.options_at(point)?;
        if options.is_empty() {
            warn!(param = id, ?point, "No valid options, fall back to default");
            point.insert(id.to_string(), param.default.clone());
            return Ok(false);
        }

        let current = point.get(id).cloned();
        if let Some(value) = current.as_ref().and_then(ParamValue::as_int) {
            let closest = options
                .iter()
                .filter_map(|opt| opt.as_int().map(|v| (opt, v)))
                .min_by_key(|(_, v)| v.abs_diff(value));
            if let Some((candidate, _)) = closest {
                if candidate.as_int() != Some(value) {
                    point.insert(id.to_string(), candidate.clone());
                    return Ok(true);
                }
                return Ok(false);
            }
        }

        match current {
            Some(value) if options.contains(&value) => Ok(false),
            _ => {
                point.insert(id.to_string(), param.default.clone());
                Ok(true)
            }
        }
    }

    /// Re-validates the children of `id`, and transitively the children of
    /// every child whose value had to change.
    pub fn repair_children(&self, point: &mut DesignPoint, id: &str) -> DseResult<()> {
        let mut pending = vec![id.to_string()];
        while let Some(pid) = pending.pop() {
            let mut changed = Vec::new();
            for child in &self.space.param(&pid)?.children {
                if self.validate_value(point, child)? {
                    changed.push(child.clone());
                }
            }
            pending.extend(changed.into_iter().rev());
        }
        Ok(())
    }

    /// Moves `id` by `steps` positions in its option list, clamped to the ends.
    ///
    /// Returns the distance actually moved. A value that is not among its
    /// options is reset to the default and reports `0`.
    pub fn move_by(&self, point: &mut DesignPoint, id: &str, steps: i64) -> DseResult<i64> {
        let options = self.options(point, id)?;
        let position = point
            .get(id)
            .and_then(|value| options.iter().position(|opt| opt == value));

        let Some(idx) = position else {
            let param = self.space.param(id)?;
            warn!(param = id, value = ?point.get(id), "Value is not one of the options, reset to default");
            point.insert(id.to_string(), param.default.clone());
            self.repair_children(point, id)?;
            return Ok(0);
        };

        let idx = idx as i64;
        let last = options.len() as i64 - 1;
        let target = idx.saturating_add(steps).clamp(0, last);
        if target != idx {
            point.insert(id.to_string(), options[target as usize].clone());
            self.repair_children(point, id)?;
        }
        Ok(target - idx)
    }

    pub fn clone_point(point: &DesignPoint) -> DesignPoint {
        point.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dse_space::{create_parameter, ParameterConfig};
    use proptest::prelude::*;

    /// A(deps B, C), B(deps C), C: the reference three-parameter space.
    pub(crate) fn reference_space() -> DesignSpace {
        let mut space = DesignSpace::new();
        let params = [
            (
                "A",
                ParameterConfig::new(
                    r#"[x for x in range(10) if x==0 or B!="flatten" and C!="flatten"]"#,
                    0,
                ),
            ),
            (
                "B",
                ParameterConfig::new(
                    r#"[x for x in ["off", "", "flatten"] if x=="off" or C!="flatten"]"#,
                    "off",
                ),
            ),
            (
                "C",
                ParameterConfig::new(r#"[x for x in ["off", "", "flatten"]]"#, "off"),
            ),
        ];
        for (id, config) in params {
            space.insert(create_parameter(id, &config).unwrap()).unwrap();
        }
        space.analyze_children();
        space
    }

    #[test]
    fn test_default_point_and_options() {
        let mutator = PointMutator::new(reference_space());
        let point = mutator.default_point();

        assert_eq!(point.get("A"), Some(&ParamValue::Int(0)));
        assert_eq!(point.get("B"), Some(&ParamValue::from("off")));
        assert_eq!(point.get("C"), Some(&ParamValue::from("off")));
        assert_eq!(mutator.options(&point, "A").unwrap().len(), 10);
        assert_eq!(mutator.options(&point, "B").unwrap().len(), 3);
        assert_eq!(mutator.options(&point, "C").unwrap().len(), 3);
    }

    #[test]
    fn test_move_by_and_child_repair() {
        let mutator = PointMutator::new(reference_space());
        let mut point = mutator.default_point();

        assert_eq!(mutator.move_by(&mut point, "C", 1).unwrap(), 1);
        assert_eq!(point.get("C"), Some(&ParamValue::from("")));
        let mut point2 = PointMutator::clone_point(&point);

        assert_eq!(mutator.move_by(&mut point, "C", 1).unwrap(), 1);
        assert_eq!(point.get("C"), Some(&ParamValue::from("flatten")));
        // B has a single option left once C is flatten.
        assert_eq!(mutator.move_by(&mut point, "B", 1).unwrap(), 0);

        assert_eq!(mutator.move_by(&mut point2, "A", 99).unwrap(), 9);
        assert_eq!(mutator.move_by(&mut point2, "B", 1).unwrap(), 1);
        assert_eq!(point2.get("A"), Some(&ParamValue::Int(9)));
        assert_eq!(point2.get("B"), Some(&ParamValue::from("")));
        assert_eq!(point2.get("C"), Some(&ParamValue::from("")));

        // Flattening C invalidates both children, which snap back.
        assert_eq!(mutator.move_by(&mut point2, "C", 1).unwrap(), 1);
        assert_eq!(point2.get("A"), Some(&ParamValue::Int(0)));
        assert_eq!(point2.get("B"), Some(&ParamValue::from("off")));
        assert_eq!(point2.get("C"), Some(&ParamValue::from("flatten")));

        assert_eq!(mutator.move_by(&mut point2, "C", -99).unwrap(), -2);
    }

    #[test]
    fn test_move_by_clamps_without_wrapping() {
        let mutator = PointMutator::new(reference_space());
        let mut point = mutator.default_point();

        assert_eq!(mutator.move_by(&mut point, "A", 100).unwrap(), 9);
        assert_eq!(mutator.move_by(&mut point, "A", 1).unwrap(), 0);
        assert_eq!(point.get("A"), Some(&ParamValue::Int(9)));
    }

    #[test]
    fn test_move_by_extreme_steps_from_middle() {
        let mutator = PointMutator::new(reference_space());
        let mut point = mutator.default_point();

        assert_eq!(mutator.move_by(&mut point, "A", 4).unwrap(), 4);
        assert_eq!(mutator.move_by(&mut point, "A", i64::MAX).unwrap(), 5);
        assert_eq!(point.get("A"), Some(&ParamValue::Int(9)));

        assert_eq!(mutator.move_by(&mut point, "A", -5).unwrap(), -5);
        assert_eq!(mutator.move_by(&mut point, "A", i64::MIN).unwrap(), -4);
        assert_eq!(point.get("A"), Some(&ParamValue::Int(0)));
    }

    #[test]
    fn test_move_by_resets_illegal_value() {
        let mutator = PointMutator::new(reference_space());
        let mut point = mutator.default_point();
        point.insert("B".to_string(), "unroll".into());

        assert_eq!(mutator.move_by(&mut point, "B", 1).unwrap(), 0);
        assert_eq!(point.get("B"), Some(&ParamValue::from("off")));
    }

    #[test]
    fn test_integer_child_snaps_to_closest_option() {
        let mut space = DesignSpace::new();
        space
            .insert(create_parameter("P", &ParameterConfig::new("['on', 'off']", "on")).unwrap())
            .unwrap();
        space
            .insert(
                create_parameter(
                    "U",
                    &ParameterConfig::new("[x for x in [1, 2, 4, 8, 16] if P=='on' or x < 6]", 1),
                )
                .unwrap(),
            )
            .unwrap();
        space.analyze_children();
        let mutator = PointMutator::new(space);

        let mut point = mutator.default_point();
        assert_eq!(mutator.move_by(&mut point, "U", 4).unwrap(), 4);
        assert_eq!(point.get("U"), Some(&ParamValue::Int(16)));
        assert_eq!(mutator.move_by(&mut point, "P", 1).unwrap(), 1);
        assert_eq!(point.get("U"), Some(&ParamValue::Int(4)));
    }

    proptest! {
        #[test]
        fn prop_move_by_stays_within_options(
            moves in prop::collection::vec((0usize..3, any::<i64>()), 1..24)
        ) {
            let mutator = PointMutator::new(reference_space());
            let mut point = mutator.default_point();
            for (param, steps) in moves {
                let id = ["A", "B", "C"][param];
                let span = mutator.options(&point, id).unwrap().len() as i64 - 1;
                let moved = mutator.move_by(&mut point, id, steps).unwrap();
                prop_assert!(moved.abs() <= span);
                prop_assert!(steps == 0 || moved == 0 || moved.signum() == steps.signum());
                for check in ["A", "B", "C"] {
                    let options = mutator.options(&point, check).unwrap();
                    prop_assert!(options.contains(point.get(check).unwrap()), "{:?}", point);
                }
            }
        }
    }
}
