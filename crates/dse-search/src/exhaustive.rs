//! Exhaustive traversal of every reachable point.

use crate::algorithm::{PointMutator, SearchAlgorithm};
use dse_space::DesignSpace;
use dse_types::{DesignPoint, DseResult, EvalResult, SearchError};
use std::collections::HashMap;
use tracing::{debug, info};

/// One level of the traversal: `point` with parameters before `idx` fixed.
#[derive(Debug)]
struct Frame {
    point: DesignPoint,
    idx: usize,
    /// Whether the unmodified point was already descended into.
    started: bool,
}

/// Visits every reachable combination exactly once.
///
/// Parameters are walked in topological order. At each level the point is
/// first descended into as is, then the level's parameter is stepped forward
/// one option at a time until it reaches its last option, descending after
/// every step. Leaves are grouped into batches.
#[derive(Debug)]
pub struct ExhaustiveSearch {
    mutator: PointMutator,
    ordered_ids: Vec<String>,
    batch_size: usize,
    frames: Vec<Frame>,
    iteration: usize,
    exhausted: bool,
}

impl ExhaustiveSearch {
    pub fn new(space: DesignSpace, batch_size: usize) -> DseResult<Self> {
        if batch_size == 0 {
            return Err(SearchError::InvalidBatchSize.into());
        }
        let ordered_ids = space.topo_sort();
        let mutator = PointMutator::new(space);
        let root = Frame {
            point: mutator.default_point(),
            idx: 0,
            started: false,
        };
        info!(batch_size, "Launch exhaustive search algorithm");
        Ok(Self {
            mutator,
            ordered_ids,
            batch_size,
            frames: vec![root],
            iteration: 0,
            exhausted: false,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches produced so far.
    pub fn iterations(&self) -> usize {
        self.iteration
    }

    fn next_point(&mut self) -> DseResult<Option<DesignPoint>> {
        let depth = self.ordered_ids.len();
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(None);
            };

            if frame.idx == depth {
                return Ok(self.frames.pop().map(|leaf| leaf.point));
            }

            let child = if !frame.started {
                frame.started = true;
                Some(frame.point.clone())
            } else if self
                .mutator
                .move_by(&mut frame.point, &self.ordered_ids[frame.idx], 1)?
                == 1
            {
                Some(frame.point.clone())
            } else {
                None
            };

            match child {
                Some(point) => {
                    let idx = frame.idx + 1;
                    self.frames.push(Frame {
                        point,
                        idx,
                        started: false,
                    });
                }
                None => {
                    self.frames.pop();
                }
            }
        }
    }
}

impl SearchAlgorithm for ExhaustiveSearch {
    fn next_batch(
        &mut self,
        _previous: Option<&HashMap<String, EvalResult>>,
    ) -> DseResult<Option<Vec<DesignPoint>>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.next_point()? {
                Some(point) => {
                    debug!(?point, "Next point");
                    batch.push(point);
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            info!("No more points to be explored, stop");
            return Ok(None);
        }
        self.iteration += 1;
        info!(iteration = self.iteration, points = batch.len(), "Produced batch");
        Ok(Some(batch))
    }

    fn name(&self) -> &str {
        "exhaustive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::tests::reference_space;
    use dse_space::{create_parameter, partition, ParameterConfig};
    use dse_types::point_key;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn drain(search: &mut ExhaustiveSearch) -> Vec<DesignPoint> {
        let mut points = Vec::new();
        while let Some(batch) = search.next_batch(None).unwrap() {
            assert!(batch.len() <= search.batch_size());
            points.extend(batch);
        }
        points
    }

    #[test]
    fn test_reference_space_counts() {
        let mut search = ExhaustiveSearch::new(reference_space(), 8).unwrap();
        let points = drain(&mut search);

        assert_eq!(points.len(), 43);
        assert_eq!(search.iterations(), 6);
        let keys: HashSet<String> = points.iter().map(point_key).collect();
        assert_eq!(keys.len(), 43);
        assert!(search.next_batch(None).unwrap().is_none());
    }

    #[test]
    fn test_first_point_is_default() {
        let space = reference_space();
        let default = space.default_point();
        let mut search = ExhaustiveSearch::new(space, 1).unwrap();
        let first = search.next_batch(None).unwrap().unwrap();
        assert_eq!(first, vec![default]);
    }

    #[test]
    fn test_every_point_is_legal() {
        let space = reference_space();
        let mutator = PointMutator::new(space.clone());
        let mut search = ExhaustiveSearch::new(space, 8).unwrap();
        for point in drain(&mut search) {
            for id in ["A", "B", "C"] {
                let options = mutator.options(&point, id).unwrap();
                assert!(options.contains(point.get(id).unwrap()), "{point:?}");
            }
        }
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        assert!(ExhaustiveSearch::new(reference_space(), 0).is_err());
    }

    #[test]
    fn test_partitions_cover_the_full_space() {
        let mut space = DesignSpace::new();
        let params = [
            (
                "P1",
                ParameterConfig::new("['off', '', 'flatten']", "off")
                    .with_order("0 if x!='flatten' else 1")
                    .with_type("PIPELINE"),
            ),
            (
                "U",
                ParameterConfig::new("[x for x in [1, 2, 4, 8] if x==1 or P1!='flatten']", 1)
                    .with_type("PARALLEL"),
            ),
        ];
        for (id, config) in params {
            space.insert(create_parameter(id, &config).unwrap()).unwrap();
        }
        space.analyze_children();

        let full: HashSet<String> = drain(&mut ExhaustiveSearch::new(space.clone(), 4).unwrap())
            .iter()
            .map(point_key)
            .collect();
        assert_eq!(full.len(), 9);

        let parts = partition(&space, 4).unwrap();
        assert_eq!(parts.len(), 2);
        let mut sizes = Vec::new();
        let mut union = HashSet::new();
        for part in parts {
            assert_eq!(part.check(), 0);
            let points = drain(&mut ExhaustiveSearch::new(part, 4).unwrap());
            sizes.push(points.len());
            union.extend(points.iter().map(point_key));
        }
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 8]);
        assert_eq!(union, full);
    }

    const PIPELINE_OPTIONS: [&str; 3] = [
        "['off', '', 'flatten']",
        "['off', 'flatten']",
        "['', 'flatten', 'off']",
    ];

    /// Independent PIPELINE parameters, each spanning both order buckets, plus a
    /// PARALLEL factor gated on a subset of them.
    fn branching_space() -> impl Strategy<Value = DesignSpace> {
        (1usize..4)
            .prop_flat_map(|n| {
                (
                    prop::collection::vec(0..PIPELINE_OPTIONS.len(), n),
                    prop::collection::vec(any::<bool>(), n),
                )
            })
            .prop_map(|(variants, gates)| {
                let mut space = DesignSpace::new();
                for (i, variant) in variants.iter().enumerate() {
                    let config = ParameterConfig::new(PIPELINE_OPTIONS[*variant], "off")
                        .with_order("0 if x!='flatten' else 1")
                        .with_type("PIPELINE");
                    space.insert(create_parameter(&format!("P{i}"), &config).unwrap()).unwrap();
                }
                let conditions: Vec<String> = gates
                    .iter()
                    .enumerate()
                    .filter(|(_, gated)| **gated)
                    .map(|(i, _)| format!("P{i}!='flatten'"))
                    .collect();
                let options = if conditions.is_empty() {
                    "[1, 2, 4]".to_string()
                } else {
                    format!("[x for x in [1, 2, 4] if x==1 or {}]", conditions.join(" and "))
                };
                let config = ParameterConfig::new(options, 1).with_type("PARALLEL");
                space.insert(create_parameter("U", &config).unwrap()).unwrap();
                space.analyze_children();
                space
            })
    }

    proptest! {
        #[test]
        fn prop_partitions_conserve_points(space in branching_space(), limit in 1usize..7) {
            let full: HashSet<String> = drain(&mut ExhaustiveSearch::new(space.clone(), 4).unwrap())
                .iter()
                .map(point_key)
                .collect();

            let parts = partition(&space, limit).unwrap();
            prop_assert!(!parts.is_empty() && parts.len() <= limit);
            let mut union = HashSet::new();
            let mut total = 0;
            for part in parts {
                prop_assert_eq!(part.check(), 0);
                let points = drain(&mut ExhaustiveSearch::new(part, 4).unwrap());
                total += points.len();
                union.extend(points.iter().map(point_key));
            }
            prop_assert_eq!(total, full.len());
            prop_assert_eq!(union, full);
        }
    }
}
