//! Splitting a design space into independently explorable partitions.

use crate::expr::Bindings;
use crate::expr::Value;
use crate::parameter::Parameter;
use crate::space::DesignSpace;
use dse_types::{DseResult, ParamValue, SpaceError};
use indexmap::IndexMap;
use std::collections::VecDeque;
use tracing::debug;

/// Options of a partitionable parameter grouped by their order bucket, in
/// first-seen order. `None` when the parameter cannot be branched on.
fn bucket_options(
    space: &DesignSpace,
    param: &Parameter,
) -> DseResult<Option<IndexMap<i64, Vec<ParamValue>>>> {
    let Some(order) = param.order.as_ref().filter(|_| param.ds_type.is_partitionable()) else {
        return Ok(None);
    };

    let bindings: Bindings = param
        .deps
        .iter()
        .filter_map(|dep| space.get(dep).map(|p| (dep.clone(), Value::from(&p.default))))
        .collect();

    let mut buckets: IndexMap<i64, Vec<ParamValue>> = IndexMap::new();
    for option in param.options(&bindings)? {
        let idx = order.bucket(&option).map_err(|source| SpaceError::Evaluation {
            id: param.id.clone(),
            expr: order.expr.clone(),
            source,
        })?;
        buckets.entry(idx).or_default().push(option);
    }
    Ok(if buckets.is_empty() { None } else { Some(buckets) })
}

/// Partitions `space` into at most `limit` sub-spaces.
///
/// Parameters are visited in topological order. A partitionable parameter whose
/// options (under its dependencies' defaults) span several order buckets is
/// branched into one copy per bucket, provided the total stays within `limit`.
/// One whose options all share a bucket is collapsed to its default.
///
/// Branching and the limit fallback keep every reachable point. The shadow
/// collapse does not: the other options of a single-bucket parameter are
/// dropped, so the union of the partitions is a strict subset of the original
/// space whenever a collapse happens.
pub fn partition(space: &DesignSpace, limit: usize) -> DseResult<Vec<DesignSpace>> {
    let sorted_ids = space.topo_sort();

    let mut part_queue: VecDeque<DesignSpace> = VecDeque::from([space.clone()]);
    let mut ptr = 0;
    while part_queue.len() < limit && ptr < sorted_ids.len() {
        let param_id = &sorted_ids[ptr];
        let mut next_queue: VecDeque<DesignSpace> = VecDeque::new();

        while let Some(mut curr) = part_queue.pop_back() {
            let buckets = bucket_options(&curr, curr.param(param_id)?)?;
            let accum = part_queue.len() + next_queue.len();

            match buckets {
                // Shadowed: pin the default and drop the rest of the bucket.
                Some(buckets) if buckets.len() == 1 => {
                    if let Some(param) = curr.get_mut(param_id) {
                        let default = param.default.clone();
                        param.narrow_options(&[default]);
                    }
                    debug!(ptr, param = %param_id, "Stop partition due to shadow");
                    next_queue.push_back(curr);
                }
                Some(buckets) if accum + buckets.len() <= limit => {
                    let parts = buckets.len();
                    for values in buckets.into_values() {
                        let mut copied = curr.clone();
                        if let Some(param) = copied.get_mut(param_id) {
                            param.narrow_options(&values);
                            if let Some(first) = values.first() {
                                param.default = first.clone();
                            }
                        }
                        next_queue.push_back(copied);
                    }
                    debug!(
                        ptr,
                        param = %param_id,
                        parts,
                        total = part_queue.len() + next_queue.len(),
                        "Partitioned"
                    );
                }
                _ => {
                    debug!(ptr, param = %param_id, limit, "Stop partition due to not partitionable or too many parts");
                    next_queue.push_back(curr);
                }
            }
        }

        part_queue = next_queue;
        ptr += 1;
    }

    Ok(part_queue.into_iter().rev().collect())
}
