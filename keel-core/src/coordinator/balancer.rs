//! Load-based shard balancing
//!
//! Pure functions over in-memory snapshots. The processor supplies inputs
//! and applies outputs; nothing here touches the store. All tie-breaking is
//! deterministic so concurrent leader candidates compute identical plans.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{DistributorError, Result};
use crate::store::ShardMetrics;
use crate::MOVE_COOLDOWN_SECS;

/// Place unassigned shards onto executors, heaviest first.
///
/// Greedy largest-first-decreasing packing: shards are sorted by smoothed
/// load descending and each goes to the currently least-loaded executor.
/// Empty inputs produce an empty plan.
pub fn assign_unassigned_shards(
    unassigned_shards: &[String],
    loads: &HashMap<String, f64>,
    stats: &HashMap<String, ShardMetrics>,
    current_assignments: &HashMap<String, Vec<String>>,
) -> HashMap<String, Vec<String>> {
    if unassigned_shards.is_empty() || loads.is_empty() {
        return HashMap::new();
    }

    let mut assignment: HashMap<String, Vec<String>> = HashMap::new();

    let mut current_loads = loads.clone();
    let mut current_counts: HashMap<String, usize> = loads
        .keys()
        .map(|id| {
            (
                id.clone(),
                current_assignments.get(id).map_or(0, |shards| shards.len()),
            )
        })
        .collect();

    let mut shards = unassigned_shards.to_vec();
    shards.sort_by(|a, b| {
        shard_load(stats, b)
            .partial_cmp(&shard_load(stats, a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    });

    for shard_id in shards {
        let executor_id = match find_least_loaded_executor(&current_loads, &current_counts) {
            Ok(id) => id,
            Err(_) => continue,
        };
        let weight = shard_load(stats, &shard_id);
        *current_loads.entry(executor_id.clone()).or_default() += weight;
        *current_counts.entry(executor_id.clone()).or_default() += 1;
        assignment.entry(executor_id).or_default().push(shard_id);
    }

    assignment
}

/// Pick the executor with minimum load.
///
/// Ties go to the executor with fewer shards, then to the lexicographically
/// smallest id. An empty load map is an error.
pub fn find_least_loaded_executor(
    loads: &HashMap<String, f64>,
    counts: &HashMap<String, usize>,
) -> Result<String> {
    if loads.is_empty() {
        return Err(DistributorError::NoExecutorsAvailable);
    }

    let mut ids: Vec<&String> = loads.keys().collect();
    ids.sort();

    let count_of = |id: &String| counts.get(id).copied().unwrap_or(0);

    let mut min_id = ids[0];
    let mut min_load = safe_load(loads[min_id]);

    for &id in &ids[1..] {
        let load = safe_load(loads[id]);
        if load < min_load {
            min_load = load;
            min_id = id;
            continue;
        }
        if load == min_load && count_of(id) < count_of(min_id) {
            min_id = id;
        }
    }

    Ok(min_id.clone())
}

/// Move one shard to each idle executor, heaviest eligible donor first.
///
/// Shards that moved within the cooldown window are not candidates. Stolen
/// shards are removed from the donor's list in `assignments`; the caller
/// merges the returned steals into its working plan. At most one shard
/// lands on each empty executor per invocation, so idle capacity fills
/// gradually instead of in a storm.
pub fn redistribute_to_empty_executors(
    now_unix: i64,
    loads: &HashMap<String, f64>,
    stats: &HashMap<String, ShardMetrics>,
    assignments: &mut HashMap<String, Vec<String>>,
) -> (HashMap<String, Vec<String>>, HashMap<String, f64>) {
    if assignments.is_empty() {
        return (HashMap::new(), loads.clone());
    }

    let mut empty_executors: Vec<String> = assignments
        .iter()
        .filter(|(_, shards)| shards.is_empty())
        .map(|(id, _)| id.clone())
        .collect();
    if empty_executors.is_empty() {
        return (HashMap::new(), loads.clone());
    }
    empty_executors.sort();

    struct ShardCandidate {
        executor: String,
        shard_id: String,
        weight: f64,
    }

    let mut donors: Vec<ShardCandidate> = Vec::new();
    for (executor_id, shards) in assignments.iter() {
        if shards.is_empty() {
            continue;
        }
        for shard_id in eligible_shards(now_unix, shards, stats) {
            donors.push(ShardCandidate {
                weight: shard_load(stats, &shard_id),
                executor: executor_id.clone(),
                shard_id,
            });
        }
    }
    if donors.is_empty() {
        return (HashMap::new(), loads.clone());
    }

    donors.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.executor.cmp(&b.executor))
            .then_with(|| a.shard_id.cmp(&b.shard_id))
    });

    let mut steals: HashMap<String, Vec<String>> = HashMap::new();
    let mut updated_loads = loads.clone();
    let mut taken: HashSet<String> = HashSet::new();

    for target in &empty_executors {
        let candidate = donors.iter().find(|candidate| {
            candidate.executor != *target && !taken.contains(&candidate.shard_id)
        });
        let Some(candidate) = candidate else {
            continue;
        };
        taken.insert(candidate.shard_id.clone());

        debug!(
            "stealing shard {} from {} for idle executor {}",
            candidate.shard_id, candidate.executor, target
        );
        steals
            .entry(target.clone())
            .or_default()
            .push(candidate.shard_id.clone());
        if let Some(donor_shards) = assignments.get_mut(&candidate.executor) {
            donor_shards.retain(|id| id != &candidate.shard_id);
        }
        *updated_loads.entry(candidate.executor.clone()).or_default() -= candidate.weight;
        *updated_loads.entry(target.clone()).or_default() += candidate.weight;
    }

    (steals, updated_loads)
}

/// Shards whose last move is outside the cooldown window.
///
/// A shard with no metrics entry has never moved and is always eligible.
fn eligible_shards(
    now_unix: i64,
    shard_ids: &[String],
    stats: &HashMap<String, ShardMetrics>,
) -> Vec<String> {
    shard_ids
        .iter()
        .filter(|shard_id| {
            let last_move = stats.get(*shard_id).map_or(0, |stat| stat.last_move_time);
            now_unix - last_move > MOVE_COOLDOWN_SECS
        })
        .cloned()
        .collect()
}

/// Aggregate smoothed load per executor.
pub fn compute_executor_loads(
    assignments: &HashMap<String, Vec<String>>,
    stats: &HashMap<String, ShardMetrics>,
) -> HashMap<String, f64> {
    assignments
        .iter()
        .map(|(executor_id, shard_ids)| {
            let load = shard_ids.iter().map(|id| shard_load(stats, id)).sum();
            (executor_id.clone(), load)
        })
        .collect()
}

/// Smoothed load for one shard; unknown shards weigh zero.
pub fn shard_load(stats: &HashMap<String, ShardMetrics>, shard_id: &str) -> f64 {
    stats
        .get(shard_id)
        .map_or(0.0, |stat| safe_load(stat.smoothed_load))
}

/// Coerce arithmetic hazards to zero.
pub fn safe_load(value: f64) -> f64 {
    if value.is_nan() || value.is_infinite() {
        return 0.0;
    }
    value
}
