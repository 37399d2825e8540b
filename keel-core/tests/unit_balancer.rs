//! Unit tests for the load-based balancer
//!
//! Covers placement, deterministic tie-breaking, redistribution to idle
//! executors, and the move cooldown.

use std::collections::HashMap;

use keel_core::coordinator::balancer::{
    assign_unassigned_shards, compute_executor_loads, find_least_loaded_executor,
    redistribute_to_empty_executors, safe_load, shard_load,
};
use keel_core::store::ShardMetrics;

const NOW: i64 = 1_000_000;
const OLD: i64 = NOW - 100_000;

fn metrics(smoothed_load: f64, last_move_time: i64) -> ShardMetrics {
    ShardMetrics {
        smoothed_load,
        last_update_time: NOW,
        last_move_time,
    }
}

fn strings(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[test]
fn assignment_with_empty_inputs_is_empty() {
    let result = assign_unassigned_shards(&[], &HashMap::new(), &HashMap::new(), &HashMap::new());
    assert!(result.is_empty());

    let loads = HashMap::from([("exec-1".to_string(), 0.0)]);
    let result = assign_unassigned_shards(&[], &loads, &HashMap::new(), &HashMap::new());
    assert!(result.is_empty());

    let result = assign_unassigned_shards(
        &strings(&["s1"]),
        &HashMap::new(),
        &HashMap::new(),
        &HashMap::new(),
    );
    assert!(result.is_empty());
}

#[test]
fn assignment_balances_by_weight() {
    let stats = HashMap::from([
        ("sA".to_string(), metrics(3.0, 0)),
        ("sB".to_string(), metrics(1.0, 0)),
    ]);
    let loads = HashMap::from([("exec-1".to_string(), 0.0), ("exec-2".to_string(), 0.0)]);
    let current = HashMap::from([
        ("exec-1".to_string(), Vec::new()),
        ("exec-2".to_string(), Vec::new()),
    ]);

    let result = assign_unassigned_shards(&strings(&["sA", "sB"]), &loads, &stats, &current);

    assert_eq!(result.len(), 2);
    assert_eq!(result["exec-1"], strings(&["sA"]));
    assert_eq!(result["exec-2"], strings(&["sB"]));
}

#[test]
fn assignment_respects_existing_load() {
    let stats = HashMap::from([
        ("s1".to_string(), metrics(2.0, 0)),
        ("s2".to_string(), metrics(1.0, 0)),
    ]);
    let loads = HashMap::from([
        ("exec-1".to_string(), 5.0),
        ("exec-2".to_string(), 1.0),
        ("exec-3".to_string(), 4.0),
    ]);
    let current = HashMap::from([
        ("exec-1".to_string(), strings(&["existing"])),
        ("exec-2".to_string(), Vec::new()),
        ("exec-3".to_string(), strings(&["existing"])),
    ]);

    let result = assign_unassigned_shards(&strings(&["s1", "s2"]), &loads, &stats, &current);

    assert_eq!(result["exec-2"], strings(&["s1", "s2"]));
    assert!(!result.contains_key("exec-1"));
    assert!(!result.contains_key("exec-3"));
}

#[test]
fn assignment_breaks_load_ties_by_count() {
    let stats = HashMap::from([
        ("s1".to_string(), metrics(0.0, 0)),
        ("s2".to_string(), metrics(0.0, 0)),
    ]);
    let loads = HashMap::from([("exec-1".to_string(), 0.0), ("exec-2".to_string(), 0.0)]);
    let current = HashMap::from([
        ("exec-1".to_string(), strings(&["existing"])),
        ("exec-2".to_string(), Vec::new()),
    ]);

    let result = assign_unassigned_shards(&strings(&["s1", "s2"]), &loads, &stats, &current);

    assert_eq!(result["exec-1"].len(), 1);
    assert_eq!(result["exec-2"].len(), 1);
}

#[test]
fn assignment_places_every_shard_exactly_once() {
    let shard_ids: Vec<String> = (0..20).map(|i| format!("shard-{i:02}")).collect();
    let stats: HashMap<String, ShardMetrics> = shard_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), metrics(i as f64 % 5.0, 0)))
        .collect();
    let loads = HashMap::from([
        ("exec-1".to_string(), 0.0),
        ("exec-2".to_string(), 3.0),
        ("exec-3".to_string(), 1.0),
    ]);

    let result = assign_unassigned_shards(&shard_ids, &loads, &stats, &HashMap::new());

    let mut placed: Vec<String> = result.values().flatten().cloned().collect();
    placed.sort();
    let mut expected = shard_ids.clone();
    expected.sort();
    assert_eq!(placed, expected, "every shard placed exactly once");

    for executor_id in result.keys() {
        assert!(loads.contains_key(executor_id), "unknown executor {executor_id}");
    }
}

#[test]
fn least_loaded_prefers_smallest_id_on_full_tie() {
    let loads = HashMap::from([
        ("exec-b".to_string(), 1.0),
        ("exec-a".to_string(), 1.0),
        ("exec-c".to_string(), 1.0),
    ]);
    let counts = HashMap::from([
        ("exec-a".to_string(), 2),
        ("exec-b".to_string(), 2),
        ("exec-c".to_string(), 2),
    ]);

    let winner = find_least_loaded_executor(&loads, &counts).unwrap();
    assert_eq!(winner, "exec-a");
}

#[test]
fn least_loaded_prefers_lower_count_on_load_tie() {
    let loads = HashMap::from([("exec-a".to_string(), 1.0), ("exec-b".to_string(), 1.0)]);
    let counts = HashMap::from([("exec-a".to_string(), 3), ("exec-b".to_string(), 1)]);

    let winner = find_least_loaded_executor(&loads, &counts).unwrap();
    assert_eq!(winner, "exec-b");
}

#[test]
fn least_loaded_with_no_executors_is_an_error() {
    let result = find_least_loaded_executor(&HashMap::new(), &HashMap::new());
    assert!(result.is_err());
}

#[test]
fn redistribute_moves_heaviest_eligible_shard() {
    let stats = HashMap::from([
        ("s1".to_string(), metrics(5.0, OLD)),
        ("s2".to_string(), metrics(2.0, OLD)),
        ("s3".to_string(), metrics(1.0, OLD)),
    ]);
    let loads = HashMap::from([
        ("exec-1".to_string(), 7.0),
        ("exec-2".to_string(), 0.0),
        ("exec-3".to_string(), 1.0),
    ]);
    let mut assignments = HashMap::from([
        ("exec-1".to_string(), strings(&["s1", "s2"])),
        ("exec-2".to_string(), Vec::new()),
        ("exec-3".to_string(), strings(&["s3"])),
    ]);

    let (steals, updated) = redistribute_to_empty_executors(NOW, &loads, &stats, &mut assignments);

    assert_eq!(steals["exec-2"], strings(&["s1"]));
    assert!((updated["exec-1"] - 2.0).abs() < 1e-9);
    assert!((updated["exec-2"] - 5.0).abs() < 1e-9);
    assert_eq!(assignments["exec-1"], strings(&["s2"]), "donor loses the shard");
}

#[test]
fn redistribute_skips_shards_in_cooldown() {
    let stats = HashMap::from([
        ("s1".to_string(), metrics(5.0, NOW)),
        ("s2".to_string(), metrics(2.0, OLD)),
        ("s3".to_string(), metrics(1.0, OLD)),
    ]);
    let loads = HashMap::from([
        ("exec-1".to_string(), 7.0),
        ("exec-2".to_string(), 0.0),
        ("exec-3".to_string(), 1.0),
    ]);
    let mut assignments = HashMap::from([
        ("exec-1".to_string(), strings(&["s1", "s2"])),
        ("exec-2".to_string(), Vec::new()),
        ("exec-3".to_string(), strings(&["s3"])),
    ]);

    let (steals, updated) = redistribute_to_empty_executors(NOW, &loads, &stats, &mut assignments);

    assert_eq!(steals["exec-2"], strings(&["s2"]));
    assert!((updated["exec-1"] - 5.0).abs() < 1e-9);
    assert!((updated["exec-2"] - 2.0).abs() < 1e-9);
}

#[test]
fn redistribute_gives_each_idle_executor_at_most_one_shard() {
    let stats: HashMap<String, ShardMetrics> = (0..6)
        .map(|i| (format!("s{i}"), metrics(6.0 - i as f64, OLD)))
        .collect();
    let loads = HashMap::from([
        ("exec-1".to_string(), 21.0),
        ("exec-2".to_string(), 0.0),
        ("exec-3".to_string(), 0.0),
    ]);
    let mut assignments = HashMap::from([
        ("exec-1".to_string(), strings(&["s0", "s1", "s2", "s3", "s4", "s5"])),
        ("exec-2".to_string(), Vec::new()),
        ("exec-3".to_string(), Vec::new()),
    ]);

    let (steals, _) = redistribute_to_empty_executors(NOW, &loads, &stats, &mut assignments);

    assert_eq!(steals.len(), 2);
    assert_eq!(steals["exec-2"].len(), 1);
    assert_eq!(steals["exec-3"].len(), 1);
    assert_ne!(steals["exec-2"], steals["exec-3"], "a shard is taken once");
    // Heaviest donors go first, in target id order.
    assert_eq!(steals["exec-2"], strings(&["s0"]));
    assert_eq!(steals["exec-3"], strings(&["s1"]));
}

#[test]
fn redistribute_without_idle_executors_changes_nothing() {
    let stats = HashMap::from([("s1".to_string(), metrics(1.0, OLD))]);
    let loads = HashMap::from([("exec-1".to_string(), 1.0)]);
    let mut assignments = HashMap::from([("exec-1".to_string(), strings(&["s1"]))]);

    let (steals, updated) = redistribute_to_empty_executors(NOW, &loads, &stats, &mut assignments);

    assert!(steals.is_empty());
    assert_eq!(updated, loads);
    assert_eq!(assignments["exec-1"], strings(&["s1"]));
}

#[test]
fn redistribute_with_all_donors_cooling_down_changes_nothing() {
    let stats = HashMap::from([
        ("s1".to_string(), metrics(5.0, NOW)),
        ("s2".to_string(), metrics(2.0, NOW - 30)),
    ]);
    let loads = HashMap::from([("exec-1".to_string(), 7.0), ("exec-2".to_string(), 0.0)]);
    let mut assignments = HashMap::from([
        ("exec-1".to_string(), strings(&["s1", "s2"])),
        ("exec-2".to_string(), Vec::new()),
    ]);

    let (steals, updated) = redistribute_to_empty_executors(NOW, &loads, &stats, &mut assignments);

    assert!(steals.is_empty());
    assert_eq!(updated, loads);
}

#[test]
fn shard_without_metrics_has_never_moved_and_is_eligible() {
    let stats = HashMap::new();
    let loads = HashMap::from([("exec-1".to_string(), 0.0), ("exec-2".to_string(), 0.0)]);
    let mut assignments = HashMap::from([
        ("exec-1".to_string(), strings(&["s1"])),
        ("exec-2".to_string(), Vec::new()),
    ]);

    let (steals, _) = redistribute_to_empty_executors(NOW, &loads, &stats, &mut assignments);

    assert_eq!(steals["exec-2"], strings(&["s1"]));
}

#[test]
fn executor_loads_sum_smoothed_values() {
    let stats = HashMap::from([
        ("s1".to_string(), metrics(2.0, 0)),
        ("s2".to_string(), metrics(3.5, 0)),
    ]);
    let assignments = HashMap::from([
        ("exec-1".to_string(), strings(&["s1", "s2"])),
        ("exec-2".to_string(), Vec::new()),
    ]);

    let loads = compute_executor_loads(&assignments, &stats);

    assert!((loads["exec-1"] - 5.5).abs() < 1e-9);
    assert_eq!(loads["exec-2"], 0.0);
}

#[test]
fn arithmetic_hazards_weigh_zero() {
    assert_eq!(safe_load(f64::NAN), 0.0);
    assert_eq!(safe_load(f64::INFINITY), 0.0);
    assert_eq!(safe_load(f64::NEG_INFINITY), 0.0);
    assert_eq!(safe_load(2.5), 2.5);

    let stats = HashMap::from([("s1".to_string(), metrics(f64::NAN, 0))]);
    assert_eq!(shard_load(&stats, "s1"), 0.0);
    assert_eq!(shard_load(&stats, "missing"), 0.0);

    let assignments = HashMap::from([("exec-1".to_string(), strings(&["s1"]))]);
    let loads = compute_executor_loads(&assignments, &stats);
    assert_eq!(loads["exec-1"], 0.0);
}
