//! Synthetic-load shard processor
//!
//! Canary processor that reports a deterministic synthetic load. With the
//! knobs disabled every shard weighs a constant 1.0; enabling hot-set
//! rotation marks a hash-chosen fraction of shards hot for each time
//! bucket and multiplies their load.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use envconfig::Envconfig;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::info;

use crate::clock::TimeSource;
use crate::store::{ShardStatus, ShardStatusReport};

use super::ShardProcessor;

const PROCESS_INTERVAL: Duration = Duration::from_secs(10);

/// Knobs for the synthetic load model.
///
/// Parsed from the environment by the launcher; the processors themselves
/// take the struct as an argument and never read globals.
#[derive(Envconfig, Debug, Clone)]
pub struct SyntheticLoadConfig {
    /// Fraction of shards marked hot per rotation bucket. 0 disables.
    #[envconfig(from = "HOT_FRACTION", default = "0")]
    pub hot_fraction: f64,
    /// Load multiplier applied to hot shards.
    #[envconfig(from = "HOT_MULTIPLIER", default = "8.0")]
    pub hot_multiplier: f64,
    /// Bucket length for rotating the hot set, in seconds. 0 disables.
    #[envconfig(from = "HOT_ROTATE_SECONDS", default = "0")]
    pub hot_rotate_seconds: i64,
    /// Multiplicative noise envelope for non-hot shards.
    #[envconfig(from = "LOAD_NOISE_PCT", default = "0")]
    pub load_noise_pct: f64,
    /// Per-process scaling to emulate heterogeneous capacity.
    #[envconfig(from = "EXEC_LOAD_SCALE", default = "1.0")]
    pub exec_load_scale: f64,
}

impl Default for SyntheticLoadConfig {
    fn default() -> Self {
        Self {
            hot_fraction: 0.0,
            hot_multiplier: 8.0,
            hot_rotate_seconds: 0,
            load_noise_pct: 0.0,
            exec_load_scale: 1.0,
        }
    }
}

/// Shard processor reporting synthetic load.
pub struct SimulatedShardProcessor {
    shard_id: String,
    time_source: Arc<dyn TimeSource>,
    config: SyntheticLoadConfig,
    steps: Arc<AtomicU64>,
    stop: broadcast::Sender<()>,
}

impl SimulatedShardProcessor {
    pub fn new(
        shard_id: impl Into<String>,
        time_source: Arc<dyn TimeSource>,
        config: SyntheticLoadConfig,
    ) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            shard_id: shard_id.into(),
            time_source,
            config,
            steps: Arc::new(AtomicU64::new(0)),
            stop,
        }
    }
}

impl ShardProcessor for SimulatedShardProcessor {
    fn shard_report(&self) -> ShardStatusReport {
        ShardStatusReport {
            status: ShardStatus::Ready,
            shard_load: synthetic_load(&self.config, &self.shard_id, self.time_source.now()),
        }
    }

    fn start(&self) {
        info!("starting shard processor for {}", self.shard_id);
        let shard_id = self.shard_id.clone();
        let steps = self.steps.clone();
        let mut stop = self.stop.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(PROCESS_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let count = steps.fetch_add(1, Ordering::Relaxed) + 1;
                        info!("processing shard {}: steps={}", shard_id, count);
                    }
                    _ = stop.recv() => return,
                }
            }
        });
    }

    fn stop(&self) {
        info!("stopping shard processor for {}", self.shard_id);
        let _ = self.stop.send(());
    }
}

/// Factory producing [`SimulatedShardProcessor`]s with a shared config.
pub struct SimulatedProcessorFactory {
    time_source: Arc<dyn TimeSource>,
    config: SyntheticLoadConfig,
}

impl SimulatedProcessorFactory {
    pub fn new(time_source: Arc<dyn TimeSource>, config: SyntheticLoadConfig) -> Self {
        Self {
            time_source,
            config,
        }
    }
}

impl super::ShardProcessorFactory for SimulatedProcessorFactory {
    fn new_processor(&self, shard_id: &str) -> Arc<dyn ShardProcessor> {
        Arc::new(SimulatedShardProcessor::new(
            shard_id,
            self.time_source.clone(),
            self.config.clone(),
        ))
    }
}

/// Synthetic load for a shard at a point in time.
///
/// Hot membership is decided by hashing `shard:bucket`, so every process
/// agrees on the hot set for a bucket without coordination.
pub fn synthetic_load(config: &SyntheticLoadConfig, shard_id: &str, now: DateTime<Utc>) -> f64 {
    if config.hot_fraction <= 0.0 || config.hot_rotate_seconds <= 0 {
        return 1.0 * config.exec_load_scale;
    }

    let bucket = now.timestamp() / config.hot_rotate_seconds;
    let hot = hash_unit(&[shard_id.as_bytes(), b":", bucket.to_string().as_bytes()])
        < config.hot_fraction;
    let mut base = if hot { config.hot_multiplier } else { 1.0 };

    if config.load_noise_pct > 0.0 {
        let jitter =
            hash_unit(&[shard_id.as_bytes(), b"#", bucket.to_string().as_bytes()]) - 0.5;
        base *= 1.0 + 2.0 * config.load_noise_pct * jitter;
    }

    base.max(0.0) * config.exec_load_scale
}

/// FNV-1a hash of the concatenated parts, mapped to [0, 1).
pub(crate) fn hash_unit(parts: &[&[u8]]) -> f64 {
    let mut hash: u32 = 0x811c_9dc5;
    for part in parts {
        for byte in *part {
            hash ^= u32::from(*byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
    }
    f64::from(hash) / f64::from(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn disabled_knobs_give_constant_load() {
        let config = SyntheticLoadConfig::default();
        assert_eq!(synthetic_load(&config, "shard-1", at(0)), 1.0);
        assert_eq!(synthetic_load(&config, "shard-2", at(999)), 1.0);
    }

    #[test]
    fn exec_scale_multiplies_constant_load() {
        let config = SyntheticLoadConfig {
            exec_load_scale: 2.5,
            ..Default::default()
        };
        assert_eq!(synthetic_load(&config, "shard-1", at(0)), 2.5);
    }

    #[test]
    fn full_hot_fraction_marks_everything_hot() {
        let config = SyntheticLoadConfig {
            hot_fraction: 1.0,
            hot_multiplier: 8.0,
            hot_rotate_seconds: 60,
            ..Default::default()
        };
        assert_eq!(synthetic_load(&config, "shard-1", at(0)), 8.0);
    }

    #[test]
    fn load_is_deterministic_within_a_bucket() {
        let config = SyntheticLoadConfig {
            hot_fraction: 0.3,
            hot_rotate_seconds: 60,
            load_noise_pct: 0.1,
            ..Default::default()
        };
        let a = synthetic_load(&config, "shard-7", at(10));
        let b = synthetic_load(&config, "shard-7", at(59));
        assert_eq!(a, b);
    }

    #[test]
    fn noise_stays_within_envelope() {
        let config = SyntheticLoadConfig {
            hot_fraction: 0.0001,
            hot_rotate_seconds: 60,
            load_noise_pct: 0.1,
            ..Default::default()
        };
        for shard in 0..100 {
            let load = synthetic_load(&config, &format!("shard-{shard}"), at(30));
            assert!(load >= 0.0);
            assert!((0.9..=8.8).contains(&load), "load {load} outside envelope");
        }
    }

    #[test]
    fn hash_unit_is_in_unit_interval() {
        for shard in 0..1000 {
            let value = hash_unit(&[format!("shard-{shard}").as_bytes()]);
            assert!((0.0..1.0).contains(&value));
        }
    }
}
