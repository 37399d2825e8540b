//! Ephemeral-shard processor
//!
//! Variant for short-lived shards. Heaviness is decided once per shard
//! lifetime rather than per time window, and each processor eventually
//! reports DONE: with a 1-in-60 chance per second, the average lifetime is
//! about a minute.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use envconfig::Envconfig;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::info;

use crate::clock::TimeSource;
use crate::store::{ShardStatus, ShardStatusReport};

use super::simulated::hash_unit;
use super::ShardProcessor;

const PROCESS_INTERVAL: Duration = Duration::from_secs(10);
const STOP_INTERVAL: Duration = Duration::from_secs(1);
const DONE_CHANCE: u32 = 60;

/// Knobs for the ephemeral load model.
#[derive(Envconfig, Debug, Clone)]
pub struct EphemeralLoadConfig {
    /// Chance a shard is heavy for its whole lifetime.
    #[envconfig(from = "EPH_HEAVY_PROB", default = "0.1")]
    pub heavy_prob: f64,
    /// Load multiplier for heavy shards.
    #[envconfig(from = "EPH_HEAVY_MULTIPLIER", default = "6.0")]
    pub heavy_multiplier: f64,
    /// Multiplicative noise envelope.
    #[envconfig(from = "EPH_LOAD_NOISE_PCT", default = "0.1")]
    pub noise_pct: f64,
    /// Per-process scaling to emulate heterogeneous capacity.
    #[envconfig(from = "EXEC_LOAD_SCALE", default = "1.0")]
    pub exec_load_scale: f64,
}

impl Default for EphemeralLoadConfig {
    fn default() -> Self {
        Self {
            heavy_prob: 0.1,
            heavy_multiplier: 6.0,
            noise_pct: 0.1,
            exec_load_scale: 1.0,
        }
    }
}

/// Shard processor for ephemeral shards.
pub struct EphemeralShardProcessor {
    shard_id: String,
    time_source: Arc<dyn TimeSource>,
    config: EphemeralLoadConfig,
    weight: f64,
    status: Arc<Mutex<ShardStatus>>,
    steps: Arc<AtomicU64>,
    stop: broadcast::Sender<()>,
}

impl EphemeralShardProcessor {
    pub fn new(
        shard_id: impl Into<String>,
        time_source: Arc<dyn TimeSource>,
        config: EphemeralLoadConfig,
    ) -> Self {
        let shard_id = shard_id.into();
        // Lifetime heaviness is decided up front from the shard id, so the
        // same shard weighs the same on whichever executor runs it.
        let mut weight = 1.0;
        if config.heavy_prob > 0.0 && hash_unit(&[shard_id.as_bytes()]) < config.heavy_prob {
            weight = config.heavy_multiplier;
        }
        let (stop, _) = broadcast::channel(1);
        Self {
            shard_id,
            time_source,
            config,
            weight,
            status: Arc::new(Mutex::new(ShardStatus::Ready)),
            steps: Arc::new(AtomicU64::new(0)),
            stop,
        }
    }

    /// Lifetime weight chosen for this shard.
    pub fn weight(&self) -> f64 {
        self.weight
    }
}

impl ShardProcessor for EphemeralShardProcessor {
    fn shard_report(&self) -> ShardStatusReport {
        ShardStatusReport {
            status: *self.status.lock(),
            shard_load: ephemeral_load(
                &self.config,
                &self.shard_id,
                self.weight,
                self.time_source.now(),
            ),
        }
    }

    fn start(&self) {
        info!("starting ephemeral shard processor for {}", self.shard_id);
        let shard_id = self.shard_id.clone();
        let status = self.status.clone();
        let steps = self.steps.clone();
        let mut stop = self.stop.subscribe();
        tokio::spawn(async move {
            let mut process_ticker = interval(PROCESS_INTERVAL);
            let mut stop_ticker = interval(STOP_INTERVAL);
            process_ticker.tick().await;
            stop_ticker.tick().await;
            loop {
                tokio::select! {
                    _ = process_ticker.tick() => {
                        let count = steps.load(Ordering::Relaxed);
                        info!("processing ephemeral shard {}: steps={}", shard_id, count);
                    }
                    _ = stop_ticker.tick() => {
                        steps.fetch_add(1, Ordering::Relaxed);
                        if rand::thread_rng().gen_range(0..DONE_CHANCE) == 0 {
                            info!("ephemeral shard {} done", shard_id);
                            *status.lock() = ShardStatus::Done;
                        }
                    }
                    _ = stop.recv() => return,
                }
            }
        });
    }

    fn stop(&self) {
        info!("stopping ephemeral shard processor for {}", self.shard_id);
        let _ = self.stop.send(());
    }
}

/// Factory producing [`EphemeralShardProcessor`]s with a shared config.
pub struct EphemeralProcessorFactory {
    time_source: Arc<dyn TimeSource>,
    config: EphemeralLoadConfig,
}

impl EphemeralProcessorFactory {
    pub fn new(time_source: Arc<dyn TimeSource>, config: EphemeralLoadConfig) -> Self {
        Self {
            time_source,
            config,
        }
    }
}

impl super::ShardProcessorFactory for EphemeralProcessorFactory {
    fn new_processor(&self, shard_id: &str) -> Arc<dyn ShardProcessor> {
        Arc::new(EphemeralShardProcessor::new(
            shard_id,
            self.time_source.clone(),
            self.config.clone(),
        ))
    }
}

/// Load for an ephemeral shard: lifetime weight plus slow-varying noise.
pub fn ephemeral_load(
    config: &EphemeralLoadConfig,
    shard_id: &str,
    weight: f64,
    now: DateTime<Utc>,
) -> f64 {
    let mut base = weight;
    if config.noise_pct > 0.0 {
        let bucket = now.timestamp() / 10;
        let jitter =
            hash_unit(&[shard_id.as_bytes(), bucket.to_string().as_bytes()]) - 0.5;
        base *= 1.0 + 2.0 * config.noise_pct * jitter;
    }
    base.max(0.0) * config.exec_load_scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn weight_is_deterministic_per_shard() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let config = EphemeralLoadConfig::default();
        let a = EphemeralShardProcessor::new("shard-1", clock.clone(), config.clone());
        let b = EphemeralShardProcessor::new("shard-1", clock, config);
        assert_eq!(a.weight(), b.weight());
    }

    #[test]
    fn zero_heavy_prob_means_unit_weight() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let config = EphemeralLoadConfig {
            heavy_prob: 0.0,
            ..Default::default()
        };
        let processor = EphemeralShardProcessor::new("shard-1", clock, config);
        assert_eq!(processor.weight(), 1.0);
    }

    #[test]
    fn noise_varies_slowly() {
        let config = EphemeralLoadConfig::default();
        let a = ephemeral_load(&config, "shard-1", 1.0, at(0));
        let b = ephemeral_load(&config, "shard-1", 1.0, at(9));
        assert_eq!(a, b, "same 10 s bucket must report the same load");
    }

    #[test]
    fn load_is_non_negative_and_scaled() {
        let config = EphemeralLoadConfig {
            noise_pct: 0.0,
            exec_load_scale: 3.0,
            ..Default::default()
        };
        assert_eq!(ephemeral_load(&config, "shard-1", 6.0, at(0)), 18.0);
    }
}
