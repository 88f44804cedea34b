//! Engine configuration.
//!
//! Defaults are production values; `from_env` overrides them from
//! `LARDER_*` variables and falls back to the default on anything unparsable.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use larder_catalog::AvailabilityPolicy;
use larder_catalog::availability::{DEFAULT_LOW_STOCK_THRESHOLD, UNCONSTRAINED_QUANTITY};

use crate::cache::{CacheLayer, CacheTtls};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub cache_ttls: CacheTtls,
    /// Window in which identical in-flight reads are coalesced.
    pub dedupe_window: Duration,
    pub low_stock_threshold: u32,
    pub unconstrained_quantity: u32,
    /// Stock rows per backend write.
    pub write_chunk_size: usize,
    pub deduction_timeout: Duration,
    pub change_debounce: Duration,
    /// Products per progress report during detailed loading.
    pub progress_step: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttls: CacheTtls::default(),
            dedupe_window: Duration::from_millis(500),
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            unconstrained_quantity: UNCONSTRAINED_QUANTITY,
            write_chunk_size: 50,
            deduction_timeout: Duration::from_secs(30),
            change_debounce: Duration::from_millis(500),
            progress_step: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        for layer in CacheLayer::ALL {
            let key = format!("LARDER_TTL_{}_SECS", layer.env_suffix());
            if let Some(secs) = parse_var::<u64>(&lookup, &key) {
                config.cache_ttls.set(layer, Duration::from_secs(secs));
            }
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LARDER_DEDUPE_WINDOW_MS") {
            config.dedupe_window = Duration::from_millis(ms);
        }
        if let Some(threshold) = parse_var(&lookup, "LARDER_LOW_STOCK_THRESHOLD") {
            config.low_stock_threshold = threshold;
        }
        if let Some(size) = parse_var::<usize>(&lookup, "LARDER_WRITE_CHUNK_SIZE") {
            config.write_chunk_size = size.max(1);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LARDER_DEDUCTION_TIMEOUT_MS") {
            config.deduction_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LARDER_CHANGE_DEBOUNCE_MS") {
            config.change_debounce = Duration::from_millis(ms);
        }
        if let Some(step) = parse_var::<usize>(&lookup, "LARDER_PROGRESS_STEP") {
            config.progress_step = step.max(1);
        }

        config
    }

    pub fn with_cache_ttls(mut self, ttls: CacheTtls) -> Self {
        self.cache_ttls = ttls;
        self
    }

    pub fn with_dedupe_window(mut self, window: Duration) -> Self {
        self.dedupe_window = window;
        self
    }

    pub fn with_low_stock_threshold(mut self, threshold: u32) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    pub fn with_write_chunk_size(mut self, size: usize) -> Self {
        self.write_chunk_size = size.max(1);
        self
    }

    pub fn with_deduction_timeout(mut self, timeout: Duration) -> Self {
        self.deduction_timeout = timeout;
        self
    }

    pub fn with_change_debounce(mut self, debounce: Duration) -> Self {
        self.change_debounce = debounce;
        self
    }

    pub fn with_progress_step(mut self, step: usize) -> Self {
        self.progress_step = step.max(1);
        self
    }

    pub fn availability_policy(&self) -> AvailabilityPolicy {
        AvailabilityPolicy {
            low_stock_threshold: self.low_stock_threshold,
            unconstrained_quantity: self.unconstrained_quantity,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}
