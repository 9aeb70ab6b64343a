//! Process-wide configuration, loaded once at startup from environment
//! variables and treated as immutable afterwards.
//!
//! Unparseable values fall back to their defaults rather than aborting —
//! a misspelled `LSH_SEED` should not take the database down.

use std::path::PathBuf;

use crate::index::{IndexKind, Metric};

/// LSH hyperplane configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LshSettings {
    /// Signature bits per table. Capped at 64 (signatures are `u64`).
    pub num_planes: usize,
    /// Number of independent hash tables.
    pub num_tables: usize,
    /// Seed for the plane generator; fixed so rebuilds are reproducible.
    pub seed: u64,
}

impl Default for LshSettings {
    fn default() -> Self {
        Self {
            num_planes: 16,
            num_tables: 4,
            seed: 42,
        }
    }
}

/// Application settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory snapshot files are written to.
    pub data_dir: PathBuf,
    /// Metric used by the lazy fallback index and reported for unbuilt
    /// libraries.
    pub default_metric: Metric,
    /// Algorithm reported as the process default.
    pub default_index: IndexKind,
    pub lsh: LshSettings,
    /// `tracing` filter directive, e.g. `info` or `quiver=debug`.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            default_metric: Metric::Cosine,
            default_index: IndexKind::Linear,
            lsh: LshSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// Recognised variables: `DATA_DIR`, `DEFAULT_METRIC`, `DEFAULT_INDEX`,
    /// `LSH_NUM_PLANES`, `LSH_NUM_TABLES`, `LSH_SEED`, `LOG_LEVEL`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Settings::default();
        let lsh_defaults = defaults.lsh;

        Self {
            data_dir: get("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            default_metric: get("DEFAULT_METRIC")
                .and_then(|v| Metric::parse(&v))
                .unwrap_or(defaults.default_metric),
            default_index: get("DEFAULT_INDEX")
                .and_then(|v| IndexKind::parse(&v))
                .unwrap_or(defaults.default_index),
            lsh: LshSettings {
                num_planes: get("LSH_NUM_PLANES")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(lsh_defaults.num_planes),
                num_tables: get("LSH_NUM_TABLES")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(lsh_defaults.num_tables),
                seed: get("LSH_SEED")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(lsh_defaults.seed),
            },
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }
}

/// Install a global `tracing` subscriber honoring the configured level.
///
/// Idempotent: a second call (e.g. from another test) is a no-op.
pub fn init_logging(settings: &Settings) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
