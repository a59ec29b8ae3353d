use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Load `.env` from the working directory when present.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Non-empty value of `{PROFILE}_{KEY}`, else of `KEY`.
fn lookup(profile: &str, key: &str) -> Option<String> {
    let prefixed = (!profile.is_empty()).then(|| format!("{}_{}", profile, key));
    let found = prefixed
        .iter()
        .map(String::as_str)
        .chain([key])
        .find_map(|k| env::var(k).ok().filter(|v| !v.is_empty()));
    found
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    lookup(profile, key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    lookup(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `GRAPHSCHED_PROFILE`. When set (e.g. `GAUDI2`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = lookup("", "GRAPHSCHED_PROFILE").unwrap_or_default();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        Self {
            schedule: ScheduleConfig::from_env_profiled(&p),
            profile: p,
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        self.schedule.log_summary();
    }
}

// ── Scheduling ────────────────────────────────────────────────

/// Scheduling algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Bfs,
    Dfs,
    MaxPath,
    #[default]
    Gaudi,
    MemoryOriented,
}

impl std::str::FromStr for Strategy {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "bfs" => Ok(Strategy::Bfs),
            "dfs" => Ok(Strategy::Dfs),
            "max_path" => Ok(Strategy::MaxPath),
            "gaudi" => Ok(Strategy::Gaudi),
            "memory_oriented" => Ok(Strategy::MemoryOriented),
            other => Err(GraphError::Config(format!("unknown strategy '{}'", other))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Bfs => write!(f, "bfs"),
            Strategy::Dfs => write!(f, "dfs"),
            Strategy::MaxPath => write!(f, "max_path"),
            Strategy::Gaudi => write!(f, "gaudi"),
            Strategy::MemoryOriented => write!(f, "memory_oriented"),
        }
    }
}

/// Edge weight used by the max-path metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxPathWeight {
    /// Every edge weighs 1, edges leaving non-debug logical nodes weigh 0.
    #[default]
    Hops,
    /// Byte size of the real connecting tensor.
    TensorBytes,
}

impl std::str::FromStr for MaxPathWeight {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hops" => Ok(MaxPathWeight::Hops),
            "tensor_bytes" | "bytes" => Ok(MaxPathWeight::TensorBytes),
            other => Err(GraphError::Config(format!("unknown max path weight '{}'", other))),
        }
    }
}

/// Scheduler configuration, typically parsed from TOML or the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub strategy: Strategy,
    /// Group unbundled nodes by parent id before falling back to creation id.
    #[serde(default)]
    pub enable_parent_id_schedule: bool,
    /// Let the Gaudi scheduler order unbundled nodes by max path.
    #[serde(default)]
    pub enable_max_path_schedule: bool,
    #[serde(default)]
    pub max_path_weight: MaxPathWeight,
    #[serde(default = "default_true")]
    pub reorder_nan_inf_probes: bool,
    #[serde(default = "default_true")]
    pub optimize_memsets_location: bool,
    #[serde(default)]
    pub enable_flash_attention_ordering: bool,
    /// Graph inputs and outputs live in DRAM staging memory.
    #[serde(default)]
    pub io_in_dram: bool,
}

fn default_true() -> bool { true }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            enable_parent_id_schedule: false,
            enable_max_path_schedule: false,
            max_path_weight: MaxPathWeight::default(),
            reorder_nan_inf_probes: default_true(),
            optimize_memsets_location: default_true(),
            enable_flash_attention_ordering: false,
            io_in_dram: false,
        }
    }
}

impl ScheduleConfig {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            strategy: profiled_env_parse(p, "SCHEDULE_STRATEGY", defaults.strategy),
            enable_parent_id_schedule: profiled_env_bool(
                p,
                "ENABLE_PARENT_ID_SCHEDULE",
                defaults.enable_parent_id_schedule,
            ),
            enable_max_path_schedule: profiled_env_bool(
                p,
                "ENABLE_MAX_PATH_SCHEDULE",
                defaults.enable_max_path_schedule,
            ),
            max_path_weight: profiled_env_parse(p, "MAX_PATH_WEIGHT", defaults.max_path_weight),
            reorder_nan_inf_probes: profiled_env_bool(
                p,
                "REORDER_NAN_INF_PROBES",
                defaults.reorder_nan_inf_probes,
            ),
            optimize_memsets_location: profiled_env_bool(
                p,
                "OPTIMIZE_MEMSETS_LOCATION",
                defaults.optimize_memsets_location,
            ),
            enable_flash_attention_ordering: profiled_env_bool(
                p,
                "ENABLE_FLASH_ATTENTION_ORDERING",
                defaults.enable_flash_attention_ordering,
            ),
            io_in_dram: profiled_env_bool(p, "IO_IN_DRAM", defaults.io_in_dram),
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, GraphError> {
        toml::from_str(s).map_err(|e| GraphError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, GraphError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn log_summary(&self) {
        tracing::info!("  schedule:    strategy={}", self.strategy);
        tracing::info!(
            "  ordering:    parent_id={}, max_path={} ({:?})",
            self.enable_parent_id_schedule,
            self.enable_max_path_schedule,
            self.max_path_weight
        );
        tracing::info!(
            "  post:        nan_inf_probes={}, memsets={}, flash_attention={}, io_in_dram={}",
            self.reorder_nan_inf_probes,
            self.optimize_memsets_location,
            self.enable_flash_attention_ordering,
            self.io_in_dram
        );
    }
}
