//! `ZenusConfig`: the concrete, file-backed `ConfigProvider` the CLI
//! front-end hands to `Orchestrator::open_session`. Layered file → env →
//! default, following `ForgeToml`/`ForgeConfig`'s load/validate/layer
//! shape, generalized from `.forge/forge.toml`'s phase-override schema to
//! `~/.zenus/config.yaml`'s flat recognized-option list (§9).

use std::path::PathBuf;

use forge_common::ConfigProvider;
use serde::{Deserialize, Serialize};

fn default_llm_provider() -> String {
    "anthropic".to_string()
}
fn default_llm_model() -> String {
    "claude-sonnet".to_string()
}
fn default_llm_timeout_seconds() -> u64 {
    60
}
fn default_fallback_providers() -> Vec<String> {
    Vec::new()
}
fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}
fn default_circuit_breaker_timeout_seconds() -> u64 {
    60
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_initial_delay_seconds() -> f64 {
    1.0
}
fn default_retry_max_delay_seconds() -> f64 {
    30.0
}
fn default_retry_exponential_base() -> f64 {
    2.0
}
fn default_cache_ttl_seconds() -> i64 {
    3600
}
fn default_cache_max_entries() -> usize {
    500
}
fn default_safety_allowed_paths() -> Vec<String> {
    Vec::new()
}
fn default_planner_worker_pool() -> usize {
    4
}
fn default_goal_loop_max_iterations() -> u32 {
    50
}
fn default_goal_loop_batch_size() -> u32 {
    12
}
fn default_goal_loop_stuck_threshold() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

/// `~/.zenus/config.yaml` shape. Every field has a default so a missing
/// or partial file still produces a usable config, matching
/// `ForgeToml`'s `#[serde(default = ...)]` density.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZenusConfigFile {
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_timeout_seconds")]
    pub llm_timeout_seconds: u64,

    #[serde(default)]
    pub fallback_enabled: bool,
    #[serde(default = "default_fallback_providers")]
    pub fallback_providers: Vec<String>,

    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_circuit_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_seconds")]
    pub retry_initial_delay_seconds: f64,
    #[serde(default = "default_retry_max_delay_seconds")]
    pub retry_max_delay_seconds: f64,
    #[serde(default = "default_retry_exponential_base")]
    pub retry_exponential_base: f64,
    #[serde(default = "default_true")]
    pub retry_jitter: bool,

    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: i64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    #[serde(default)]
    pub safety_sandbox_enabled: bool,
    #[serde(default = "default_safety_allowed_paths")]
    pub safety_allowed_paths: Vec<String>,

    #[serde(default = "default_planner_worker_pool")]
    pub planner_worker_pool: usize,

    #[serde(default = "default_goal_loop_max_iterations")]
    pub goal_loop_max_iterations: u32,
    #[serde(default = "default_goal_loop_batch_size")]
    pub goal_loop_batch_size: u32,
    #[serde(default = "default_goal_loop_stuck_threshold")]
    pub goal_loop_stuck_threshold: u32,
}

impl Default for ZenusConfigFile {
    fn default() -> Self {
        Self {
            llm_provider: default_llm_provider(),
            llm_model: default_llm_model(),
            llm_timeout_seconds: default_llm_timeout_seconds(),
            fallback_enabled: false,
            fallback_providers: default_fallback_providers(),
            circuit_breaker_failure_threshold: default_circuit_breaker_failure_threshold(),
            circuit_breaker_timeout_seconds: default_circuit_breaker_timeout_seconds(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_seconds: default_retry_initial_delay_seconds(),
            retry_max_delay_seconds: default_retry_max_delay_seconds(),
            retry_exponential_base: default_retry_exponential_base(),
            retry_jitter: default_true(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_max_entries: default_cache_max_entries(),
            safety_sandbox_enabled: false,
            safety_allowed_paths: default_safety_allowed_paths(),
            planner_worker_pool: default_planner_worker_pool(),
            goal_loop_max_iterations: default_goal_loop_max_iterations(),
            goal_loop_batch_size: default_goal_loop_batch_size(),
            goal_loop_stuck_threshold: default_goal_loop_stuck_threshold(),
        }
    }
}

impl ZenusConfigFile {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load_or_default(state_root: &std::path::Path) -> anyhow::Result<Self> {
        let path = state_root.join("config.yaml");
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Self::parse(&content)
        } else {
            Ok(Self::default())
        }
    }
}

/// `ConfigProvider` impl the CLI hands to `Orchestrator::open_session`.
/// CLI args (state_root override only, for now) take precedence over the
/// file, matching `ForgeConfig`'s file → env → CLI-arg layering.
pub struct ZenusConfig {
    file: ZenusConfigFile,
    state_root: PathBuf,
}

impl ZenusConfig {
    pub fn load(state_root_override: Option<PathBuf>) -> anyhow::Result<Self> {
        let state_root = state_root_override.unwrap_or_else(default_state_root);
        std::fs::create_dir_all(&state_root)?;
        let file = ZenusConfigFile::load_or_default(&state_root)?;
        Ok(Self { file, state_root })
    }
}

/// `~/.zenus/`, falling back to `./.zenus/` when the home directory can't
/// be resolved (headless/CI environments).
pub fn default_state_root() -> PathBuf {
    dirs::home_dir().map(|h| h.join(".zenus")).unwrap_or_else(|| PathBuf::from(".zenus"))
}

impl ConfigProvider for ZenusConfig {
    fn llm_provider(&self) -> String {
        std::env::var("ZENUS_LLM_PROVIDER").unwrap_or_else(|_| self.file.llm_provider.clone())
    }
    fn llm_model(&self) -> String {
        std::env::var("ZENUS_LLM_MODEL").unwrap_or_else(|_| self.file.llm_model.clone())
    }
    fn llm_timeout_seconds(&self) -> u64 {
        self.file.llm_timeout_seconds
    }

    fn fallback_enabled(&self) -> bool {
        self.file.fallback_enabled
    }
    fn fallback_providers(&self) -> Vec<String> {
        self.file.fallback_providers.clone()
    }

    fn circuit_breaker_failure_threshold(&self) -> u32 {
        self.file.circuit_breaker_failure_threshold
    }
    fn circuit_breaker_timeout_seconds(&self) -> u64 {
        self.file.circuit_breaker_timeout_seconds
    }

    fn retry_max_attempts(&self) -> u32 {
        self.file.retry_max_attempts
    }
    fn retry_initial_delay_seconds(&self) -> f64 {
        self.file.retry_initial_delay_seconds
    }
    fn retry_max_delay_seconds(&self) -> f64 {
        self.file.retry_max_delay_seconds
    }
    fn retry_exponential_base(&self) -> f64 {
        self.file.retry_exponential_base
    }
    fn retry_jitter(&self) -> bool {
        self.file.retry_jitter
    }

    fn cache_ttl_seconds(&self) -> i64 {
        self.file.cache_ttl_seconds
    }
    fn cache_max_entries(&self) -> usize {
        self.file.cache_max_entries
    }

    fn safety_sandbox_enabled(&self) -> bool {
        self.file.safety_sandbox_enabled
    }
    fn safety_allowed_paths(&self) -> Vec<String> {
        self.file.safety_allowed_paths.clone()
    }

    fn planner_worker_pool(&self) -> usize {
        self.file.planner_worker_pool
    }

    fn goal_loop_max_iterations(&self) -> u32 {
        self.file.goal_loop_max_iterations
    }
    fn goal_loop_batch_size(&self) -> u32 {
        self.file.goal_loop_batch_size
    }
    fn goal_loop_stuck_threshold(&self) -> u32 {
        self.file.goal_loop_stuck_threshold
    }

    fn state_root(&self) -> PathBuf {
        self.state_root.clone()
    }
}
