#![forbid(unsafe_code)]

//! Per-command execution context and configuration.
//!
//! A [`CommandContext`] lives exactly as long as one command execution. It is
//! threaded by `&mut` through every step and the pattern matcher; nothing in
//! the pipeline reaches for process-wide state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::query::gateway::{Gateway, Record};
use crate::query::planner::PlannerConfig;
use crate::query::value::Value;
use crate::types::{PenumbraError, RecordId, Result};

/// Named command parameters. Positional parameters use their index as name.
pub type Params = BTreeMap<String, Value>;

const DEFAULT_MAX_HEAP_ELEMENTS: usize = 500_000;
const DEFAULT_PREFETCH_THRESHOLD: u64 = 100;
const DEFAULT_RECORD_CACHE: usize = 4096;

/// Tunables applied to every command run by an executor.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Cap on rows buffered by a materialising operator; `None` disables it.
    pub max_heap_elements: Option<usize>,
    /// Per-command deadline; a statement timeout takes precedence.
    pub timeout: Option<Duration>,
    /// Collect per-step row counts and timings.
    pub profiling: bool,
    /// MATCH entry points estimated below this size are materialised once.
    pub prefetch_threshold: u64,
    /// Records cached by the pattern matcher.
    pub record_cache_capacity: usize,
    /// Rule switches applied to every plan built for this executor.
    pub planner: PlannerConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_heap_elements: Some(DEFAULT_MAX_HEAP_ELEMENTS),
            timeout: None,
            profiling: false,
            prefetch_threshold: DEFAULT_PREFETCH_THRESHOLD,
            record_cache_capacity: DEFAULT_RECORD_CACHE,
            planner: PlannerConfig::default(),
        }
    }
}

impl ExecutionConfig {
    /// Defaults overridden by `PENUMBRA_QUERY_MAX_HEAP_ELEMENTS`,
    /// `PENUMBRA_QUERY_TIMEOUT_MS` and `PENUMBRA_PROFILE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(limit) = env_number("PENUMBRA_QUERY_MAX_HEAP_ELEMENTS") {
            config.max_heap_elements = (limit > 0).then_some(limit as usize);
        }
        if let Some(ms) = env_number("PENUMBRA_QUERY_TIMEOUT_MS") {
            config.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        config.profiling = std::env::var_os("PENUMBRA_PROFILE").is_some();
        config
    }

    pub fn with_max_heap_elements(mut self, limit: Option<usize>) -> Self {
        self.max_heap_elements = limit;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }

    pub fn with_prefetch_threshold(mut self, threshold: u64) -> Self {
        self.prefetch_threshold = threshold;
        self
    }

    pub fn with_planner(mut self, planner: PlannerConfig) -> Self {
        self.planner = planner;
        self
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric configuration value");
            None
        }
    }
}

/// Mutable state shared by all steps of one command execution.
pub struct CommandContext {
    gateway: Arc<dyn Gateway>,
    params: Arc<Params>,
    variables: BTreeMap<String, Value>,
    config: ExecutionConfig,
    started: Instant,
    timeout: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
}

impl CommandContext {
    pub fn new(gateway: Arc<dyn Gateway>, params: Params, config: ExecutionConfig) -> Self {
        let timeout = config.timeout;
        Self {
            gateway,
            params: Arc::new(params),
            variables: BTreeMap::new(),
            config,
            started: Instant::now(),
            timeout,
            cancel: None,
        }
    }

    /// Attaches a token that aborts the command when set.
    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Overrides the deadline, measured from the start of the command.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Nested scope for sub-queries: same gateway, parameters and deadline,
    /// a copy of the current variables.
    pub fn child(&self) -> CommandContext {
        CommandContext {
            gateway: Arc::clone(&self.gateway),
            params: Arc::clone(&self.params),
            variables: self.variables.clone(),
            config: self.config.clone(),
            started: self.started,
            timeout: self.timeout,
            cancel: self.cancel.clone(),
        }
    }

    pub fn gateway(&self) -> &dyn Gateway {
        &*self.gateway
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn param(&self, name: &str) -> Result<Value> {
        self.params
            .get(name)
            .cloned()
            .ok_or_else(|| PenumbraError::NotFound(format!("parameter '{name}'")))
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn fetch(&self, id: RecordId) -> Result<Option<Record>> {
        self.gateway.fetch(id)
    }

    /// Fails with `Cancelled` or `Timeout` once the command must stop.
    pub fn check_interrupt(&self) -> Result<()> {
        if let Some(token) = &self.cancel {
            if token.load(Ordering::Relaxed) {
                return Err(PenumbraError::Cancelled);
            }
        }
        if let Some(timeout) = self.timeout {
            if self.started.elapsed() >= timeout {
                return Err(PenumbraError::Timeout {
                    timeout_ms: timeout.as_millis().min(u64::MAX as u128) as u64,
                });
            }
        }
        Ok(())
    }

    /// Fails once a materialising operator holds more than the configured cap.
    pub fn ensure_heap(&self, operator: &'static str, buffered: usize) -> Result<()> {
        match self.config.max_heap_elements {
            Some(limit) if buffered > limit => {
                Err(PenumbraError::ResourceLimitExceeded { operator, limit })
            }
            _ => Ok(()),
        }
    }

    /// Mutations only run inside a caller-provided transaction.
    pub fn require_transaction(&self, operation: &str) -> Result<()> {
        if self.gateway.in_transaction() {
            Ok(())
        } else {
            Err(PenumbraError::CommandExecution(format!(
                "{operation} requires an active transaction"
            )))
        }
    }
}
