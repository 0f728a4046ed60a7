use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::{FailurePolicy, SchedulerConfig};
use crate::{rlog_debug, Error, Result};

const DEFAULT_FALLBACK_DOMAIN: &str = "system_control";

/// Routes a fallback request to `domain` when its text mentions `keyword`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallbackRule {
    pub keyword: String,
    pub domain: String,
}

impl FallbackRule {
    pub fn new(keyword: &str, domain: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            domain: domain.to_string(),
        }
    }

    fn matches(&self, request: &str) -> bool {
        request
            .to_lowercase()
            .contains(&self.keyword.to_lowercase())
    }
}

fn default_fallback_rules() -> Vec<FallbackRule> {
    vec![FallbackRule::new("code", "software_engineer")]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// What happens to the dependents of a failed task.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Per-dispatch timeout; unbounded when unset.
    pub task_timeout_secs: Option<u64>,
    /// Cap on concurrently running dispatches; unbounded when unset.
    pub max_concurrent: Option<usize>,
    /// Domain for the single-task fallback plan when no rule matches.
    pub fallback_domain: Option<String>,
    /// Keyword rules checked in order before `fallback_domain`.
    #[serde(default = "default_fallback_rules")]
    pub fallback_rules: Vec<FallbackRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            task_timeout_secs: None,
            max_concurrent: None,
            fallback_domain: None,
            fallback_rules: default_fallback_rules(),
        }
    }
}

impl Config {
    pub fn relay_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".relay"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::relay_dir()?.join("relay.toml"))
    }

    pub fn effective_fallback_domain(&self) -> &str {
        self.fallback_domain
            .as_deref()
            .unwrap_or(DEFAULT_FALLBACK_DOMAIN)
    }

    /// Domain for running `request` as a single task: the first rule whose
    /// keyword appears in it (case-insensitive), else the fallback domain.
    pub fn fallback_domain_for(&self, request: &str) -> &str {
        self.fallback_rules
            .iter()
            .find(|rule| rule.matches(request))
            .map(|rule| rule.domain.as_str())
            .unwrap_or_else(|| self.effective_fallback_domain())
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            failure_policy: self.failure_policy,
            task_timeout: self.task_timeout(),
            max_concurrent: self.max_concurrent,
        }
    }

    /// Load from ~/.relay/relay.toml, or defaults if it does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        rlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            rlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        rlog_debug!(
            "Config loaded: failure_policy={}, task_timeout_secs={:?}, max_concurrent={:?}",
            config.failure_policy,
            config.task_timeout_secs,
            config.max_concurrent
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                rlog_debug!("Creating config directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        rlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Reject settings a run could never make progress with.
    pub fn validate(&self) -> Result<()> {
        if self.task_timeout_secs == Some(0) {
            return Err(Error::Validation(
                "task_timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(rule) = self.fallback_rules.iter().find(|r| r.keyword.is_empty()) {
            return Err(Error::Validation(format!(
                "fallback rule for '{}' has an empty keyword",
                rule.domain
            )));
        }
        self.scheduler_config().validate()
    }
}
