use std::{env, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use comms::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigErr,
    policy::{ClosingRule, LatencyAware, LatencyTracker, StragglerPolicy},
};

/// Names the JSON file to load the configuration from.
pub const CONFIG_VAR: &str = "HETSYNC_CONFIG";
/// Overrides the closing rule, `naive`, `barrier` or `latency_aware`.
pub const POLICY_VAR: &str = "HETSYNC_POLICY";

const DEFAULT_BASE_ROUND_BUDGET_MS: u64 = 2000;
const DEFAULT_PERCENTILE: f64 = 0.75;

/// Configured closing rule of the `StragglerPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySpec {
    Barrier,
    LatencyAware {
        #[serde(default = "default_base_round_budget_ms")]
        base_round_budget_ms: u64,
        #[serde(default = "default_percentile")]
        percentile: f64,
        /// Defaults to the base budget.
        #[serde(default)]
        grace_ms: Option<u64>,
    },
}

impl Default for PolicySpec {
    fn default() -> Self {
        PolicySpec::LatencyAware {
            base_round_budget_ms: DEFAULT_BASE_ROUND_BUDGET_MS,
            percentile: DEFAULT_PERCENTILE,
            grace_ms: None,
        }
    }
}

fn default_base_round_budget_ms() -> u64 {
    DEFAULT_BASE_ROUND_BUDGET_MS
}

fn default_percentile() -> f64 {
    DEFAULT_PERCENTILE
}

/// Configured parameters of the `LatencyTracker`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencySpec {
    pub ewma_alpha: f64,
    pub initial_estimate_ms: u64,
}

impl Default for LatencySpec {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.3,
            initial_estimate_ms: 0,
        }
    }
}

/// Everything the coordinator binary needs to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    pub dimension: usize,
    pub min_workers: usize,
    pub policy: PolicySpec,
    pub latency: LatencySpec,
    pub max_malformed: usize,
    pub max_frame_len: usize,
    pub telemetry_csv: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9999,
            dimension: 10,
            min_workers: 1,
            policy: PolicySpec::default(),
            latency: LatencySpec::default(),
            max_malformed: 3,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            telemetry_csv: None,
        }
    }
}

impl CoordinatorConfig {
    /// Loads the configuration from the file named by `HETSYNC_CONFIG`, the
    /// environment and the binary's first argument, in that order.
    ///
    /// # Arguments
    /// * `mode` - The first command line argument, `naive` selects the barrier rule.
    ///
    /// # Errors
    /// Returns a `ConfigErr` if a source can't be read or the result is invalid.
    pub fn load(mode: Option<&str>) -> Result<Self, ConfigErr> {
        let mut config = match env::var(CONFIG_VAR) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        config.apply_overrides(|key| env::var(key).ok())?;

        if let Some(mode) = mode {
            config.policy = config.parse_policy("argv[1]", mode)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file, missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigErr> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Applies the `HOST`, `PORT` and `HETSYNC_POLICY` overrides found through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigErr>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("PORT") {
            self.port = parse_env("PORT", port)?;
        }

        if let Some(policy) = lookup(POLICY_VAR) {
            self.policy = self.parse_policy(POLICY_VAR, &policy)?;
        }

        Ok(())
    }

    fn parse_policy(&self, key: &'static str, value: &str) -> Result<PolicySpec, ConfigErr> {
        match value {
            "naive" | "barrier" => Ok(PolicySpec::Barrier),
            "latency_aware" => match self.policy {
                PolicySpec::Barrier => Ok(PolicySpec::default()),
                spec => Ok(spec),
            },
            _ => Err(ConfigErr::Env {
                key,
                value: value.to_string(),
            }),
        }
    }

    /// Checks the invariants every other component relies on.
    pub fn validate(&self) -> Result<(), ConfigErr> {
        if self.dimension == 0 {
            return Err(ConfigErr::Invalid("dimension must be positive".into()));
        }

        if self.min_workers == 0 {
            return Err(ConfigErr::Invalid("min_workers must be positive".into()));
        }

        if self.max_malformed == 0 {
            return Err(ConfigErr::Invalid("max_malformed must be positive".into()));
        }

        let alpha = self.latency.ewma_alpha;
        if !(alpha > 0. && alpha <= 1.) {
            return Err(ConfigErr::Invalid(format!(
                "ewma_alpha must be in (0, 1], got {alpha}"
            )));
        }

        if let PolicySpec::LatencyAware { percentile, .. } = self.policy {
            if !(percentile > 0. && percentile <= 1.) {
                return Err(ConfigErr::Invalid(format!(
                    "percentile must be in (0, 1], got {percentile}"
                )));
            }
        }

        Ok(())
    }

    /// The address to listen on.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the straggler policy this configuration describes.
    pub fn straggler_policy(&self) -> StragglerPolicy {
        let rule = match self.policy {
            PolicySpec::Barrier => ClosingRule::Barrier,
            PolicySpec::LatencyAware {
                base_round_budget_ms,
                percentile,
                grace_ms,
            } => ClosingRule::LatencyAware(LatencyAware {
                base_round_budget: Duration::from_millis(base_round_budget_ms),
                percentile,
                grace: Duration::from_millis(grace_ms.unwrap_or(base_round_budget_ms)),
            }),
        };

        let initial = Duration::from_millis(self.latency.initial_estimate_ms);
        StragglerPolicy::new(rule, LatencyTracker::new(self.latency.ewma_alpha, initial))
    }
}

fn parse_env<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigErr> {
    value.parse().map_err(|_| ConfigErr::Env { key, value })
}
