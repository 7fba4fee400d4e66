use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Error while loading or parsing a config file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config io error: {err}"),
            ConfigError::Parse(err) => write!(f, "config parse error: {err}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Top-level simulator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfig {
    /// Optional RNG seed for deterministic output.
    pub seed: Option<u64>,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    /// Entity pools sampled for context keys. Built-in pools are used when empty.
    #[serde(default)]
    pub entities: Vec<EntityPoolConfig>,
    #[serde(default)]
    pub population: PopulationConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl SimConfig {
    /// Loads a config file from TOML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: SimConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.clock.speed_up.is_finite() || self.clock.speed_up <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "clock.speed_up must be > 0, got {}",
                self.clock.speed_up
            )));
        }
        let rate = self.run.obfuscation_rate;
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::Invalid(format!(
                "run.obfuscation_rate must be between 0.0 and 1.0, got {rate}"
            )));
        }
        let rate = self.output.error_rate;
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::Invalid(format!(
                "output.error_rate must be between 0.0 and 1.0, got {rate}"
            )));
        }
        if self.run.quiet_hours.start > 23 || self.run.quiet_hours.end > 24 {
            return Err(ConfigError::Invalid(
                "run.quiet_hours must use hours 0-24".to_string(),
            ));
        }
        for entry in &self.schedule.role {
            if entry.start_hour > 23 || entry.end_hour > 24 {
                return Err(ConfigError::Invalid(format!(
                    "schedule.role {} hours must be 0-24",
                    entry.name
                )));
            }
            let p = entry.overtime_probability;
            if !p.is_finite() || !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Invalid(format!(
                    "schedule.role {} overtime_probability must be between 0.0 and 1.0",
                    entry.name
                )));
            }
        }
        for pool in &self.entities {
            if pool.key.trim().is_empty() {
                return Err(ConfigError::Invalid("entities.key must be non-empty".to_string()));
            }
            if pool.count == 0 {
                return Err(ConfigError::Invalid(format!(
                    "entities.{} count must be > 0",
                    pool.key
                )));
            }
        }
        Ok(())
    }
}

/// Controls the virtual clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Optional start time for the simulated clock (RFC3339).
    pub start_time: Option<String>,
    /// Simulated seconds per real second.
    #[serde(default = "default_speed_up")]
    pub speed_up: f64,
    /// Optional IANA timezone used for local hour and weekday.
    pub timezone: Option<String>,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            start_time: None,
            speed_up: default_speed_up(),
            timezone: None,
        }
    }
}

/// Worker pool and pacing settings for real-time runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Wall-clock budget; runs until stopped when absent.
    pub max_seconds: Option<u64>,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default)]
    pub quiet_hours: HourWindow,
    /// Real milliseconds a worker idles during quiet hours before re-checking.
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
    #[serde(default)]
    pub think: ThinkTimeConfig,
    /// Probability that a malicious query is obfuscated before tagging.
    #[serde(default = "default_obfuscation_rate")]
    pub obfuscation_rate: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_seconds: None,
            progress_interval_ms: default_progress_interval_ms(),
            quiet_hours: HourWindow::default(),
            idle_ms: default_idle_ms(),
            think: ThinkTimeConfig::default(),
            obfuscation_rate: default_obfuscation_rate(),
        }
    }
}

/// Half-open local hour window `[start, end)`; wraps past midnight when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u8,
    pub end: u8,
}

impl Default for HourWindow {
    fn default() -> Self {
        Self { start: 1, end: 5 }
    }
}

impl HourWindow {
    pub fn contains(&self, hour: u8) -> bool {
        if self.start == self.end {
            return false;
        }
        if self.start < self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Pareto think-time parameters, in simulated seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThinkTimeConfig {
    pub min_secs: f64,
    pub mode_secs: f64,
    pub alpha: f64,
}

impl Default for ThinkTimeConfig {
    fn default() -> Self {
        Self {
            min_secs: 2.0,
            mode_secs: 15.0,
            alpha: 1.5,
        }
    }
}

/// Behavior table source and sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    /// Optional path to a TOML behavior file; the built-in catalog is used otherwise.
    pub path: Option<String>,
    #[serde(default = "default_zipf_alpha")]
    pub zipf_alpha: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            path: None,
            zipf_alpha: default_zipf_alpha(),
        }
    }
}

/// Candidate ids for one context key, hottest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityPoolConfig {
    pub key: String,
    pub count: u64,
    #[serde(default = "default_first_id")]
    pub first_id: u64,
}

/// Agent population settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    #[serde(default = "default_roles")]
    pub role: Vec<RoleCount>,
    /// Markov-driven agents of a legitimate role running in malicious mode.
    #[serde(default)]
    pub insiders: usize,
    /// Scripted attacker agents.
    #[serde(default = "default_attackers")]
    pub attackers: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            role: default_roles(),
            insiders: 0,
            attackers: default_attackers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleCount {
    pub name: String,
    pub count: usize,
}

/// Scheduler working-hours policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Lets agents work on weekends (used by scenarios that need it).
    #[serde(default)]
    pub weekend_override: bool,
    /// Per-role overrides of the built-in working hours.
    #[serde(default)]
    pub role: Vec<RoleHoursConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleHoursConfig {
    pub name: String,
    pub start_hour: u8,
    pub end_hour: u8,
    #[serde(default)]
    pub overtime_probability: f64,
    #[serde(default)]
    pub overtime_hours: u8,
}

/// Output sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory for generated files.
    #[serde(default = "default_output_dir")]
    pub dir: String,
    /// Optional compression (`gzip`).
    pub compression: Option<String>,
    /// Target file size before a new file is started.
    #[serde(default = "default_target_size_mb")]
    pub target_size_mb: u64,
    /// Probability that the sink reports a query as failed.
    #[serde(default)]
    pub error_rate: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            compression: None,
            target_size_mb: default_target_size_mb(),
            error_rate: 0.0,
        }
    }
}

fn default_speed_up() -> f64 {
    60.0
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_idle_ms() -> u64 {
    250
}

fn default_obfuscation_rate() -> f64 {
    0.5
}

fn default_zipf_alpha() -> f64 {
    1.2
}

fn default_first_id() -> u64 {
    1
}

fn default_attackers() -> usize {
    1
}

fn default_roles() -> Vec<RoleCount> {
    [("sales", 4), ("hr", 2), ("developer", 3), ("admin", 1)]
        .into_iter()
        .map(|(name, count)| RoleCount {
            name: name.to_string(),
            count,
        })
        .collect()
}

fn default_output_dir() -> String {
    "out".to_string()
}

fn default_target_size_mb() -> u64 {
    16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: SimConfig = toml::from_str("seed = 7").expect("config");
        config.validate().expect("valid");
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.clock.speed_up, 60.0);
        assert_eq!(config.behavior.zipf_alpha, 1.2);
        assert_eq!(config.population.attackers, 1);
        assert!(config.population.role.iter().any(|role| role.name == "sales"));
    }

    #[test]
    fn rejects_zero_speed_up() {
        let config: SimConfig = toml::from_str("[clock]\nspeed_up = 0.0").expect("config");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn hour_window_wraps_midnight() {
        let window = HourWindow { start: 22, end: 3 };
        assert!(window.contains(23));
        assert!(window.contains(0));
        assert!(!window.contains(3));
        assert!(!window.contains(12));
    }
}
