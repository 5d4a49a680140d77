use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the interest-report agent.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    /// Kafka connection configuration.
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// Message drain configuration.
    #[serde(default)]
    pub drain: DrainConfig,

    /// Report rendering configuration.
    #[serde(default)]
    pub report: ReportConfig,

    /// Pipeline cadence configuration.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Kafka connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Broker endpoints (host:port). Default: ["localhost:9092"].
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,

    /// Consumer group used for subscriptions. Default: "interest-report".
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Timeout for the topic metadata request. Default: 5s.
    #[serde(default = "default_metadata_timeout", with = "humantime_serde")]
    pub metadata_timeout: Duration,

    /// Include broker-internal topics (`__*`) in discovery. Default: false.
    #[serde(default)]
    pub include_internal_topics: bool,
}

/// Whether a drain commits the offsets it consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetPolicy {
    /// Never commit. Every run re-reads the retained history.
    #[default]
    Replay,
    /// Commit at the end of each drain. Runs see only new activity.
    Commit,
}

/// Message drain configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DrainConfig {
    /// Wall-clock window for collecting messages. Default: 10s.
    #[serde(default = "default_drain_window", with = "humantime_serde")]
    pub window: Duration,

    /// Upper bound for a single poll call. Default: 1s.
    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// Offset commit policy. Default: replay.
    #[serde(default)]
    pub offset_policy: OffsetPolicy,
}

/// Report rendering configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Output PDF path. Default: "raport.pdf".
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// TTF font used for chart and document text. Default: "DejaVuSans.ttf".
    #[serde(default = "default_font_path")]
    pub font_path: PathBuf,

    /// Directory for transient chart images. Default: ".".
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Document title.
    #[serde(default = "default_title")]
    pub title: String,

    /// Services never given a demographic section. Default: ["home"].
    #[serde(default = "default_reserved_services")]
    pub reserved_services: Vec<String>,

    /// Maximum distinct values per topic before it is dropped (0 = unlimited). Default: 0.
    #[serde(default = "default_max_distinct_values")]
    pub max_distinct_values: usize,
}

/// Pipeline cadence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Pause between pipeline runs. Default: 60s.
    #[serde(default = "default_schedule_interval", with = "humantime_serde")]
    pub interval: Duration,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Serve /metrics and /healthz. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_group_id() -> String {
    "interest-report".to_string()
}

fn default_metadata_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_drain_window() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_output_path() -> PathBuf {
    PathBuf::from("raport.pdf")
}

fn default_font_path() -> PathBuf {
    PathBuf::from("DejaVuSans.ttf")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_title() -> String {
    "Report on interest in individual web services".to_string()
}

fn default_reserved_services() -> Vec<String> {
    vec!["home".to_string()]
}

fn default_max_distinct_values() -> usize {
    0
}

fn default_schedule_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            group_id: default_group_id(),
            metadata_timeout: default_metadata_timeout(),
            include_internal_topics: false,
        }
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            window: default_drain_window(),
            poll_timeout: default_poll_timeout(),
            offset_policy: OffsetPolicy::default(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            font_path: default_font_path(),
            scratch_dir: default_scratch_dir(),
            title: default_title(),
            reserved_services: default_reserved_services(),
            max_distinct_values: default_max_distinct_values(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: default_schedule_interval(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.kafka.brokers.is_empty() {
            bail!("kafka.brokers must list at least one broker");
        }

        if self.kafka.brokers.iter().any(|b| b.trim().is_empty()) {
            bail!("kafka.brokers must not contain empty entries");
        }

        if self.kafka.group_id.is_empty() {
            bail!("kafka.group_id is required");
        }

        if self.drain.window.is_zero() {
            bail!("drain.window must be positive");
        }

        if self.drain.poll_timeout.is_zero() {
            bail!("drain.poll_timeout must be positive");
        }

        if self.drain.poll_timeout > self.drain.window {
            bail!(
                "drain.poll_timeout {:?} must not exceed drain.window {:?}",
                self.drain.poll_timeout,
                self.drain.window
            );
        }

        if self.schedule.interval.is_zero() {
            bail!("schedule.interval must be positive");
        }

        if self.report.output_path.as_os_str().is_empty() {
            bail!("report.output_path is required");
        }

        if self.report.font_path.as_os_str().is_empty() {
            bail!("report.font_path is required");
        }

        if self.health.enabled && self.health.addr.is_empty() {
            bail!("health.addr is required when health is enabled");
        }

        Ok(())
    }
}

impl KafkaConfig {
    /// Comma-joined broker list in `bootstrap.servers` form.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}
