use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::ClientConfig;
use tracing::{debug, warn};

use crate::config::KafkaConfig;
use crate::export::health::HealthMetrics;
use crate::topic::is_internal_topic;

/// Source of the broker's current topic names.
pub trait TopicSource: Send + Sync {
    /// Lists every topic the broker knows about.
    fn list_topics(&self) -> Result<BTreeSet<String>>;
}

/// Topic discovery through a short-lived Kafka metadata request.
pub struct KafkaCatalog {
    cfg: KafkaConfig,
}

impl KafkaCatalog {
    pub fn new(cfg: KafkaConfig) -> Self {
        Self { cfg }
    }

    fn timeout(&self) -> Duration {
        self.cfg.metadata_timeout
    }
}

impl TopicSource for KafkaCatalog {
    fn list_topics(&self) -> Result<BTreeSet<String>> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", self.cfg.bootstrap_servers())
            .set("group.id", &self.cfg.group_id)
            .create()
            .context("creating metadata client")?;

        let metadata = consumer
            .fetch_metadata(None, self.timeout())
            .context("fetching topic metadata")?;

        let topics = metadata
            .topics()
            .iter()
            .map(|t| t.name().to_string())
            .filter(|name| self.cfg.include_internal_topics || !is_internal_topic(name))
            .collect();

        Ok(topics)
    }
}

/// Lists topics, degrading to an empty set when the broker is unreachable.
pub fn discover_topics(
    source: &dyn TopicSource,
    health: Option<&HealthMetrics>,
) -> BTreeSet<String> {
    match source.list_topics() {
        Ok(topics) => {
            debug!(count = topics.len(), "discovered topics");
            if let Some(health) = health {
                health.topics_discovered.set(topics.len() as f64);
            }
            topics
        }
        Err(e) => {
            warn!(error = %e, "topic discovery failed, continuing with no topics");
            if let Some(health) = health {
                health.discovery_errors.inc();
                health.topics_discovered.set(0.0);
            }
            BTreeSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;

    struct Fixed(Vec<&'static str>);

    impl TopicSource for Fixed {
        fn list_topics(&self) -> Result<BTreeSet<String>> {
            Ok(self.0.iter().map(|s| (*s).to_string()).collect())
        }
    }

    struct Unreachable;

    impl TopicSource for Unreachable {
        fn list_topics(&self) -> Result<BTreeSet<String>> {
            bail!("broker transport failure")
        }
    }

    #[test]
    fn test_discover_returns_source_topics() {
        let topics = discover_topics(&Fixed(vec!["gym_age", "gym_clicks", "gym_age"]), None);
        assert_eq!(topics.len(), 2);
        assert!(topics.contains("gym_clicks"));
    }

    #[test]
    fn test_discover_failure_is_empty_and_counted() {
        let health = HealthMetrics::new(":0").expect("metrics");
        let topics = discover_topics(&Unreachable, Some(&health));
        assert!(topics.is_empty());
        assert_eq!(health.discovery_errors.get() as u64, 1);
    }

    #[test]
    fn test_discover_records_topic_gauge() {
        let health = HealthMetrics::new(":0").expect("metrics");
        discover_topics(&Fixed(vec!["a_clicks", "b_clicks"]), Some(&health));
        assert_eq!(health.topics_discovered.get() as u64, 2);
    }
}
