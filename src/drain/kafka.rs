use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use tracing::debug;

use super::{MessageBus, Record, Subscription};
use crate::config::KafkaConfig;

/// Kafka-backed bus. Each subscription owns its own consumer.
pub struct KafkaBus {
    cfg: KafkaConfig,
}

impl KafkaBus {
    pub fn new(cfg: KafkaConfig) -> Self {
        Self { cfg }
    }

    fn consumer_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", self.cfg.bootstrap_servers())
            .set("group.id", &self.cfg.group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false");
        client
    }
}

impl MessageBus for KafkaBus {
    type Subscription = KafkaSubscription;

    fn subscribe(&self, topics: &BTreeSet<String>) -> Result<KafkaSubscription> {
        let consumer: StreamConsumer = self
            .consumer_config()
            .create()
            .context("creating Kafka consumer")?;

        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&names)
            .context("subscribing to topics")?;

        debug!(topics = ?names, "subscribed");

        Ok(KafkaSubscription {
            consumer: Arc::new(consumer),
        })
    }
}

/// Live consumer subscription; unsubscribes on drop.
pub struct KafkaSubscription {
    consumer: Arc<StreamConsumer>,
}

impl Subscription for KafkaSubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>> {
        let received = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(received) => received.context("receiving from Kafka")?,
        };

        Ok(vec![Record {
            topic: received.topic().to_string(),
            partition: received.partition(),
            payload: received.payload().map(<[u8]>::to_vec),
        }])
    }

    /// Synchronous commit, run on the blocking pool so the broker round trip
    /// never stalls a runtime worker.
    async fn commit(&mut self) -> Result<()> {
        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit_consumer_state(CommitMode::Sync))
            .await
            .context("joining offset commit")?
            .context("committing consumer offsets")
    }
}

impl Drop for KafkaSubscription {
    fn drop(&mut self) {
        self.consumer.unsubscribe();
        debug!("unsubscribed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_never_auto_commits() {
        let bus = KafkaBus::new(KafkaConfig {
            brokers: vec!["k1:9092".to_string(), "k2:9092".to_string()],
            group_id: "reports".to_string(),
            ..Default::default()
        });
        let client = bus.consumer_config();

        assert_eq!(client.get("bootstrap.servers"), Some("k1:9092,k2:9092"));
        assert_eq!(client.get("group.id"), Some("reports"));
        assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
    }
}
