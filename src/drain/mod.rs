pub mod kafka;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DrainConfig, OffsetPolicy};
use crate::export::health::HealthMetrics;

pub use kafka::KafkaBus;

/// Payloads observed for one topic during one drain, in arrival order.
pub type TopicBatch = Vec<String>;

/// Topic name to its batch.
pub type Batches = BTreeMap<String, TopicBatch>;

/// A single record returned by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    /// Raw payload; `None` for tombstones.
    pub payload: Option<Vec<u8>>,
}

impl Record {
    pub fn new(topic: impl Into<String>, partition: i32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            payload: Some(payload.into()),
        }
    }
}

/// Message bus able to open a subscription over a set of topics.
pub trait MessageBus: Send + Sync {
    type Subscription: Subscription;

    /// Subscribes to `topics` from the earliest retained offset.
    fn subscribe(&self, topics: &BTreeSet<String>) -> Result<Self::Subscription>;
}

/// An open subscription. Dropping it tears the subscription down.
pub trait Subscription: Send {
    /// Waits up to `timeout` for records. An empty vec means nothing arrived.
    fn poll(&mut self, timeout: Duration) -> impl Future<Output = Result<Vec<Record>>> + Send;

    /// Commits the offsets consumed so far.
    fn commit(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Outcome of one drain window.
#[derive(Debug, Default)]
pub struct Drained {
    pub batches: Batches,
    /// Payloads accepted into batches.
    pub messages: usize,
    /// Payloads skipped (absent or not UTF-8).
    pub rejected: usize,
    /// True when a bus error ended the window early.
    pub interrupted: bool,
}

/// Collects messages from the bus for a bounded wall-clock window.
pub struct EventDrain<B> {
    bus: B,
    window: Duration,
    poll_timeout: Duration,
    offset_policy: OffsetPolicy,
    health: Option<Arc<HealthMetrics>>,
}

impl<B: MessageBus> EventDrain<B> {
    pub fn new(bus: B, cfg: &DrainConfig, health: Option<Arc<HealthMetrics>>) -> Self {
        Self {
            bus,
            window: cfg.window,
            poll_timeout: cfg.poll_timeout,
            offset_policy: cfg.offset_policy,
            health,
        }
    }

    /// Drains every given topic until the window expires.
    ///
    /// Never fails: bus errors end the window early and the partial batches
    /// are returned.
    pub async fn drain(&self, topics: &BTreeSet<String>) -> Drained {
        let mut out = Drained::default();

        if topics.is_empty() {
            debug!("no topics to drain");
            return out;
        }

        let deadline = Instant::now() + self.window;

        let mut sub = match self.bus.subscribe(topics) {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "subscribe failed, nothing drained");
                self.record_error();
                out.interrupted = true;
                return out;
            }
        };

        info!(topics = topics.len(), window = ?self.window, "draining topics");

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let timeout = self.poll_timeout.min(deadline - now);

            match sub.poll(timeout).await {
                Ok(records) if records.is_empty() => {
                    debug!("no new messages, waiting");
                }
                Ok(records) => {
                    for record in records {
                        self.accept(&mut out, record);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "bus error during drain, keeping partial results");
                    self.record_error();
                    out.interrupted = true;
                    break;
                }
            }
        }

        if self.offset_policy == OffsetPolicy::Commit && out.messages + out.rejected > 0 {
            if let Err(e) = sub.commit().await {
                warn!(error = %e, "offset commit failed");
            }
        }

        drop(sub);

        info!(
            messages = out.messages,
            rejected = out.rejected,
            topics_with_data = out.batches.len(),
            "drain finished",
        );

        out
    }

    fn accept(&self, out: &mut Drained, record: Record) {
        let Some(payload) = record.payload else {
            warn!(topic = %record.topic, "record without payload, skipping");
            self.record_rejected(out);
            return;
        };

        match String::from_utf8(payload) {
            Ok(value) => {
                debug!(
                    topic = %record.topic,
                    partition = record.partition,
                    value = %value,
                    "received message",
                );
                out.batches.entry(record.topic).or_default().push(value);
                out.messages += 1;
                if let Some(health) = &self.health {
                    health.messages_drained.inc();
                }
            }
            Err(e) => {
                warn!(topic = %record.topic, error = %e, "payload is not UTF-8, skipping");
                self.record_rejected(out);
            }
        }
    }

    fn record_rejected(&self, out: &mut Drained) {
        out.rejected += 1;
        if let Some(health) = &self.health {
            health.payloads_rejected.inc();
        }
    }

    fn record_error(&self) {
        if let Some(health) = &self.health {
            health.drain_errors.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;

    enum Step {
        Records(Vec<Record>),
        Fail,
    }

    #[derive(Default)]
    struct Counters {
        subscribes: AtomicUsize,
        polls: AtomicUsize,
        commits: AtomicUsize,
        drops: AtomicUsize,
    }

    struct ScriptedBus {
        steps: parking_lot::Mutex<Option<VecDeque<Step>>>,
        counters: Arc<Counters>,
        fail_subscribe: bool,
    }

    impl ScriptedBus {
        fn new(steps: Vec<Step>) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let bus = Self {
                steps: parking_lot::Mutex::new(Some(steps.into())),
                counters: Arc::clone(&counters),
                fail_subscribe: false,
            };
            (bus, counters)
        }
    }

    struct ScriptedSubscription {
        steps: VecDeque<Step>,
        counters: Arc<Counters>,
    }

    impl MessageBus for ScriptedBus {
        type Subscription = ScriptedSubscription;

        fn subscribe(&self, _topics: &BTreeSet<String>) -> Result<Self::Subscription> {
            self.counters.subscribes.fetch_add(1, Ordering::SeqCst);
            if self.fail_subscribe {
                return Err(anyhow!("broker unreachable"));
            }
            Ok(ScriptedSubscription {
                steps: self.steps.lock().take().unwrap_or_default(),
                counters: Arc::clone(&self.counters),
            })
        }
    }

    impl Subscription for ScriptedSubscription {
        async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>> {
            self.counters.polls.fetch_add(1, Ordering::SeqCst);
            match self.steps.pop_front() {
                Some(Step::Records(records)) => Ok(records),
                Some(Step::Fail) => Err(anyhow!("connection reset")),
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn commit(&mut self) -> Result<()> {
            self.counters.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for ScriptedSubscription {
        fn drop(&mut self) {
            self.counters.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn topics(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn cfg(policy: OffsetPolicy) -> DrainConfig {
        DrainConfig {
            window: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(1),
            offset_policy: policy,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_topics_never_connect() {
        let (bus, counters) = ScriptedBus::new(Vec::new());
        let drain = EventDrain::new(bus, &cfg(OffsetPolicy::Replay), None);

        let out = drain.drain(&BTreeSet::new()).await;

        assert!(out.batches.is_empty());
        assert_eq!(counters.subscribes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_groups_payloads_by_topic() {
        let (bus, counters) = ScriptedBus::new(vec![
            Step::Records(vec![
                Record::new("gym_age", 0, "20-30"),
                Record::new("gym_city", 1, "Warsaw"),
            ]),
            Step::Records(Vec::new()),
            Step::Records(vec![Record::new("gym_age", 0, "31-40")]),
        ]);
        let drain = EventDrain::new(bus, &cfg(OffsetPolicy::Replay), None);

        let out = drain.drain(&topics(&["gym_age", "gym_city"])).await;

        assert_eq!(out.messages, 3);
        assert_eq!(
            out.batches.get("gym_age"),
            Some(&vec!["20-30".to_string(), "31-40".to_string()])
        );
        assert_eq!(out.batches.get("gym_city"), Some(&vec!["Warsaw".to_string()]));
        assert!(!out.interrupted);
        assert_eq!(counters.drops.load(Ordering::SeqCst), 1);
        assert_eq!(counters.commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_a_wall_clock_deadline() {
        let (bus, counters) = ScriptedBus::new(Vec::new());
        let drain = EventDrain::new(bus, &cfg(OffsetPolicy::Replay), None);

        let start = Instant::now();
        let out = drain.drain(&topics(&["gym_age"])).await;

        assert!(out.batches.is_empty());
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(counters.polls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_error_keeps_partial_results() {
        let (bus, counters) = ScriptedBus::new(vec![
            Step::Records(vec![Record::new("gym_clicks", 0, "click")]),
            Step::Fail,
            Step::Records(vec![Record::new("gym_clicks", 0, "click")]),
        ]);
        let drain = EventDrain::new(bus, &cfg(OffsetPolicy::Replay), None);

        let out = drain.drain(&topics(&["gym_clicks"])).await;

        assert!(out.interrupted);
        assert_eq!(out.messages, 1);
        assert_eq!(out.batches.get("gym_clicks").map(Vec::len), Some(1));
        assert_eq!(counters.drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_failure_returns_empty() {
        let (mut bus, counters) = ScriptedBus::new(Vec::new());
        bus.fail_subscribe = true;
        let drain = EventDrain::new(bus, &cfg(OffsetPolicy::Replay), None);

        let out = drain.drain(&topics(&["gym_age"])).await;

        assert!(out.interrupted);
        assert!(out.batches.is_empty());
        assert_eq!(counters.subscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_invalid_payloads_without_stopping() {
        let (bus, _counters) = ScriptedBus::new(vec![Step::Records(vec![
            Record {
                topic: "gym_city".to_string(),
                partition: 0,
                payload: Some(vec![0xff, 0xfe]),
            },
            Record {
                topic: "gym_city".to_string(),
                partition: 0,
                payload: None,
            },
            Record::new("gym_city", 0, "Łódź"),
        ])]);
        let health = Arc::new(HealthMetrics::new(":0").expect("metrics"));
        let drain = EventDrain::new(bus, &cfg(OffsetPolicy::Replay), Some(Arc::clone(&health)));

        let out = drain.drain(&topics(&["gym_city"])).await;

        assert_eq!(out.rejected, 2);
        assert_eq!(out.messages, 1);
        assert_eq!(out.batches.get("gym_city"), Some(&vec!["Łódź".to_string()]));
        assert_eq!(health.payloads_rejected.get() as u64, 2);
        assert_eq!(health.messages_drained.get() as u64, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_policy_commits_after_drain() {
        let (bus, counters) = ScriptedBus::new(vec![Step::Records(vec![Record::new(
            "gym_age", 0, "20-30",
        )])]);
        let drain = EventDrain::new(bus, &cfg(OffsetPolicy::Commit), None);

        drain.drain(&topics(&["gym_age"])).await;

        assert_eq!(counters.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_policy_commits_rejected_only_window() {
        let (bus, counters) = ScriptedBus::new(vec![Step::Records(vec![Record {
            topic: "gym_city".to_string(),
            partition: 0,
            payload: Some(vec![0xff]),
        }])]);
        let drain = EventDrain::new(bus, &cfg(OffsetPolicy::Commit), None);

        let out = drain.drain(&topics(&["gym_city"])).await;

        assert_eq!(out.messages, 0);
        assert_eq!(out.rejected, 1);
        assert_eq!(counters.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_policy_skips_empty_window() {
        let (bus, counters) = ScriptedBus::new(Vec::new());
        let drain = EventDrain::new(bus, &cfg(OffsetPolicy::Commit), None);

        drain.drain(&topics(&["gym_city"])).await;

        assert_eq!(counters.commits.load(Ordering::SeqCst), 0);
    }
}
