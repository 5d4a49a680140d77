use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::aggregate::Aggregator;
use crate::catalog::{self, TopicSource};
use crate::drain::{EventDrain, MessageBus};
use crate::export::health::HealthMetrics;
use crate::report::{RenderOutcome, ReportRenderer};
use crate::scheduler::Cycle;

/// How the report step ended for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Written { charts: usize },
    SkippedBusy,
    /// Nothing was aggregated, so nothing was rendered.
    SkippedEmpty,
    Failed,
}

impl ReportStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Written { .. } => "written",
            Self::SkippedBusy => "skipped_busy",
            Self::SkippedEmpty => "skipped_empty",
            Self::Failed => "failed",
        }
    }
}

impl From<&RenderOutcome> for ReportStatus {
    fn from(outcome: &RenderOutcome) -> Self {
        match outcome {
            RenderOutcome::Written { charts } => Self::Written { charts: *charts },
            RenderOutcome::SkippedBusy => Self::SkippedBusy,
            RenderOutcome::Failed(_) => Self::Failed,
        }
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub topics: usize,
    pub messages: usize,
    pub rejected: usize,
    pub snapshot_topics: usize,
    pub failed_topics: usize,
    pub status: ReportStatus,
    pub elapsed: Duration,
}

/// Discover, drain, aggregate, render.
pub struct ReportPipeline<B> {
    catalog: Arc<dyn TopicSource>,
    drain: EventDrain<B>,
    aggregator: Aggregator,
    renderer: Arc<ReportRenderer>,
    health: Option<Arc<HealthMetrics>>,
}

impl<B: MessageBus> ReportPipeline<B> {
    pub fn new(
        catalog: Arc<dyn TopicSource>,
        drain: EventDrain<B>,
        aggregator: Aggregator,
        renderer: Arc<ReportRenderer>,
        health: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self {
            catalog,
            drain,
            aggregator,
            renderer,
            health,
        }
    }

    /// Runs every step once, strictly in sequence.
    pub async fn run(&self) -> CycleReport {
        let started = Instant::now();
        if let Some(health) = &self.health {
            health.cycles_total.inc();
        }

        let topics = self.discover().await;
        if topics.is_empty() {
            info!("no topics available");
        }

        let drained = self.drain.drain(&topics).await;

        let aggregation = self.aggregator.aggregate(&drained.batches);
        let snapshot_topics = aggregation.snapshot.len();
        let failed_topics = aggregation.failed.len();
        if let Some(health) = &self.health {
            health.snapshot_topics.set(snapshot_topics as f64);
            health.aggregation_failures.inc_by(failed_topics as f64);
        }

        let status = if aggregation.snapshot.is_empty() {
            info!("no data to process, skipping report");
            ReportStatus::SkippedEmpty
        } else {
            let renderer = Arc::clone(&self.renderer);
            let snapshot = aggregation.snapshot;
            match tokio::task::spawn_blocking(move || renderer.render(&snapshot)).await {
                Ok(outcome) => ReportStatus::from(&outcome),
                Err(e) => {
                    warn!(error = %e, "render task did not complete");
                    ReportStatus::Failed
                }
            }
        };

        let elapsed = started.elapsed();
        if let Some(health) = &self.health {
            health.cycle_duration.observe(elapsed.as_secs_f64());
            health
                .report_outcomes
                .with_label_values(&[status.label()])
                .inc();
        }

        info!(
            topics = topics.len(),
            messages = drained.messages,
            rejected = drained.rejected,
            snapshot_topics,
            failed_topics,
            report = status.label(),
            elapsed = ?elapsed,
            "pipeline run finished",
        );

        CycleReport {
            topics: topics.len(),
            messages: drained.messages,
            rejected: drained.rejected,
            snapshot_topics,
            failed_topics,
            status,
            elapsed,
        }
    }

    async fn discover(&self) -> BTreeSet<String> {
        let catalog = Arc::clone(&self.catalog);
        let health = self.health.clone();

        match tokio::task::spawn_blocking(move || {
            catalog::discover_topics(catalog.as_ref(), health.as_deref())
        })
        .await
        {
            Ok(topics) => topics,
            Err(e) => {
                warn!(error = %e, "topic discovery task did not complete");
                BTreeSet::new()
            }
        }
    }
}

impl<B: MessageBus + 'static> Cycle for ReportPipeline<B> {
    type Report = CycleReport;

    fn run_once(&self) -> impl std::future::Future<Output = CycleReport> + Send {
        self.run()
    }
}
