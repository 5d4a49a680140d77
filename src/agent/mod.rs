use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::aggregate::Aggregator;
use crate::catalog::KafkaCatalog;
use crate::config::Config;
use crate::drain::{EventDrain, KafkaBus};
use crate::export::health::HealthMetrics;
use crate::guard::ProcessScanGuard;
use crate::pipeline::ReportPipeline;
use crate::report::ReportRenderer;
use crate::scheduler::Scheduler;

/// Agent wires the Kafka-backed pipeline to the scheduler and the optional
/// health server.
pub struct Agent {
    cfg: Config,
    health: Option<Arc<HealthMetrics>>,
    cancel: CancellationToken,
    scheduler: Option<JoinHandle<u64>>,
}

impl Agent {
    /// Creates a new Agent. Health metrics are only built when enabled.
    pub fn new(cfg: Config) -> Result<Self> {
        let health = if cfg.health.enabled {
            Some(Arc::new(
                HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?,
            ))
        } else {
            None
        };

        Ok(Self {
            cfg,
            health,
            cancel: CancellationToken::new(),
            scheduler: None,
        })
    }

    /// Starts the health server (if enabled) and the report scheduler.
    pub async fn start(&mut self) -> Result<()> {
        if let Some(health) = &self.health {
            health
                .start()
                .await
                .context("starting health metrics server")?;
        }

        let pipeline = self.build_pipeline();

        info!(
            brokers = %self.cfg.kafka.bootstrap_servers(),
            output = %self.cfg.report.output_path.display(),
            window = ?self.cfg.drain.window,
            interval = ?self.cfg.schedule.interval,
            offset_policy = ?self.cfg.drain.offset_policy,
            "starting report scheduler",
        );

        let scheduler = Scheduler::new(
            pipeline,
            self.cfg.schedule.interval,
            self.cancel.child_token(),
        );
        self.scheduler = Some(scheduler.spawn());

        Ok(())
    }

    /// Stops the scheduler after its current run and shuts the health server down.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(handle) = self.scheduler.take() {
            match handle.await {
                Ok(runs) => info!(runs, "report scheduler stopped"),
                Err(e) => error!(error = %e, "report scheduler task failed"),
            }
        }

        if let Some(health) = &self.health {
            health.stop().await?;
        }

        Ok(())
    }

    fn build_pipeline(&self) -> ReportPipeline<KafkaBus> {
        let catalog = Arc::new(KafkaCatalog::new(self.cfg.kafka.clone()));

        let drain = EventDrain::new(
            KafkaBus::new(self.cfg.kafka.clone()),
            &self.cfg.drain,
            self.health.clone(),
        );

        let renderer = Arc::new(ReportRenderer::with_defaults(
            &self.cfg.report,
            Arc::new(ProcessScanGuard::new()),
            self.health.clone(),
        ));

        ReportPipeline::new(
            catalog,
            drain,
            Aggregator::new(self.cfg.report.max_distinct_values),
            renderer,
            self.health.clone(),
        )
    }
}
