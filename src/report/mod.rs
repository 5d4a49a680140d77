pub mod chart;
pub mod document;
pub mod plan;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::aggregate::AggregatedSnapshot;
use crate::config::ReportConfig;
use crate::export::health::HealthMetrics;
use crate::guard::OutputGuard;

pub use chart::{ChartBackend, PlottersBackend};
pub use document::{chart_image_path, Block, DocumentLayout, DocumentWriter, PdfWriter};
pub use plan::{ChartKind, PieChart, ReportPlan, ServiceSection, Slice};

/// Failure while producing the report.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("font: {0}")]
    Font(String),
    #[error("chart: {0}")]
    Chart(String),
    #[error("document: {0}")]
    Document(String),
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What the report step did.
#[derive(Debug)]
pub enum RenderOutcome {
    /// The artifact was replaced.
    Written { charts: usize },
    /// The artifact is held open elsewhere; nothing was touched.
    SkippedBusy,
    /// Rendering failed; the previous artifact (if any) is untouched.
    Failed(RenderError),
}

impl RenderOutcome {
    /// Metric/log label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Written { .. } => "written",
            Self::SkippedBusy => "skipped_busy",
            Self::Failed(_) => "failed",
        }
    }
}

/// Chart images created during one render, removed when dropped.
#[derive(Debug, Default)]
pub struct TransientImages {
    paths: Vec<PathBuf>,
}

impl TransientImages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `path` before anything is written to it.
    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Drop for TransientImages {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed chart image"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "removing chart image"),
            }
        }
    }
}

/// Turns a snapshot into the report artifact.
pub struct ReportRenderer {
    guard: Arc<dyn OutputGuard>,
    charts: Box<dyn ChartBackend>,
    writer: Box<dyn DocumentWriter>,
    output_path: PathBuf,
    scratch_dir: PathBuf,
    title: String,
    reserved_services: Vec<String>,
    health: Option<Arc<HealthMetrics>>,
}

impl ReportRenderer {
    pub fn new(
        cfg: &ReportConfig,
        guard: Arc<dyn OutputGuard>,
        charts: Box<dyn ChartBackend>,
        writer: Box<dyn DocumentWriter>,
        health: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self {
            guard,
            charts,
            writer,
            output_path: cfg.output_path.clone(),
            scratch_dir: cfg.scratch_dir.clone(),
            title: cfg.title.clone(),
            reserved_services: cfg.reserved_services.clone(),
            health,
        }
    }

    /// Renderer backed by plotters charts and a genpdf document, both using
    /// the configured font.
    pub fn with_defaults(
        cfg: &ReportConfig,
        guard: Arc<dyn OutputGuard>,
        health: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self::new(
            cfg,
            guard,
            Box::new(PlottersBackend::new(&cfg.font_path)),
            Box::new(PdfWriter::new(&cfg.font_path)),
            health,
        )
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Renders the report to the configured output path.
    pub fn render(&self, snapshot: &AggregatedSnapshot) -> RenderOutcome {
        self.render_to(snapshot, &self.output_path)
    }

    /// Renders the report to `output_path`. Render errors are logged and
    /// returned as [`RenderOutcome::Failed`].
    pub fn render_to(&self, snapshot: &AggregatedSnapshot, output_path: &Path) -> RenderOutcome {
        if self.guard.is_output_busy(output_path) {
            info!(
                path = %output_path.display(),
                "report file is in use, skipping this cycle",
            );
            return RenderOutcome::SkippedBusy;
        }

        match self.try_render(snapshot, output_path) {
            Ok(charts) => {
                info!(path = %output_path.display(), charts, "report written");
                if let Some(health) = &self.health {
                    health.last_report_timestamp.set(unix_now());
                }
                RenderOutcome::Written { charts }
            }
            Err(e) => {
                error!(path = %output_path.display(), error = %e, "report rendering failed");
                RenderOutcome::Failed(e)
            }
        }
    }

    fn try_render(
        &self,
        snapshot: &AggregatedSnapshot,
        output_path: &Path,
    ) -> Result<usize, RenderError> {
        let plan = ReportPlan::build(snapshot, &self.title, &self.reserved_services);
        let layout = DocumentLayout::from_plan(&plan, &self.scratch_dir);

        let mut images = TransientImages::new();

        for chart in plan.charts() {
            let path = chart_image_path(&self.scratch_dir, chart);
            images.track(path.clone());
            self.charts.draw(chart, &path)?;
            debug!(chart = %chart.name, slices = chart.slices.len(), "chart drawn");
            if let Some(health) = &self.health {
                health.charts_rendered.inc();
            }
        }

        let bytes = self.writer.render(&layout)?;
        write_atomically(output_path, &bytes)?;

        Ok(images.len())
    }
}

/// Writes `bytes` to `<path>.partial` and renames it over `path`.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), RenderError> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    if let Err(source) = fs::write(&partial, bytes) {
        let _ = fs::remove_file(&partial);
        return Err(RenderError::Io {
            path: partial,
            source,
        });
    }

    fs::rename(&partial, path).map_err(|source| {
        let _ = fs::remove_file(&partial);
        RenderError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
