use std::path::{Path, PathBuf};

use plotters::prelude::*;
use plotters::style::{register_font, FontStyle};
use tracing::debug;

use super::plan::PieChart;
use super::RenderError;

/// Family name the configured font is registered under. Plotters' pie labels
/// default to this family.
const FONT_FAMILY: &str = "sans-serif";

/// Chart bitmap size. The PDF embeds raw RGB, so every pixel costs 3 bytes
/// per chart in the final document.
pub const IMAGE_SIZE: (u32, u32) = (600, 450);

/// Slice colours, cycled when a chart has more slices than entries.
pub const PALETTE: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

/// Draws a single pie chart to an image file.
pub trait ChartBackend: Send + Sync {
    fn draw(&self, chart: &PieChart, path: &Path) -> Result<(), RenderError>;
}

/// PNG pie charts drawn with plotters.
pub struct PlottersBackend {
    font_path: PathBuf,
    font_registered: parking_lot::Mutex<bool>,
}

impl PlottersBackend {
    pub fn new(font_path: impl Into<PathBuf>) -> Self {
        Self {
            font_path: font_path.into(),
            font_registered: parking_lot::Mutex::new(false),
        }
    }

    /// Registers the configured font once. A missing font is retried on the
    /// next call.
    fn ensure_font(&self) -> Result<(), RenderError> {
        let mut registered = self.font_registered.lock();
        if *registered {
            return Ok(());
        }

        let bytes = std::fs::read(&self.font_path).map_err(|e| {
            RenderError::Font(format!("reading {}: {e}", self.font_path.display()))
        })?;

        // The plotters font registry keeps a 'static reference for the life
        // of the process.
        let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
        register_font(FONT_FAMILY, FontStyle::Normal, bytes).map_err(|_| {
            RenderError::Font(format!("{} is not a usable font", self.font_path.display()))
        })?;

        debug!(font = %self.font_path.display(), "registered chart font");
        *registered = true;

        Ok(())
    }
}

impl ChartBackend for PlottersBackend {
    fn draw(&self, chart: &PieChart, path: &Path) -> Result<(), RenderError> {
        if chart.slices.is_empty() || chart.total() == 0 {
            return Err(RenderError::Chart(format!("{} has no data", chart.name)));
        }

        self.ensure_font()?;

        let root = BitMapBackend::new(path, IMAGE_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;

        let area = root
            .titled(&chart.title, (FONT_FAMILY, 22))
            .map_err(chart_err)?;

        let (w, h) = area.dim_in_pixel();
        let center = (w as i32 / 2, h as i32 / 2);
        let radius = f64::from(w.min(h)) * 0.35;

        let sizes: Vec<f64> = chart.slices.iter().map(|s| s.value as f64).collect();
        let labels: Vec<&str> = chart.slices.iter().map(|s| s.label.as_str()).collect();
        let colors = slice_colors(chart.slices.len());

        let mut pie = Pie::new(&center, &radius, &sizes, &colors, &labels);
        pie.start_angle(-90.0);
        pie.label_style((FONT_FAMILY, 14).into_font().color(&BLACK));
        pie.label_offset(radius * 0.1);
        pie.percentages((FONT_FAMILY, 12).into_font().color(&WHITE));

        area.draw(&pie).map_err(chart_err)?;
        root.present().map_err(chart_err)?;

        Ok(())
    }
}

/// Returns `n` colours from the palette, wrapping around.
pub fn slice_colors(n: usize) -> Vec<RGBColor> {
    PALETTE.iter().copied().cycle().take(n).collect()
}

fn chart_err<E: std::fmt::Display>(e: E) -> RenderError {
    RenderError::Chart(e.to_string())
}
