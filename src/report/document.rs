use std::path::{Path, PathBuf};

use genpdf::elements::{Break, Image, PageBreak, Paragraph};
use genpdf::fonts::{FontData, FontFamily};
use genpdf::{style, Alignment, Element, PaperSize, SimplePageDecorator};
use printpdf::BuiltinFont;

use super::plan::{PieChart, ReportPlan};
use super::RenderError;

/// Resolution charts are embedded at. A 600px-wide chart is ~141mm.
const IMAGE_DPI: f64 = 108.0;

/// One element of the laid-out document.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Title(String),
    Heading(String),
    Image(PathBuf),
    /// Vertical space, in lines.
    Spacer(f64),
    PageBreak,
}

/// Ordered blocks making up the report.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLayout {
    pub title: String,
    pub blocks: Vec<Block>,
}

impl DocumentLayout {
    /// Lays out a plan, referencing chart images under `scratch_dir`.
    pub fn from_plan(plan: &ReportPlan, scratch_dir: &Path) -> Self {
        let mut blocks = vec![Block::Title(plan.title.clone()), Block::Spacer(1.0)];

        if let Some(overall) = &plan.overall {
            blocks.push(Block::Image(chart_image_path(scratch_dir, overall)));
            blocks.push(Block::Spacer(2.0));
        }

        if !plan.sections.is_empty() {
            blocks.push(Block::PageBreak);
        }

        for section in &plan.sections {
            blocks.push(Block::Heading(section.header()));
            blocks.push(Block::Spacer(1.0));
            for chart in &section.charts {
                blocks.push(Block::Image(chart_image_path(scratch_dir, chart)));
                blocks.push(Block::Spacer(1.0));
            }
        }

        Self {
            title: plan.title.clone(),
            blocks,
        }
    }

    /// Image paths in document order.
    pub fn images(&self) -> impl Iterator<Item = &Path> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Image(path) => Some(path.as_path()),
            _ => None,
        })
    }
}

/// Transient image location for a chart: `<scratch_dir>/temp_plot_<name>.png`.
pub fn chart_image_path(scratch_dir: &Path, chart: &PieChart) -> PathBuf {
    scratch_dir.join(format!("temp_plot_{}.png", chart.name))
}

/// Produces the final document bytes from a layout.
pub trait DocumentWriter: Send + Sync {
    fn render(&self, layout: &DocumentLayout) -> Result<Vec<u8>, RenderError>;
}

/// PDF documents built with genpdf, using a single TTF for all text.
pub struct PdfWriter {
    font_path: PathBuf,
}

impl PdfWriter {
    pub fn new(font_path: impl Into<PathBuf>) -> Self {
        Self {
            font_path: font_path.into(),
        }
    }

    /// Embeds the TTF once, as the regular face. Bold and italic text is
    /// never set, so those slots point at builtin Helvetica faces.
    fn font_family(&self) -> Result<FontFamily<FontData>, RenderError> {
        let data = std::fs::read(&self.font_path).map_err(|e| {
            RenderError::Font(format!("loading {}: {e}", self.font_path.display()))
        })?;

        let face = |builtin: Option<BuiltinFont>| {
            FontData::new(data.clone(), builtin).map_err(|e| {
                RenderError::Font(format!("parsing {}: {e}", self.font_path.display()))
            })
        };

        Ok(FontFamily {
            regular: face(None)?,
            bold: face(Some(BuiltinFont::HelveticaBold))?,
            italic: face(Some(BuiltinFont::HelveticaOblique))?,
            bold_italic: face(Some(BuiltinFont::HelveticaBoldOblique))?,
        })
    }
}

impl DocumentWriter for PdfWriter {
    fn render(&self, layout: &DocumentLayout) -> Result<Vec<u8>, RenderError> {
        let mut doc = genpdf::Document::new(self.font_family()?);
        doc.set_title(layout.title.as_str());
        doc.set_paper_size(PaperSize::Letter);
        doc.set_font_size(10);

        let mut decorator = SimplePageDecorator::new();
        decorator.set_margins(10);
        doc.set_page_decorator(decorator);

        for block in &layout.blocks {
            match block {
                Block::Title(text) => doc.push(
                    Paragraph::new(text.as_str())
                        .aligned(Alignment::Center)
                        .styled(style::Style::new().with_font_size(18)),
                ),
                Block::Heading(text) => doc.push(
                    Paragraph::new(text.as_str())
                        .aligned(Alignment::Center)
                        .styled(style::Style::new().with_font_size(14)),
                ),
                Block::Image(path) => {
                    let image = Image::from_path(path)
                        .map_err(|e| {
                            RenderError::Document(format!("embedding {}: {e}", path.display()))
                        })?
                        .with_alignment(Alignment::Center)
                        .with_dpi(IMAGE_DPI);
                    doc.push(image);
                }
                Block::Spacer(lines) => doc.push(Break::new(*lines)),
                Block::PageBreak => doc.push(PageBreak::new()),
            }
        }

        let mut buf = Vec::new();
        doc.render(&mut buf)
            .map_err(|e| RenderError::Document(e.to_string()))?;

        Ok(buf)
    }
}
