use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::{AggregatedSnapshot, FrequencyDistribution};
use crate::topic::{is_clicks_topic, service_of, Dimension};

/// Title of the cross-service click chart.
pub const OVERALL_TITLE: &str = "Click distribution across services";

/// File stem of the cross-service click chart.
pub const OVERALL_NAME: &str = "overall_clicks";

/// One pie slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub label: String,
    pub value: u64,
}

/// What a chart depicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Overall,
    Dimension(Dimension),
}

/// A pie chart ready to be drawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieChart {
    /// Stable identifier, used as the image file stem.
    pub name: String,
    pub title: String,
    pub kind: ChartKind,
    pub slices: Vec<Slice>,
}

impl PieChart {
    /// Sum of slice values.
    pub fn total(&self) -> u64 {
        self.slices.iter().map(|s| s.value).sum()
    }
}

/// Per-service block: header plus up to one chart per dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSection {
    pub service: String,
    pub charts: Vec<PieChart>,
}

impl ServiceSection {
    pub fn header(&self) -> String {
        format!("Interest in {}", self.service)
    }
}

/// Everything the report will contain, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPlan {
    pub title: String,
    pub overall: Option<PieChart>,
    pub sections: Vec<ServiceSection>,
}

impl ReportPlan {
    /// Lays out a snapshot.
    ///
    /// Services are visited in lexicographic order; services listed in
    /// `reserved` and empty service prefixes get no section.
    pub fn build(snapshot: &AggregatedSnapshot, title: &str, reserved: &[String]) -> Self {
        let overall = overall_chart(snapshot);

        let services: BTreeSet<&str> = snapshot
            .topics()
            .map(service_of)
            .filter(|s| !s.is_empty())
            .filter(|s| !reserved.iter().any(|r| r == s))
            .collect();

        let sections = services
            .into_iter()
            .map(|service| ServiceSection {
                service: service.to_string(),
                charts: Dimension::ALL
                    .iter()
                    .filter_map(|&dim| dimension_chart(snapshot, service, dim))
                    .collect(),
            })
            .collect();

        Self {
            title: title.to_string(),
            overall,
            sections,
        }
    }

    /// Iterates every chart in the order it appears in the document.
    pub fn charts(&self) -> impl Iterator<Item = &PieChart> {
        self.overall
            .iter()
            .chain(self.sections.iter().flat_map(|s| s.charts.iter()))
    }

    pub fn chart_count(&self) -> usize {
        self.charts().count()
    }
}

/// Sums every `<service>_clicks` distribution per service.
pub fn click_totals(snapshot: &AggregatedSnapshot) -> BTreeMap<String, u64> {
    let mut totals = BTreeMap::new();
    for (topic, dist) in snapshot.iter() {
        if !is_clicks_topic(topic) {
            continue;
        }
        *totals.entry(service_of(topic).to_string()).or_insert(0) += dist.total();
    }
    totals
}

fn overall_chart(snapshot: &AggregatedSnapshot) -> Option<PieChart> {
    let totals = click_totals(snapshot);
    if totals.is_empty() {
        return None;
    }

    let slices = totals
        .into_iter()
        .map(|(service, total)| Slice {
            label: format!("{service} ({total})"),
            value: total,
        })
        .collect();

    Some(PieChart {
        name: OVERALL_NAME.to_string(),
        title: OVERALL_TITLE.to_string(),
        kind: ChartKind::Overall,
        slices,
    })
}

fn dimension_chart(
    snapshot: &AggregatedSnapshot,
    service: &str,
    dim: Dimension,
) -> Option<PieChart> {
    let topic = dim.topic_for(service);
    let dist = snapshot.get(&topic).filter(|d| !d.is_empty())?;

    Some(PieChart {
        name: topic,
        title: dim.chart_title(service),
        kind: ChartKind::Dimension(dim),
        slices: value_slices(dist),
    })
}

fn value_slices(dist: &FrequencyDistribution) -> Vec<Slice> {
    dist.iter()
        .map(|(value, &count)| Slice {
            label: value.clone(),
            value: count,
        })
        .collect()
}
