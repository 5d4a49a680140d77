use std::fmt;

/// Suffix marking a raw click-counter topic.
pub const CLICKS_SUFFIX: &str = "_clicks";

/// Prefix used by the broker for its own bookkeeping topics.
pub const INTERNAL_TOPIC_PREFIX: &str = "__";

/// Demographic slice encoded in a topic name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    Age,
    City,
    Gender,
}

impl Dimension {
    /// Rendering order within a service section.
    pub const ALL: [Dimension; 3] = [Dimension::Age, Dimension::City, Dimension::Gender];

    /// Returns the topic-name suffix (without separator).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::City => "city",
            Self::Gender => "gender",
        }
    }

    /// Returns the topic carrying this dimension for `service`.
    pub fn topic_for(self, service: &str) -> String {
        format!("{service}_{}", self.as_str())
    }

    /// Returns the chart title for this dimension.
    pub fn chart_title(self, service: &str) -> String {
        match self {
            Self::Age => format!("Age distribution of interest in {service}"),
            Self::City => format!("City distribution of interest in {service}"),
            Self::Gender => format!("Gender distribution of interest in {service}"),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the service a topic belongs to: everything before the first `_`.
///
/// A topic without a separator is its own service.
pub fn service_of(topic: &str) -> &str {
    topic.split_once('_').map_or(topic, |(service, _)| service)
}

/// Returns true for `<service>_clicks` topics.
pub fn is_clicks_topic(topic: &str) -> bool {
    topic.ends_with(CLICKS_SUFFIX)
}

/// Returns true for broker-internal topics such as `__consumer_offsets`.
pub fn is_internal_topic(topic: &str) -> bool {
    topic.starts_with(INTERNAL_TOPIC_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_of() {
        assert_eq!(service_of("gym_age"), "gym");
        assert_eq!(service_of("gym_clicks"), "gym");
        assert_eq!(service_of("my_shop_city"), "my");
        assert_eq!(service_of("standalone"), "standalone");
        assert_eq!(service_of("_orphan"), "");
    }

    #[test]
    fn test_is_clicks_topic() {
        assert!(is_clicks_topic("checkout_clicks"));
        assert!(!is_clicks_topic("checkout_click"));
        assert!(!is_clicks_topic("clicks_age"));
    }

    #[test]
    fn test_is_internal_topic() {
        assert!(is_internal_topic("__consumer_offsets"));
        assert!(!is_internal_topic("gym_age"));
        assert!(!is_internal_topic("_gym"));
    }

    #[test]
    fn test_dimension_topic_names() {
        assert_eq!(Dimension::Age.topic_for("gym"), "gym_age");
        assert_eq!(Dimension::City.topic_for("gym"), "gym_city");
        assert_eq!(Dimension::Gender.topic_for("gym"), "gym_gender");
    }

    #[test]
    fn test_dimension_titles_are_distinct() {
        let titles: Vec<String> = Dimension::ALL
            .iter()
            .map(|d| d.chart_title("gym"))
            .collect();
        assert_eq!(titles.len(), 3);
        assert_ne!(titles[0], titles[1]);
        assert_ne!(titles[1], titles[2]);
        assert!(titles.iter().all(|t| t.ends_with("gym")));
    }
}
