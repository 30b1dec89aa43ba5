//! Helpers for inspecting gathered metric families in tests.

use prometheus::proto::{MetricFamily, MetricType};

/// Returns the value of the sample of `name` carrying all `labels`.
pub(crate) fn sample_value(
    families: &[MetricFamily],
    name: &str,
    labels: &[(&str, &str)],
) -> Option<f64> {
    let family = families.iter().find(|f| f.get_name() == name)?;
    family
        .get_metric()
        .iter()
        .find(|metric| {
            labels.iter().all(|(key, value)| {
                metric
                    .get_label()
                    .iter()
                    .any(|pair| pair.get_name() == *key && pair.get_value() == *value)
            })
        })
        .map(|metric| match family.get_field_type() {
            MetricType::COUNTER => metric.get_counter().get_value(),
            _ => metric.get_gauge().get_value(),
        })
}

/// Number of samples gathered for `name`.
pub(crate) fn sample_count(families: &[MetricFamily], name: &str) -> usize {
    families
        .iter()
        .filter(|f| f.get_name() == name)
        .map(|f| f.get_metric().len())
        .sum()
}
