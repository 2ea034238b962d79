use std::collections::HashMap;
use std::sync::OnceLock;

/// Pluggable metric sink. The broker records counters and summaries through
/// the process-global sink; the default discards everything so deployments
/// without a metrics backend pay nothing.
pub trait Metric: Send + Sync {
    fn count(&self, name: &str, tags: &HashMap<String, String>, value: f64);
    fn summary(&self, name: &str, tags: &HashMap<String, String>, value: f64);
}

struct EmptyMetric;

impl Metric for EmptyMetric {
    fn count(&self, _name: &str, _tags: &HashMap<String, String>, _value: f64) {}
    fn summary(&self, _name: &str, _tags: &HashMap<String, String>, _value: f64) {}
}

static METRIC: OnceLock<Box<dyn Metric>> = OnceLock::new();

/// Install a metric backend. First call wins; later calls are ignored.
pub fn set_metric(m: Box<dyn Metric>) {
    let _ = METRIC.set(m);
}

fn sink() -> &'static dyn Metric {
    match METRIC.get() {
        Some(m) => m.as_ref(),
        None => &EmptyMetric,
    }
}

pub fn count(name: &str, tags: &[(&str, &str)], value: f64) {
    sink().count(name, &to_map(tags), value);
}

pub fn summary(name: &str, tags: &[(&str, &str)], value: f64) {
    sink().summary(name, &to_map(tags), value);
}

fn to_map(tags: &[(&str, &str)]) -> HashMap<String, String> {
    tags.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
