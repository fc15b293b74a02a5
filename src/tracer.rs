//! Opt-in per-feature decision tracing, driven by `TRACE_FEATURES`. Kept as a
//! first-class observability feature, not a debug scaffold: every decision
//! point in pass 1 and pass 2 emits through this type, and a summary prints
//! at the end of a run when any matcher fired.

use std::cell::RefCell;
use std::collections::HashSet;

use log::info;
use serde_json::Value;

use crate::model::Feature;

enum Matcher {
    Names(HashSet<String>),
    Properties(Vec<(String, Value)>),
}

pub struct Tracer {
    matcher: Option<Matcher>,
    hits: RefCell<Vec<String>>,
}

impl Tracer {
    pub fn disabled() -> Self {
        Tracer { matcher: None, hits: RefCell::new(Vec::new()) }
    }

    /// Parse `TRACE_FEATURES`: either a JSON array of property-matcher
    /// objects (`[{"OBJNAM":"FOO"}]`) or a comma-separated OBJNAM list.
    pub fn from_env_value(raw: Option<&str>) -> Self {
        let Some(raw) = raw else { return Self::disabled() };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::disabled();
        }
        if trimmed.starts_with('[') {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
                let mut pairs = Vec::new();
                for item in items {
                    if let Value::Object(map) = item {
                        for (k, v) in map {
                            pairs.push((k, v));
                        }
                    }
                }
                return Tracer { matcher: Some(Matcher::Properties(pairs)), hits: RefCell::new(Vec::new()) };
            }
        }
        let names: HashSet<String> = trimmed.split(',').map(|s| s.trim().to_string()).collect();
        Tracer { matcher: Some(Matcher::Names(names)), hits: RefCell::new(Vec::new()) }
    }

    fn matches(&self, feature: &Feature) -> bool {
        match &self.matcher {
            None => false,
            Some(Matcher::Names(names)) => feature.objnam().map(|n| names.contains(n)).unwrap_or(false),
            Some(Matcher::Properties(pairs)) => pairs
                .iter()
                .any(|(k, v)| feature.properties.get(k) == Some(v)),
        }
    }

    pub fn trace(&self, feature: &Feature, event: &str, detail: &str) {
        if !self.matches(feature) {
            return;
        }
        let label = feature.objnam().unwrap_or("<unnamed>");
        info!(
            "[trace] {event} chart={} objnam={label} objl={:?} scale={:?} detail={detail}",
            feature.chart_id,
            feature.objl(),
            feature.scale_num()
        );
        self.hits.borrow_mut().push(format!("{event}:{label}"));
    }

    pub fn summarize(&self) {
        let hits = self.hits.borrow();
        if !hits.is_empty() {
            info!("feature trace summary: {} events recorded", hits.len());
        }
    }
}
