//! Windowed training statistics

use std::collections::{BTreeMap, VecDeque};

/// Keeps the last `window` values of each named statistic.
#[derive(Debug, Clone)]
pub struct SmoothedStats {
    window: usize,
    series: BTreeMap<String, VecDeque<f64>>,
}

impl SmoothedStats {
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1), series: BTreeMap::new() }
    }

    pub fn update<'a>(&mut self, values: impl IntoIterator<Item = (&'a str, f64)>) {
        for (name, value) in values {
            let series = self.series.entry(name.to_string()).or_default();
            if series.len() == self.window {
                series.pop_front();
            }
            series.push_back(value);
        }
    }

    /// Window mean of one statistic.
    pub fn get(&self, name: &str) -> Option<f64> {
        let series = self.series.get(name)?;
        if series.is_empty() {
            return None;
        }
        Some(series.iter().sum::<f64>() / series.len() as f64)
    }

    /// Window means of every statistic, ordered by name.
    pub fn means(&self) -> BTreeMap<String, f64> {
        self.series.keys().filter_map(|name| Some((name.clone(), self.get(name)?))).collect()
    }

    /// `name: value` pairs for log lines.
    pub fn log(&self) -> String {
        self.means()
            .iter()
            .map(|(name, value)| format!("{name}: {value:.6}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
