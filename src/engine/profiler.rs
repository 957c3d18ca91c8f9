//! Step-phase profiling driven by `Global.profiler_options`
//!
//! Options are `key=value` pairs separated by `;`, for example
//! `batch_range=[10,20];profile_path=./output/profile`.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

const OPTIONS_PATH: &str = "Global.profiler_options";

/// Parsed profiler options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerOptions {
    /// Steps `[start, end)` that are timed, counted from 0
    pub batch_range: (usize, usize),
    /// Where to write the JSON summary
    pub profile_path: Option<PathBuf>,
}

impl Default for ProfilerOptions {
    fn default() -> Self {
        Self { batch_range: (10, 20), profile_path: None }
    }
}

fn parse_range(value: &str) -> Result<(usize, usize)> {
    let inner = value
        .trim()
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(|| Error::config(OPTIONS_PATH, format!("batch_range must look like [start,end], got {value}")))?;
    let bounds = inner
        .split(',')
        .map(|b| b.trim().parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(OPTIONS_PATH, format!("batch_range bound: {e}")))?;
    match bounds.as_slice() {
        [start, end] if start < end => Ok((*start, *end)),
        [_, _] => Err(Error::config(OPTIONS_PATH, "batch_range start must be below end")),
        _ => Err(Error::config(OPTIONS_PATH, "batch_range needs exactly two bounds")),
    }
}

impl FromStr for ProfilerOptions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut options = Self::default();
        for pair in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::config(OPTIONS_PATH, format!("expected key=value, got {pair}")))?;
            match key.trim() {
                "batch_range" => options.batch_range = parse_range(value)?,
                "profile_path" => options.profile_path = Some(PathBuf::from(value.trim())),
                other => tracing::warn!(option = other, "ignoring unsupported profiler option"),
            }
        }
        Ok(options)
    }
}

impl ProfilerOptions {
    pub fn contains(&self, step: usize) -> bool {
        (self.batch_range.0..self.batch_range.1).contains(&step)
    }

    /// Number of steps to run before stopping.
    pub fn last_step(&self) -> usize {
        self.batch_range.1
    }
}

/// Timed part of a training step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Data,
    Forward,
    Loss,
    Backward,
    Optimizer,
}

impl Phase {
    pub const ALL: [Phase; 5] = [Phase::Data, Phase::Forward, Phase::Loss, Phase::Backward, Phase::Optimizer];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Data => "data",
            Self::Forward => "forward",
            Self::Loss => "loss",
            Self::Backward => "backward",
            Self::Optimizer => "optimizer",
        };
        f.write_str(name)
    }
}

/// Accumulates wall time per phase.
#[derive(Debug, Clone, Default)]
pub struct PhaseTimer {
    totals: [Duration; 5],
    steps: usize,
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f`, charging its wall time to `phase`.
    #[inline]
    pub fn time<R>(&mut self, phase: Phase, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        self.record(phase, start.elapsed());
        result
    }

    pub fn record(&mut self, phase: Phase, elapsed: Duration) {
        self.totals[phase.index()] += elapsed;
    }

    pub fn finish_step(&mut self) {
        self.steps += 1;
    }

    pub fn report(&self) -> ProfileReport {
        let total: Duration = self.totals.iter().sum();
        let phases = Phase::ALL
            .iter()
            .map(|phase| {
                let spent = self.totals[phase.index()];
                PhaseSummary {
                    phase: phase.to_string(),
                    total_secs: spent.as_secs_f64(),
                    mean_ms: if self.steps == 0 { 0.0 } else { spent.as_secs_f64() * 1000.0 / self.steps as f64 },
                    share: if total.is_zero() { 0.0 } else { spent.as_secs_f64() / total.as_secs_f64() },
                }
            })
            .collect();
        ProfileReport { steps: self.steps, total_secs: total.as_secs_f64(), phases }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub phase: String,
    pub total_secs: f64,
    pub mean_ms: f64,
    /// Fraction of all measured time
    pub share: f64,
}

/// Profiling summary over the timed steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileReport {
    pub steps: usize,
    pub total_secs: f64,
    pub phases: Vec<PhaseSummary>,
}

impl ProfileReport {
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::io(format!("writing {}", path.display()), e))
    }
}

impl fmt::Display for ProfileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "profiled {} steps, {:.3} s measured", self.steps, self.total_secs)?;
        for p in &self.phases {
            writeln!(f, "  {:<10} {:>10.3} ms/step {:>6.1}%", p.phase, p.mean_ms, p.share * 100.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let opts: ProfilerOptions = "batch_range=[3, 7]; profile_path=/tmp/prof.json".parse().unwrap();
        assert_eq!(opts.batch_range, (3, 7));
        assert_eq!(opts.profile_path, Some(PathBuf::from("/tmp/prof.json")));
        assert!(opts.contains(3));
        assert!(!opts.contains(7));
        assert_eq!(opts.last_step(), 7);
    }

    #[test]
    fn test_defaults_and_unknown_keys() {
        let opts: ProfilerOptions = "state=CPU;tracer_option=Default".parse().unwrap();
        assert_eq!(opts, ProfilerOptions::default());
    }

    #[test]
    fn test_rejects_bad_ranges() {
        for bad in ["batch_range=[5,5]", "batch_range=5,6", "batch_range=[1]", "batch_range"] {
            let err = bad.parse::<ProfilerOptions>().unwrap_err();
            assert!(err.to_string().contains(OPTIONS_PATH), "{bad}");
        }
    }

    #[test]
    fn test_timer_report() {
        let mut timer = PhaseTimer::new();
        timer.record(Phase::Forward, Duration::from_millis(30));
        timer.record(Phase::Backward, Duration::from_millis(10));
        timer.finish_step();
        timer.finish_step();
        let report = timer.report();
        assert_eq!(report.steps, 2);
        let forward = &report.phases[1];
        assert_eq!(forward.phase, "forward");
        assert!((forward.mean_ms - 15.0).abs() < 1e-9);
        assert!((forward.share - 0.75).abs() < 1e-9);
        assert!(report.to_string().contains("forward"));
    }
}
