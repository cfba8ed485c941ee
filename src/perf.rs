use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BenchError;

/// Execution mode keyword handed to the program under test.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mode {
    Sequential,
    Pipeline,
    WorkStealing,
    Parfiles,
    Parslices,
    Other(String),
}

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Mode::Sequential => "sequential",
            Mode::Pipeline => "pipeline",
            Mode::WorkStealing => "workstealing",
            Mode::Parfiles => "parfiles",
            Mode::Parslices => "parslices",
            Mode::Other(s) => s,
        }
    }

    /// A sequential run is the baseline of its dataset.
    pub fn is_sequential(&self) -> bool {
        matches!(self, Mode::Sequential)
    }
}

impl FromStr for Mode {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BenchError::config("empty mode keyword"));
        }
        Ok(match s.to_lowercase().as_str() {
            "sequential" => Mode::Sequential,
            "pipeline" => Mode::Pipeline,
            "workstealing" | "work-stealing" => Mode::WorkStealing,
            "parfiles" => Mode::Parfiles,
            "parslices" => Mode::Parslices,
            _ => Mode::Other(s.to_string()),
        })
    }
}

impl TryFrom<String> for Mode {
    type Error = BenchError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One input coordinate of a benchmark run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub dataset: String,
    pub mode: Mode,
    pub threads: u64,
}

impl Configuration {
    pub fn new(dataset: impl Into<String>, mode: Mode, threads: u64) -> Self {
        Self {
            dataset: dataset.into(),
            mode,
            threads,
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (threads {})", self.dataset, self.mode, self.threads)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub config: Configuration,
    /// Wall-clock time. Kept as `f64` since loaded results may hold zero or negative values.
    pub seconds: f64,
    /// Per-row baseline, present when the results file records one next to each timing.
    pub baseline_seconds: Option<f64>,
}

impl Measurement {
    pub fn new(config: Configuration, seconds: f64) -> Self {
        Self {
            config,
            seconds,
            baseline_seconds: None,
        }
    }

    pub fn with_baseline(config: Configuration, seconds: f64, baseline_seconds: f64) -> Self {
        Self {
            config,
            seconds,
            baseline_seconds: Some(baseline_seconds),
        }
    }

    pub fn threads(&self) -> u64 {
        self.config.threads
    }

    pub fn millis(&self) -> f64 {
        self.seconds * 1000.0
    }
}
