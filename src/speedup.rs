use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::{BenchError, Result};
use crate::perf::Measurement;

/// Label field that decides which curve a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Dataset,
    Mode,
    DatasetAndMode,
}

impl GroupBy {
    pub fn key(&self, m: &Measurement) -> String {
        match self {
            GroupBy::Dataset => m.config.dataset.clone(),
            GroupBy::Mode => m.config.mode.to_string(),
            GroupBy::DatasetAndMode => format!("{} {}", m.config.dataset, m.config.mode),
        }
    }

    /// Legend title.
    pub fn title(&self) -> &'static str {
        match self {
            GroupBy::Dataset => "Dataset",
            GroupBy::Mode => "Mode",
            GroupBy::DatasetAndMode => "Dataset / Mode",
        }
    }

    /// One dataset with several modes compares modes; several datasets under a
    /// single parallel mode compare datasets; anything else needs both labels.
    pub fn auto(measurements: &[Measurement]) -> GroupBy {
        let datasets: BTreeSet<&str> = measurements
            .iter()
            .map(|m| m.config.dataset.as_str())
            .collect();
        let modes: BTreeSet<&str> = measurements.iter().map(|m| m.config.mode.as_str()).collect();
        let parallel_modes = measurements
            .iter()
            .filter(|m| !m.config.mode.is_sequential())
            .map(|m| m.config.mode.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        if datasets.len() <= 1 && modes.len() > 1 {
            GroupBy::Mode
        } else if parallel_modes <= 1 {
            GroupBy::Dataset
        } else {
            GroupBy::DatasetAndMode
        }
    }
}

impl FromStr for GroupBy {
    type Err = BenchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dataset" | "size" => Ok(GroupBy::Dataset),
            "mode" => Ok(GroupBy::Mode),
            "both" | "dataset-mode" => Ok(GroupBy::DatasetAndMode),
            other => Err(BenchError::config(format!("unknown grouping '{}'", other))),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// `baseline / measured`, or NaN when either duration is not positive.
pub fn speedup(baseline_seconds: f64, seconds: f64) -> f64 {
    if seconds > 0.0 && baseline_seconds > 0.0 {
        baseline_seconds / seconds
    } else {
        f64::NAN
    }
}

/// Partition samples by label. Each group is ordered by thread count; samples
/// with equal thread counts keep their input order.
pub fn group(measurements: &[Measurement], by: GroupBy) -> BTreeMap<String, Vec<&Measurement>> {
    let mut groups: BTreeMap<String, Vec<&Measurement>> = BTreeMap::new();

    for m in measurements {
        groups.entry(by.key(m)).or_default().push(m);
    }

    for members in groups.values_mut() {
        members.sort_by_key(|m| m.threads());
    }

    groups
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedupPoint {
    pub threads: u64,
    pub seconds: f64,
    /// NaN when undefined.
    pub speedup: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedupSeries {
    pub name: String,
    pub points: Vec<SpeedupPoint>,
}

impl SpeedupSeries {
    /// Points with a defined speedup, in thread order.
    pub fn plottable(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.points
            .iter()
            .filter(|p| p.speedup.is_finite())
            .map(|p| (p.threads, p.speedup))
    }

    pub fn best(&self) -> Option<&SpeedupPoint> {
        self.points
            .iter()
            .filter(|p| p.speedup.is_finite())
            .max_by(|a, b| a.speedup.total_cmp(&b.speedup))
    }
}

/// Baseline of `m`: its own recorded baseline, else the sequential or
/// single-thread sample of its dataset within `group`, else the sequential
/// sample of its dataset anywhere in `all`.
pub fn baseline_for(m: &Measurement, group: &[&Measurement], all: &[Measurement]) -> Option<f64> {
    if let Some(baseline) = m.baseline_seconds {
        return Some(baseline);
    }

    let peers = move || {
        group
            .iter()
            .filter(move |other| other.config.dataset == m.config.dataset)
    };

    peers()
        .find(|other| other.config.mode.is_sequential())
        .or_else(|| peers().find(|other| other.threads() == 1))
        .map(|other| other.seconds)
        .or_else(|| {
            all.iter()
                .find(|other| other.config.dataset == m.config.dataset && other.config.mode.is_sequential())
                .map(|other| other.seconds)
        })
}

/// Speedup curves, one per group, in label order.
pub fn compute(measurements: &[Measurement], by: GroupBy) -> Result<Vec<SpeedupSeries>> {
    if measurements.is_empty() {
        return Err(BenchError::NoData);
    }

    let mut series = Vec::new();

    for (name, members) in group(measurements, by) {
        let mut points = Vec::with_capacity(members.len());

        for m in &members {
            let baseline = baseline_for(m, &members, measurements)
                .ok_or_else(|| BenchError::MissingBaseline { group: name.clone() })?;
            let value = speedup(baseline, m.seconds);

            if value.is_nan() {
                warn!(
                    "{}: undefined speedup (baseline {} s, measured {} s), excluded from plot",
                    m.config, baseline, m.seconds
                );
            } else {
                debug!("{}: speedup {:.3}", m.config, value);
            }

            points.push(SpeedupPoint {
                threads: m.threads(),
                seconds: m.seconds,
                speedup: value,
            });
        }

        series.push(SpeedupSeries { name, points });
    }

    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perf::{Configuration, Mode};

    fn sample(dataset: &str, mode: Mode, threads: u64, seconds: f64) -> Measurement {
        Measurement::new(Configuration::new(dataset, mode, threads), seconds)
    }

    fn speedups(series: &SpeedupSeries) -> Vec<f64> {
        series.points.iter().map(|p| p.speedup).collect()
    }

    #[test]
    fn ratio_of_baseline_to_measured() {
        assert_eq!(speedup(10.0, 5.0), 2.0);
        assert_eq!(speedup(10.0, 10.0), 1.0);
        assert!(speedup(10.0, 0.0).is_nan());
        assert!(speedup(10.0, -1.0).is_nan());
        assert!(speedup(0.0, 1.0).is_nan());
    }

    #[test]
    fn halving_durations_doubles_speedup() {
        let data = vec![
            sample("small", Mode::Parfiles, 1, 10.0),
            sample("small", Mode::Parfiles, 2, 5.0),
            sample("small", Mode::Parfiles, 4, 2.5),
        ];

        let series = compute(&data, GroupBy::Dataset).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(speedups(&series[0]), vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn grouping_ignores_row_order() {
        let data = vec![
            sample("big", Mode::Parfiles, 4, 20.0),
            sample("small", Mode::Parfiles, 2, 3.0),
            sample("big", Mode::Parfiles, 1, 80.0),
            sample("small", Mode::Parfiles, 1, 6.0),
            sample("big", Mode::Parfiles, 2, 40.0),
        ];

        let groups = group(&data, GroupBy::Dataset);
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["big", "small"]);
        assert_eq!(groups.values().map(Vec::len).sum::<usize>(), data.len());
        let threads: Vec<u64> = groups["big"].iter().map(|m| m.threads()).collect();
        assert_eq!(threads, vec![1, 2, 4]);

        let mut reversed = data.clone();
        reversed.reverse();
        assert_eq!(
            compute(&data, GroupBy::Dataset).unwrap(),
            compute(&reversed, GroupBy::Dataset).unwrap()
        );
    }

    #[test]
    fn zero_duration_is_undefined_and_not_plotted() {
        let data = vec![
            Measurement::with_baseline(Configuration::new("s", Mode::Other("parallel".into()), 2), 5.0, 10.0),
            Measurement::with_baseline(Configuration::new("s", Mode::Other("parallel".into()), 4), 0.0, 10.0),
        ];

        let series = compute(&data, GroupBy::Dataset).unwrap();
        assert!(series[0].points[1].speedup.is_nan());
        assert_eq!(series[0].plottable().collect::<Vec<_>>(), vec![(2, 2.0)]);
    }

    #[test]
    fn sequential_baseline_shared_across_mode_groups() {
        let data = vec![
            sample("scans", Mode::Sequential, 1, 12.0),
            sample("scans", Mode::Pipeline, 2, 6.0),
            sample("scans", Mode::Pipeline, 4, 4.0),
            sample("scans", Mode::WorkStealing, 2, 8.0),
        ];

        assert_eq!(GroupBy::auto(&data), GroupBy::Mode);
        let series = compute(&data, GroupBy::Mode).unwrap();
        let names: Vec<&str> = series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["pipeline", "sequential", "workstealing"]);
        assert_eq!(speedups(&series[0]), vec![2.0, 3.0]);
        assert_eq!(speedups(&series[1]), vec![1.0]);
        assert_eq!(speedups(&series[2]), vec![1.5]);
    }

    #[test]
    fn sequential_preferred_over_single_thread() {
        let data = vec![
            sample("d", Mode::Sequential, 1, 10.0),
            sample("d", Mode::Parslices, 1, 12.0),
            sample("d", Mode::Parslices, 4, 5.0),
        ];

        let series = compute(&data, GroupBy::Dataset).unwrap();
        assert_eq!(speedups(&series[0]), vec![1.0, 10.0 / 12.0, 2.0]);
    }

    #[test]
    fn missing_baseline_is_an_error() {
        let data = vec![
            sample("d", Mode::Pipeline, 2, 6.0),
            sample("d", Mode::Pipeline, 4, 4.0),
        ];

        match compute(&data, GroupBy::Dataset) {
            Err(BenchError::MissingBaseline { group }) => assert_eq!(group, "d"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(compute(&[], GroupBy::Dataset), Err(BenchError::NoData)));
    }

    #[test]
    fn best_point_skips_undefined() {
        let series = SpeedupSeries {
            name: "x".into(),
            points: vec![
                SpeedupPoint { threads: 1, seconds: 4.0, speedup: 1.0 },
                SpeedupPoint { threads: 2, seconds: 0.0, speedup: f64::NAN },
                SpeedupPoint { threads: 4, seconds: 1.6, speedup: 2.5 },
            ],
        };
        assert_eq!(series.best().map(|p| p.threads), Some(4));
    }

    #[test]
    fn auto_grouping() {
        let by_dataset = vec![
            sample("small", Mode::Parfiles, 1, 1.0),
            sample("big", Mode::Parfiles, 1, 1.0),
        ];
        assert_eq!(GroupBy::auto(&by_dataset), GroupBy::Dataset);

        let mixed = vec![
            sample("small", Mode::Pipeline, 2, 1.0),
            sample("big", Mode::WorkStealing, 2, 1.0),
        ];
        assert_eq!(GroupBy::auto(&mixed), GroupBy::DatasetAndMode);
        assert_eq!(GroupBy::DatasetAndMode.key(&mixed[0]), "small pipeline");
    }
}
