use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BenchError, Result};
use crate::perf::{Configuration, Measurement, Mode};
use crate::speedup::{self, GroupBy};

/// `test_size,threads,sequential_time,parallel_time`, times in seconds.
#[derive(Debug, Deserialize)]
struct SizeThreadsRow {
    test_size: String,
    threads: u64,
    sequential_time: f64,
    parallel_time: f64,
}

/// `Mode,Workers,Duration_ms[,Dataset][,...]`. Other columns are ignored.
#[derive(Debug, Deserialize)]
struct ModeWorkersRow {
    #[serde(rename = "Mode")]
    mode: Mode,
    #[serde(rename = "Workers")]
    workers: u64,
    #[serde(rename = "Duration_ms")]
    duration_ms: f64,
    #[serde(rename = "Dataset", default)]
    dataset: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResultRow<'a> {
    #[serde(rename = "Mode")]
    mode: &'a str,
    #[serde(rename = "Workers")]
    workers: u64,
    #[serde(rename = "Duration_ms")]
    duration_ms: String,
    #[serde(rename = "Dataset")]
    dataset: &'a str,
    #[serde(rename = "Speedup")]
    speedup: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    SizeThreads,
    ModeWorkers,
}

fn detect_layout(path: &Path, headers: &csv::StringRecord) -> Result<Layout> {
    let has = |name: &str| headers.iter().any(|h| h == name);

    if has("test_size") && has("threads") && has("sequential_time") && has("parallel_time") {
        Ok(Layout::SizeThreads)
    } else if has("Mode") && has("Workers") && has("Duration_ms") {
        Ok(Layout::ModeWorkers)
    } else {
        Err(BenchError::Format {
            path: path.to_path_buf(),
            message: format!(
                "header [{}] has neither test_size/threads/sequential_time/parallel_time \
                 nor Mode/Workers/Duration_ms",
                headers.iter().collect::<Vec<_>>().join(", ")
            ),
        })
    }
}

fn row_error(path: &Path, err: csv::Error) -> BenchError {
    let row = err.position().map(|p| p.line()).unwrap_or(0);
    let message = match err.kind() {
        csv::ErrorKind::Deserialize { err, .. } => err.to_string(),
        _ => err.to_string(),
    };
    BenchError::row(path, row, message)
}

/// Load a results table written by an earlier run.
pub fn load_csv(path: &Path) -> Result<Vec<Measurement>> {
    let csv_error = |source: csv::Error| BenchError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_error)?;

    let headers = reader.headers().map_err(csv_error)?.clone();
    let layout = detect_layout(path, &headers)?;
    debug!("{}: {:?} layout", path.display(), layout);

    let mut measurements = Vec::new();

    match layout {
        Layout::SizeThreads => {
            for row in reader.deserialize::<SizeThreadsRow>() {
                let row = row.map_err(|e| row_error(path, e))?;
                let config = Configuration::new(row.test_size, Mode::Other("parallel".into()), row.threads);
                measurements.push(Measurement::with_baseline(
                    config,
                    row.parallel_time,
                    row.sequential_time,
                ));
            }
        }
        Layout::ModeWorkers => {
            let default_dataset = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "results".to_string());

            for row in reader.deserialize::<ModeWorkersRow>() {
                let row = row.map_err(|e| row_error(path, e))?;
                let dataset = row
                    .dataset
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| default_dataset.clone());
                let config = Configuration::new(dataset, row.mode, row.workers);
                measurements.push(Measurement::new(config, row.duration_ms / 1000.0));
            }
        }
    }

    info!("loaded {} rows from {}", measurements.len(), path.display());
    Ok(measurements)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Persist measurements as `Mode,Workers,Duration_ms,Dataset,Speedup`.
/// Undefined or baseline-less speedups are left empty.
pub fn save_csv(path: &Path, measurements: &[Measurement], by: GroupBy) -> Result<()> {
    let csv_error = |source: csv::Error| BenchError::Csv {
        path: path.to_path_buf(),
        source,
    };

    ensure_parent_dir(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    let groups = speedup::group(measurements, by);

    for m in measurements {
        let members = groups.get(&by.key(m)).map(Vec::as_slice).unwrap_or(&[]);
        let value = speedup::baseline_for(m, members, measurements)
            .map(|baseline| speedup::speedup(baseline, m.seconds))
            .filter(|s| s.is_finite());

        writer
            .serialize(ResultRow {
                mode: m.config.mode.as_str(),
                workers: m.threads(),
                duration_ms: m.millis().to_string(),
                dataset: &m.config.dataset,
                speedup: value.map(|s| format!("{:.4}", s)),
            })
            .map_err(csv_error)?;
    }

    writer.flush()?;
    info!("wrote {} rows to {}", measurements.len(), path.display());
    Ok(())
}
