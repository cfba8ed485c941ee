use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use structopt::StructOpt;
use tracing::info;

use crate::error::{BenchError, Result};
use crate::perf::{Measurement, Mode};
use crate::perf_run::{Aggregate, Invocation, Plan};
use crate::speedup::GroupBy;

pub const DEFAULT_DATASETS: [&str; 3] = ["small", "mixture", "big"];
pub const DEFAULT_THREADS: [u64; 6] = [1, 2, 4, 6, 8, 12];
/// Generated worker counts stop here regardless of `--max-workers`.
pub const WORKER_CAP: u64 = 12;

/// Even worker counts from 2 up to `max_workers`, capped at [`WORKER_CAP`].
pub fn worker_counts(max_workers: u64) -> Vec<u64> {
    (2..=max_workers.min(WORKER_CAP)).step_by(2).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupChoice {
    Auto,
    Fixed(GroupBy),
}

impl GroupChoice {
    pub fn resolve(self, measurements: &[Measurement]) -> GroupBy {
        match self {
            GroupChoice::Auto => GroupBy::auto(measurements),
            GroupChoice::Fixed(by) => by,
        }
    }
}

impl FromStr for GroupChoice {
    type Err = BenchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(GroupChoice::Auto)
        } else {
            s.parse().map(GroupChoice::Fixed)
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "speedup-bench",
    about = "Times an external image editor across thread counts and plots the speedup"
)]
pub struct Opt {
    /// More logging (-v debug, -vv trace). RUST_LOG takes precedence.
    #[structopt(short, long, parse(from_occurrences), global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[structopt(short, long, global = true)]
    pub quiet: bool,

    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Run the program for every configuration, then report and plot speedups
    Run(RunOpt),
    /// Report and plot speedups from a results CSV
    Plot(PlotOpt),
}

#[derive(Debug, StructOpt)]
pub struct OutputOpt {
    /// Curve grouping: auto, dataset, mode or both
    #[structopt(long, default_value = "auto")]
    pub group_by: GroupChoice,

    /// Chart file; .svg renders SVG, anything else PNG
    #[structopt(short, long, parse(from_os_str), default_value = "speedup.png")]
    pub output: PathBuf,

    /// Chart caption
    #[structopt(long)]
    pub title: Option<String>,

    /// Leave out the ideal (y = x) line
    #[structopt(long)]
    pub no_ideal: bool,
}

#[derive(Debug, StructOpt)]
pub struct RunOpt {
    /// TOML plan file; command line values override it
    #[structopt(long, parse(from_os_str))]
    pub config: Option<PathBuf>,

    /// Dataset labels [default: small,mixture,big]
    #[structopt(long, use_delimiter = true)]
    pub datasets: Vec<String>,

    /// Mode keywords passed to the program [default: parfiles]
    #[structopt(long, use_delimiter = true)]
    pub modes: Vec<Mode>,

    /// Thread counts [default: 1,2,4,6,8,12]
    #[structopt(long, use_delimiter = true)]
    pub threads: Vec<u64>,

    /// Use worker counts 2,4,.. up to this value (at most 12) instead of --threads
    #[structopt(long)]
    pub max_workers: Option<u64>,

    /// Invocations per configuration [default: 1]
    #[structopt(long)]
    pub trials: Option<usize>,

    /// How trials combine: mean, median or min [default: mean]
    #[structopt(long)]
    pub aggregate: Option<Aggregate>,

    /// Kill an invocation after this many seconds
    #[structopt(long)]
    pub timeout: Option<f64>,

    /// Directory holding the datasets
    #[structopt(long, parse(from_os_str))]
    pub data_dir: Option<PathBuf>,

    /// Treat a non-zero exit status as a failed run
    #[structopt(long)]
    pub fail_on_exit_code: bool,

    /// Abort on the first failed configuration
    #[structopt(long)]
    pub no_keep_going: bool,

    /// Also write the results table here
    #[structopt(long, parse(from_os_str))]
    pub save_csv: Option<PathBuf>,

    #[structopt(flatten)]
    pub output: OutputOpt,

    /// Program and its leading arguments, after `--`
    #[structopt(last = true)]
    pub command: Vec<String>,
}

#[derive(Debug, StructOpt)]
pub struct PlotOpt {
    /// Results CSV
    #[structopt(short, long, parse(from_os_str))]
    pub input: PathBuf,

    /// Dataset label for every row, overriding the file's own
    #[structopt(long)]
    pub dataset: Option<String>,

    #[structopt(flatten)]
    pub output: OutputOpt,
}

/// Benchmark plan as read from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub datasets: Option<Vec<String>>,
    pub modes: Option<Vec<Mode>>,
    pub threads: Option<Vec<u64>>,
    pub max_workers: Option<u64>,
    pub trials: Option<usize>,
    pub aggregate: Option<Aggregate>,
    pub timeout_secs: Option<f64>,
    pub data_dir: Option<PathBuf>,
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| BenchError::config(format!("{}: {}", path.display(), e)))?;
        text.parse::<PlanFile>()
            .map_err(|e| BenchError::config(format!("{}: {}", path.display(), e)))
    }
}

impl FromStr for PlanFile {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

fn non_empty<T>(v: &[T]) -> Option<Vec<T>>
where
    T: Clone,
{
    if v.is_empty() {
        None
    } else {
        Some(v.to_vec())
    }
}

impl RunOpt {
    pub fn plan(&self) -> Result<Plan> {
        let file = match &self.config {
            Some(path) => PlanFile::load(path)?,
            None => PlanFile::default(),
        };
        self.merge(file)
    }

    fn merge(&self, file: PlanFile) -> Result<Plan> {
        let mut invocation = match self.command.split_first() {
            Some((program, args)) => {
                let mut invocation = Invocation::new(program.clone());
                invocation.args = args.to_vec();
                invocation
            }
            None => match file.program {
                Some(program) => {
                    let mut invocation = Invocation::new(program);
                    invocation.args = file.args;
                    invocation
                }
                None => {
                    return Err(BenchError::config(
                        "no program to benchmark; pass it after `--` or set `program` in the plan file",
                    ))
                }
            },
        };

        let datasets = non_empty(&self.datasets)
            .or(file.datasets)
            .unwrap_or_else(|| DEFAULT_DATASETS.iter().map(|s| s.to_string()).collect());
        let mut modes = non_empty(&self.modes)
            .or(file.modes)
            .unwrap_or_else(|| vec![Mode::Parfiles]);

        let max_workers = match (self.max_workers, non_empty(&self.threads)) {
            (Some(max), _) => Some(max),
            (None, Some(_)) => None,
            (None, None) => file.max_workers,
        };
        let threads = match max_workers {
            Some(max) => worker_counts(max),
            None => non_empty(&self.threads)
                .or(file.threads)
                .unwrap_or_else(|| DEFAULT_THREADS.to_vec()),
        };

        // Generated worker counts start at 2, so the sweep needs its sequential baseline.
        if max_workers.is_some() && !modes.iter().any(Mode::is_sequential) {
            info!("adding a sequential baseline run to the worker sweep");
            modes.insert(0, Mode::Sequential);
        }

        let trials = self.trials.or(file.trials).unwrap_or(1);
        let aggregate = self.aggregate.or(file.aggregate).unwrap_or_default();

        invocation.data_dir = self.data_dir.clone().or(file.data_dir);
        invocation.timeout = match self.timeout.or(file.timeout_secs) {
            Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            Some(secs) => {
                return Err(BenchError::config(format!(
                    "timeout must be a positive number of seconds, got {}",
                    secs
                )))
            }
            None => None,
        };
        invocation.fail_on_exit_code = self.fail_on_exit_code;

        if datasets.is_empty() {
            return Err(BenchError::config("no datasets"));
        }
        if modes.is_empty() {
            return Err(BenchError::config("no modes"));
        }
        if trials == 0 {
            return Err(BenchError::config("trials must be at least 1"));
        }
        let needs_threads = modes.iter().any(|m| !m.is_sequential());
        if needs_threads && threads.is_empty() {
            return Err(BenchError::config("no thread counts to run"));
        }
        if threads.contains(&0) {
            return Err(BenchError::config("thread counts must be at least 1"));
        }
        if !modes.iter().any(Mode::is_sequential) && !threads.contains(&1) {
            return Err(BenchError::config(
                "no baseline: add the sequential mode or thread count 1",
            ));
        }

        Ok(Plan {
            invocation,
            datasets,
            modes,
            threads,
            trials,
            aggregate,
            keep_going: !self.no_keep_going,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_opt(args: &[&str]) -> RunOpt {
        let mut argv = vec!["speedup-bench", "run"];
        argv.extend_from_slice(args);
        match Opt::from_iter_safe(argv).unwrap().cmd {
            Command::Run(opt) => opt,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn generated_worker_counts() {
        assert_eq!(worker_counts(16), vec![2, 4, 6, 8, 10, 12]);
        assert_eq!(worker_counts(5), vec![2, 4]);
        assert!(worker_counts(1).is_empty());
    }

    #[test]
    fn defaults_follow_the_thread_sweep() {
        let opt = run_opt(&["--", "go", "run", "editor/editor.go"]);
        let plan = opt.plan().unwrap();

        assert_eq!(plan.invocation.program, "go");
        assert_eq!(plan.invocation.args, vec!["run", "editor/editor.go"]);
        assert_eq!(plan.datasets, vec!["small", "mixture", "big"]);
        assert_eq!(plan.modes, vec![Mode::Parfiles]);
        assert_eq!(plan.threads, DEFAULT_THREADS.to_vec());
        assert_eq!(plan.trials, 1);
        assert_eq!(plan.aggregate, Aggregate::Mean);
        assert!(plan.invocation.timeout.is_none());
        assert!(plan.keep_going);
        assert_eq!(opt.output.output, PathBuf::from("speedup.png"));
        assert_eq!(opt.output.group_by, GroupChoice::Auto);
    }

    #[test]
    fn command_line_lists() {
        let opt = run_opt(&[
            "--datasets",
            "scans",
            "--modes",
            "sequential,pipeline,work-stealing",
            "--max-workers",
            "8",
            "--trials",
            "3",
            "--aggregate",
            "median",
            "--timeout",
            "1.5",
            "--group-by",
            "mode",
            "--",
            "./process-dicom",
        ]);
        let plan = opt.plan().unwrap();

        assert_eq!(plan.datasets, vec!["scans"]);
        assert_eq!(
            plan.modes,
            vec![Mode::Sequential, Mode::Pipeline, Mode::WorkStealing]
        );
        assert_eq!(plan.threads, vec![2, 4, 6, 8]);
        assert_eq!(plan.trials, 3);
        assert_eq!(plan.aggregate, Aggregate::Median);
        assert_eq!(plan.invocation.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(opt.output.group_by, GroupChoice::Fixed(GroupBy::Mode));
    }

    #[test]
    fn plan_file_with_command_line_override() {
        let file: PlanFile = r#"
            program = "go"
            args = ["run", "../editor/editor.go"]
            datasets = ["small", "big"]
            modes = ["parslices"]
            threads = [1, 2, 4]
            trials = 2
            aggregate = "min"
            timeout_secs = 600
            data_dir = "data"
        "#
        .parse()
        .unwrap();

        let opt = run_opt(&["--threads", "1,8", "--trials", "5"]);
        let plan = opt.merge(file).unwrap();

        assert_eq!(plan.invocation.program, "go");
        assert_eq!(plan.invocation.args, vec!["run", "../editor/editor.go"]);
        assert_eq!(plan.invocation.data_dir, Some(PathBuf::from("data")));
        assert_eq!(plan.invocation.timeout, Some(Duration::from_secs(600)));
        assert_eq!(plan.datasets, vec!["small", "big"]);
        assert_eq!(plan.modes, vec![Mode::Parslices]);
        assert_eq!(plan.threads, vec![1, 8]);
        assert_eq!(plan.trials, 5);
        assert_eq!(plan.aggregate, Aggregate::Min);
    }

    #[test]
    fn plan_file_rejects_unknown_keys() {
        assert!("program = \"x\"\nthread = [1]\n".parse::<PlanFile>().is_err());
    }

    #[test]
    fn invalid_plans() {
        assert!(run_opt(&[]).plan().is_err());
        assert!(run_opt(&["--trials", "0", "--", "editor"]).plan().is_err());
        assert!(run_opt(&["--threads", "0,2", "--", "editor"]).plan().is_err());
        assert!(run_opt(&["--timeout=-1", "--", "editor"]).plan().is_err());
        assert!(run_opt(&["--max-workers", "1", "--", "editor"]).plan().is_err());

        let sequential_only = run_opt(&["--modes", "sequential", "--max-workers", "1", "--", "editor"]);
        assert!(sequential_only.plan().is_ok());
    }

    #[test]
    fn worker_sweep_gets_a_sequential_baseline() {
        let plan = run_opt(&["--datasets", "small", "--max-workers", "4", "--", "editor"])
            .plan()
            .unwrap();
        assert_eq!(plan.modes, vec![Mode::Sequential, Mode::Parfiles]);
        assert_eq!(plan.threads, vec![2, 4]);

        let file: PlanFile = "program = \"editor\"\nmodes = [\"pipeline\"]\nmax_workers = 6\n"
            .parse()
            .unwrap();
        let plan = run_opt(&[]).merge(file).unwrap();
        assert_eq!(plan.modes, vec![Mode::Sequential, Mode::Pipeline]);
        assert_eq!(plan.threads, vec![2, 4, 6]);
    }

    #[test]
    fn plan_without_baseline_is_rejected() {
        match run_opt(&["--threads", "2,4", "--", "editor"]).plan() {
            Err(BenchError::Config(message)) => assert!(message.contains("baseline")),
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(run_opt(&["--threads", "1,4", "--", "editor"]).plan().is_ok());
        assert!(run_opt(&["--modes", "sequential,pipeline", "--threads", "2,4", "--", "editor"])
            .plan()
            .is_ok());
    }

    #[test]
    fn plot_command() {
        let opt = Opt::from_iter_safe([
            "speedup-bench",
            "-v",
            "plot",
            "-i",
            "benchmark_results/results.csv",
            "-o",
            "speedup.svg",
            "--group-by",
            "both",
        ])
        .unwrap();

        assert_eq!(opt.verbose, 1);
        match opt.cmd {
            Command::Plot(plot) => {
                assert_eq!(plot.input, PathBuf::from("benchmark_results/results.csv"));
                assert_eq!(plot.output.output, PathBuf::from("speedup.svg"));
                assert_eq!(
                    plot.output.group_by,
                    GroupChoice::Fixed(GroupBy::DatasetAndMode)
                );
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!("auto".parse::<GroupChoice>().is_ok());
        assert!("threads".parse::<GroupChoice>().is_err());
    }
}
