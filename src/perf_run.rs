use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BenchError, Result};
use crate::perf::{Configuration, Measurement, Mode};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How the external program is launched. The configuration's
/// `(dataset_path, mode, threads)` are appended after `args`.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Prefixed to each dataset label to form the dataset path.
    pub data_dir: Option<PathBuf>,
    /// No limit when `None`: a program that never exits blocks the run.
    pub timeout: Option<Duration>,
    pub fail_on_exit_code: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            data_dir: None,
            timeout: None,
            fail_on_exit_code: false,
        }
    }

    pub fn dataset_path(&self, dataset: &str) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.join(dataset),
            None => PathBuf::from(dataset),
        }
    }
}

#[derive(Debug)]
pub struct RunOutput {
    pub elapsed: Duration,
    pub stdout: String,
    pub status: ExitStatus,
}

/// Kill the child along with anything it started, then reap it.
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    unsafe {
        // The child leads its own process group, see `run_external`.
        libc::killpg(child.id() as libc::pid_t, libc::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Run the program once for `config` and time it from spawn to exit.
pub fn run_external(invocation: &Invocation, config: &Configuration) -> Result<RunOutput> {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .arg(invocation.dataset_path(&config.dataset))
        .arg(config.mode.as_str())
        .arg(config.threads.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped());

    // Launchers like `go run` start the real program as a grandchild.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    debug!("spawning {:?}", command);

    let start = Instant::now();
    let child = command.spawn().map_err(|source| BenchError::Spawn {
        program: invocation.program.clone(),
        source,
    })?;

    // Whatever happens below, never leave the child running.
    let mut child = scopeguard::guard(child, |mut child| {
        if let Ok(None) = child.try_wait() {
            kill_process_tree(&mut child);
        }
    });

    // Drain stdout off-thread so a chatty child cannot block on a full pipe.
    let reader = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf);
            buf
        })
    });

    let status = match invocation.timeout {
        None => child.wait()?,
        Some(limit) => loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            let elapsed = start.elapsed();
            if elapsed >= limit {
                return Err(BenchError::Timeout {
                    config: config.clone(),
                    after: limit,
                });
            }
            thread::sleep(POLL_INTERVAL.min(limit - elapsed));
        },
    };
    let elapsed = start.elapsed();

    let stdout = reader
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default();

    if !status.success() {
        if invocation.fail_on_exit_code {
            return Err(BenchError::ExitStatus {
                config: config.clone(),
                code: status.code(),
            });
        }
        warn!("{} exited with {}", config, status);
    }

    Ok(RunOutput {
        elapsed,
        stdout,
        status,
    })
}

/// How repeated trials of one configuration collapse to a single timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    Mean,
    Median,
    Min,
}

impl Aggregate {
    pub fn apply(&self, samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return f64::NAN;
        }

        match self {
            Aggregate::Mean => samples.iter().sum::<f64>() / samples.len() as f64,
            Aggregate::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregate::Median => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        }
    }
}

impl FromStr for Aggregate {
    type Err = BenchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" | "avg" => Ok(Aggregate::Mean),
            "median" => Ok(Aggregate::Median),
            "min" => Ok(Aggregate::Min),
            other => Err(BenchError::config(format!("unknown aggregate '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub invocation: Invocation,
    pub datasets: Vec<String>,
    pub modes: Vec<Mode>,
    pub threads: Vec<u64>,
    pub trials: usize,
    pub aggregate: Aggregate,
    /// Skip failed parallel configurations instead of aborting.
    /// A failed sequential baseline always aborts.
    pub keep_going: bool,
}

impl Plan {
    /// Datasets, then modes, then thread counts, in the order given.
    /// Sequential mode runs once per dataset at one thread.
    pub fn configurations(&self) -> Vec<Configuration> {
        let mut configs = Vec::new();

        for dataset in &self.datasets {
            for mode in &self.modes {
                if mode.is_sequential() {
                    configs.push(Configuration::new(dataset.clone(), mode.clone(), 1));
                    continue;
                }
                for &threads in &self.threads {
                    configs.push(Configuration::new(dataset.clone(), mode.clone(), threads));
                }
            }
        }

        configs
    }
}

fn run_trials(plan: &Plan, config: &Configuration) -> Result<f64> {
    let mut samples = Vec::with_capacity(plan.trials);

    for trial in 0..plan.trials {
        let output = run_external(&plan.invocation, config)?;
        for line in output.stdout.lines() {
            debug!("[{}] {}", config, line);
        }

        let seconds = output.elapsed.as_secs_f64();
        debug!("{} trial {}: {:.3} s, {}", config, trial + 1, seconds, output.status);
        samples.push(seconds);
    }

    Ok(plan.aggregate.apply(&samples))
}

/// Run every configuration of `plan`, one process at a time.
pub fn run_plan(plan: &Plan) -> Result<Vec<Measurement>> {
    let configs = plan.configurations();
    if configs.is_empty() {
        return Err(BenchError::NoData);
    }

    info!(
        "running {} configurations x {} trial(s) of {}",
        configs.len(),
        plan.trials,
        plan.invocation.program
    );

    let mut measurements = Vec::with_capacity(configs.len());

    for config in configs {
        print!(
            "Run {:10} {:12} (threads {:>3}) ... ",
            config.dataset, config.mode, config.threads
        );
        let _ = io::stdout().flush();

        match run_trials(plan, &config) {
            Ok(seconds) => {
                println!("{:.2} s", seconds);
                measurements.push(Measurement::new(config, seconds));
            }
            Err(e) if plan.keep_going && !config.mode.is_sequential() => {
                println!("failed");
                warn!("skipping {}: {}", config, e);
            }
            Err(e) => {
                println!("failed");
                return Err(e);
            }
        }
    }

    Ok(measurements)
}
