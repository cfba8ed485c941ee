use config::{Command, Opt, OutputOpt, PlotOpt, RunOpt};
use error::Result;
use perf::Measurement;
use plot::PlotOptions;
use speedup::GroupBy;
use structopt::StructOpt;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod perf;
mod perf_info;
mod perf_run;
mod plot;
mod report;
mod results;
mod speedup;

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let opt = Opt::from_args();
    init_logging(opt.verbose, opt.quiet);

    let outcome = match opt.cmd {
        Command::Run(run) => run_benchmarks(&run),
        Command::Plot(plot) => plot_results(&plot),
    };

    if let Err(e) = outcome {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run_benchmarks(opt: &RunOpt) -> Result<()> {
    let plan = opt.plan()?;

    perf_info::write_host_info();
    let cpus = perf_info::logical_cpus() as u64;
    if let Some(&most) = plan.threads.iter().max() {
        if most > cpus {
            warn!("{} threads requested but only {} logical cpus", most, cpus);
        }
    }

    let measurements = perf_run::run_plan(&plan)?;
    let by = opt.output.group_by.resolve(&measurements);

    if let Some(path) = &opt.save_csv {
        results::save_csv(path, &measurements, by)?;
    }

    render(&measurements, &opt.output, by)
}

fn plot_results(opt: &PlotOpt) -> Result<()> {
    let mut measurements = results::load_csv(&opt.input)?;

    if let Some(label) = &opt.dataset {
        for m in &mut measurements {
            m.config.dataset = label.clone();
        }
    }

    let by = opt.output.group_by.resolve(&measurements);
    render(&measurements, &opt.output, by)
}

fn render(measurements: &[Measurement], output: &OutputOpt, by: GroupBy) -> Result<()> {
    let series = speedup::compute(measurements, by)?;
    report::print_summary(&series);

    let options = PlotOptions {
        caption: output
            .title
            .clone()
            .unwrap_or_else(|| format!("Speedup vs Threads by {}", by.title())),
        ideal_line: !output.no_ideal,
    };
    plot::write_plot(&series, &options, &output.output)?;

    println!("\nPlot saved as {}", output.output.display());
    Ok(())
}
