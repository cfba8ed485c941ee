use std::io::{self, Write};

use thousands::Separable;

use crate::speedup::SpeedupSeries;

fn format_ms(seconds: f64) -> String {
    ((seconds * 1000.0).round() as i64).separate_with_commas()
}

fn format_speedup(speedup: f64) -> String {
    if speedup.is_finite() {
        format!("{:.2}", speedup)
    } else {
        "n/a".to_string()
    }
}

pub fn write_summary<W: Write>(out: &mut W, series: &[SpeedupSeries]) -> io::Result<()> {
    writeln!(out, "\nSummary:")?;

    for s in series {
        writeln!(out, "\n{}:", s.name)?;
        writeln!(out, "{:>8} {:>14} {:>8}", "Threads", "Duration_ms", "Speedup")?;
        for p in &s.points {
            writeln!(
                out,
                "{:>8} {:>14} {:>8}",
                p.threads,
                format_ms(p.seconds),
                format_speedup(p.speedup)
            )?;
        }
    }

    writeln!(out, "\nMaximum Speedups Achieved:")?;
    for s in series {
        match s.best() {
            Some(best) => writeln!(
                out,
                "{}: {:.2}x at {} threads",
                s.name, best.speedup, best.threads
            )?,
            None => writeln!(out, "{}: no defined speedup", s.name)?,
        }
    }

    Ok(())
}

pub fn print_summary(series: &[SpeedupSeries]) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = write_summary(&mut out, series);
}
