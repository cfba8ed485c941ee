use std::collections::HashMap;
use std::error::Error;
use std::path::Path;

use lazy_static::lazy_static;
use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::info;

use crate::error::{BenchError, Result};
use crate::results::ensure_parent_dir;
use crate::speedup::SpeedupSeries;

const FONT: &str = "sans-serif";
const PLOT_WIDTH: u32 = 1200;
const PLOT_HEIGHT: u32 = 600;

lazy_static! {
    static ref COLOR_MAP: HashMap<&'static str, RGBColor> = {
        let mut m = HashMap::new();
        m.insert("small", BLUE);
        m.insert("mixture", RGBColor(255, 140, 0));
        m.insert("big", GREEN);
        m.insert("sequential", RED);
        m.insert("pipeline", BLUE);
        m.insert("workstealing", GREEN);
        m.insert("parfiles", MAGENTA);
        m.insert("parslices", CYAN);
        m
    };
}

#[derive(Debug, Clone)]
pub struct PlotOptions {
    pub caption: String,
    /// Draw the `y = x` reference line.
    pub ideal_line: bool,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            caption: "Speedup vs Threads".to_string(),
            ideal_line: true,
        }
    }
}

fn series_color(name: &str, index: usize) -> RGBColor {
    COLOR_MAP.get(name).copied().unwrap_or_else(|| {
        let RGBAColor(r, g, b, _) = Palette99::pick(index).to_rgba();
        RGBColor(r, g, b)
    })
}

#[derive(Debug, Clone, PartialEq)]
struct Bounds {
    x_max: u64,
    y_max: f64,
    /// Thread counts that carry an x label.
    ticks: Vec<u64>,
}

impl Bounds {
    fn from_series(series: &[SpeedupSeries], ideal_line: bool) -> Option<Bounds> {
        let points: Vec<(u64, f64)> = series.iter().flat_map(|s| s.plottable()).collect();
        if points.is_empty() {
            return None;
        }

        let mut ticks: Vec<u64> = points.iter().map(|&(x, _)| x).collect();
        ticks.sort_unstable();
        ticks.dedup();

        let x_max = ticks.last().copied().unwrap_or(1).max(1);
        let mut y_max = points.iter().map(|&(_, y)| y).fold(1.0, f64::max);
        if ideal_line {
            y_max = y_max.max(x_max as f64);
        }

        Some(Bounds {
            x_max,
            y_max: y_max * 1.05,
            ticks,
        })
    }
}

fn draw<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    series: &[SpeedupSeries],
    options: &PlotOptions,
    bounds: &Bounds,
) -> std::result::Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(15)
        .caption(&options.caption, (FONT, 24))
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(0..bounds.x_max + 1, 0f64..bounds.y_max)?;

    let ticks = &bounds.ticks;
    chart
        .configure_mesh()
        .x_labels(bounds.x_max as usize + 2)
        .y_labels(12)
        .x_label_formatter(&|v| {
            if ticks.contains(v) {
                v.to_string()
            } else {
                String::new()
            }
        })
        .y_label_formatter(&|v| format!("{:.1}", v))
        .x_desc("Number of Threads")
        .y_desc("Speedup")
        .draw()?;

    if options.ideal_line {
        let ideal = BLACK.mix(0.4);
        chart
            .draw_series(LineSeries::new(
                [(1, 1.0), (bounds.x_max, bounds.x_max as f64)],
                ideal.stroke_width(1),
            ))?
            .label("Ideal")
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], ideal.stroke_width(1)));
    }

    for (index, s) in series.iter().enumerate() {
        let points: Vec<(u64, f64)> = s.plottable().collect();
        if points.is_empty() {
            continue;
        }

        let color = series_color(&s.name, index);

        if points.len() == 1 {
            // A lone baseline reads better as a marker than as a degenerate line.
            chart
                .draw_series(
                    points
                        .iter()
                        .map(|&p| TriangleMarker::new(p, 9, color.filled())),
                )?
                .label(s.name.as_str())
                .legend(move |(x, y)| TriangleMarker::new((x + 10, y), 6, color.filled()));
            continue;
        }

        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))?
            .label(s.name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        chart.draw_series(points.iter().map(|&p| Circle::new(p, 4, color.filled())))?;
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .label_font((FONT, 14))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Render one speedup curve per series. `.svg` paths get an SVG, anything
/// else a PNG. Points with undefined speedup are left out.
pub fn write_plot(series: &[SpeedupSeries], options: &PlotOptions, path: &Path) -> Result<()> {
    let bounds = Bounds::from_series(series, options.ideal_line).ok_or(BenchError::NoData)?;
    ensure_parent_dir(path)?;

    let is_svg = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("svg"));
    let resolution = (PLOT_WIDTH, PLOT_HEIGHT);

    let drawn = if is_svg {
        draw(
            SVGBackend::new(path, resolution).into_drawing_area(),
            series,
            options,
            &bounds,
        )
    } else {
        draw(
            BitMapBackend::new(path, resolution).into_drawing_area(),
            series,
            options,
            &bounds,
        )
    };
    drawn.map_err(|e| BenchError::Plot(e.to_string()))?;

    info!("plot saved as {}", path.display());
    Ok(())
}
