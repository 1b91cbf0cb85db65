// crates/inference-loadtest/src/report.rs
use std::{
    fmt::Write as _,
    fs::{self, OpenOptions},
    io::BufWriter,
    path::Path,
};

use anyhow::{anyhow, bail, Context, Result};
use plotters::prelude::*;

use crate::stats::StatsSnapshot;

const FIGURE_SIZE: (u32, u32) = (2000, 1000);

/// Project the history into the two plotted series: (throughput, P90) and
/// (throughput, P95), one point per snapshot.
pub fn chart_series(history: &[StatsSnapshot]) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
    let p90 = history
        .iter()
        .map(|s| (s.current_rps, s.response_time_percentile_90))
        .collect();
    let p95 = history
        .iter()
        .map(|s| (s.current_rps, s.response_time_percentile_95))
        .collect();
    (p90, p95)
}

/// Format the history as an aligned text table, one row per snapshot.
pub fn render_table(history: &[StatsSnapshot]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>8} {:>10} {:>10} {:>10} {:>10} {:>10} {:>6}",
        "time", "rps", "fail/s", "p90(ms)", "p95(ms)", "avg(ms)", "users"
    );
    for s in history {
        let _ = writeln!(
            out,
            "{:>8} {:>10.2} {:>10.2} {:>10.1} {:>10.1} {:>10.1} {:>6}",
            s.time,
            s.current_rps,
            s.current_fail_per_sec,
            s.response_time_percentile_90,
            s.response_time_percentile_95,
            s.avg_response_time,
            s.user_count
        );
    }
    out
}

/// Render the latency/throughput chart to `path` as a raster image. The
/// format follows the file extension (jpg, png, bmp). A render or write
/// failure is fatal to the run.
pub fn render_chart(history: &[StatsSnapshot], path: &Path) -> Result<()> {
    if history.is_empty() {
        bail!("no snapshots were recorded; nothing to plot");
    }

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).with_context(|| {
                format!("failed to create figure directory {}", dir.display())
            })?;
        }
    }

    let (p90, p95) = chart_series(history);
    let (x_min, x_max) = axis_range(history.iter().map(|s| s.current_rps));
    let (y_min, y_max) = axis_range(
        p90.iter()
            .map(|point| point.1)
            .chain(p95.iter().map(|point| point.1)),
    );

    let root = BitMapBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|err| anyhow!("failed to clear chart canvas: {err}"))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Latency/Throughput", ("sans-serif", 40))
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(90)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(|err| anyhow!("failed to build chart axes: {err}"))?;

    chart
        .configure_mesh()
        .x_desc("Request/sec")
        .y_desc("Latency (ms)")
        .axis_desc_style(("sans-serif", 24))
        .label_style(("sans-serif", 18))
        .draw()
        .map_err(|err| anyhow!("failed to draw chart mesh: {err}"))?;

    chart
        .draw_series(LineSeries::new(p90.iter().copied(), &BLUE))
        .map_err(|err| anyhow!("failed to draw P90 series: {err}"))?
        .label("P90 Latency")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
    chart
        .draw_series(
            p90.iter()
                .map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())),
        )
        .map_err(|err| anyhow!("failed to draw P90 markers: {err}"))?;

    chart
        .draw_series(LineSeries::new(p95.iter().copied(), &RED))
        .map_err(|err| anyhow!("failed to draw P95 series: {err}"))?
        .label("P95 Latency")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    chart
        .draw_series(
            p95.iter()
                .map(|&(x, y)| Circle::new((x, y), 4, RED.filled())),
        )
        .map_err(|err| anyhow!("failed to draw P95 markers: {err}"))?;

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .label_font(("sans-serif", 22))
        .draw()
        .map_err(|err| anyhow!("failed to draw chart legend: {err}"))?;

    root.present()
        .map_err(|err| anyhow!("failed to write figure to {}: {err}", path.display()))?;
    Ok(())
}

/// Persist the snapshot history as pretty-printed JSON.
pub fn write_history_json(path: &Path, history: &[StatsSnapshot]) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).with_context(|| {
                format!("failed to create history output directory {}", dir.display())
            })?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to open history output path {}", path.display()))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, history)
        .with_context(|| format!("failed to write history to {}", path.display()))?;
    Ok(())
}

fn axis_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for value in values {
        min = min.min(value);
        max = max.max(value);
    }
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        // all snapshots carry the same value; pad so the axis is non-empty
        let pad = max.abs().max(1.0) * 0.1;
        return (min - pad, max + pad);
    }
    let pad = (max - min) * 0.05;
    (min - pad, max + pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_history(len: usize) -> Vec<StatsSnapshot> {
        (0..len)
            .map(|i| StatsSnapshot {
                time: format!("00:00:{:02}", i),
                elapsed_secs: i as f64 * 0.5,
                current_rps: 10.0 + i as f64,
                current_fail_per_sec: 0.0,
                response_time_percentile_90: 120.0 + i as f64 * 3.0,
                response_time_percentile_95: 150.0 + i as f64 * 3.0,
                avg_response_time: 100.0 + i as f64 * 2.0,
                user_count: (i + 1) as u64,
            })
            .collect()
    }

    #[test]
    fn series_have_one_point_per_snapshot() {
        let history = synthetic_history(7);
        let (p90, p95) = chart_series(&history);
        assert_eq!(p90.len(), history.len());
        assert_eq!(p95.len(), history.len());
        assert_eq!(p90[0], (10.0, 120.0));
        assert_eq!(p95[6], (16.0, 168.0));
    }

    #[test]
    fn table_has_header_and_one_row_per_snapshot() {
        let history = synthetic_history(4);
        let table = render_table(&history);
        assert_eq!(table.lines().count(), 5);
        assert!(table.lines().next().expect("header").contains("p90(ms)"));
    }

    #[test]
    fn chart_is_written_and_non_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("figure.png");
        let history = synthetic_history(8);

        render_chart(&history, &path).expect("render chart");
        let len = fs::metadata(&path).expect("figure exists").len();
        assert!(len > 0, "figure file must not be empty");
    }

    #[test]
    fn rendering_twice_overwrites_deterministically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("figure.png");
        let history = synthetic_history(5);

        render_chart(&history, &path).expect("first render");
        let first = fs::metadata(&path).expect("figure exists").len();
        render_chart(&history, &path).expect("second render");
        let second = fs::metadata(&path).expect("figure exists").len();
        assert!(first > 0 && second > 0);
    }

    #[test]
    fn single_snapshot_still_renders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("figure.png");
        render_chart(&synthetic_history(1), &path).expect("render chart");
        assert!(fs::metadata(&path).expect("figure exists").len() > 0);
    }

    #[test]
    fn empty_history_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("figure.png");
        let err = render_chart(&[], &path).expect_err("empty history must fail");
        assert!(err.to_string().contains("no snapshots"));
    }

    #[test]
    fn history_json_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.json");
        let history = synthetic_history(3);

        write_history_json(&path, &history).expect("write history");
        let raw = fs::read_to_string(&path).expect("read history");
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("parse history");
        assert_eq!(parsed.as_array().map(Vec::len), Some(3));
        assert_eq!(parsed[0]["user_count"], 1);
    }

    #[test]
    fn axis_range_pads_degenerate_input() {
        let (min, max) = axis_range([5.0, 5.0, 5.0].into_iter());
        assert!(min < 5.0 && max > 5.0);
        let (min, max) = axis_range(std::iter::empty::<f64>());
        assert_eq!((min, max), (0.0, 1.0));
    }
}
