//! CSV and JSON export for run outputs.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::sim::engine::RunOutcome;
use crate::sim::grid::TimeGrid;
use crate::sim::report::Report;
use crate::sim::types::{Allocation, LoadCurve};

/// Column header for load curve CSVs.
const LOAD_HEADER: &str = "timestep,bin_start,total_power_kw";

/// Column header for per-vehicle schedule CSVs.
const SCHEDULE_HEADER: &str = "vehicle_id,timestep,bin_start,power_kw,energy_kwh";

/// Timestamp layout of the `bin_start` column.
const BIN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn bin_start(grid: &TimeGrid, t: usize) -> String {
    grid.timestamp(t).format(BIN_FORMAT).to_string()
}

/// Writes a load curve as CSV, one row per grid step.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_load_csv(curve: &LoadCurve, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(LOAD_HEADER.split(','))?;
    for (t, kw) in curve.points() {
        wtr.write_record(&[
            t.to_string(),
            bin_start(curve.grid(), t),
            format!("{kw:.4}"),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes an allocation as CSV, one row per vehicle and step with non-zero
/// power, vehicles in session order.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_schedule_csv(allocation: &Allocation, writer: impl Write) -> io::Result<()> {
    let grid = allocation.grid();
    let dt = grid.step_hours();
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(SCHEDULE_HEADER.split(','))?;
    for schedule in allocation.schedules() {
        for (t, kw) in schedule.steps().filter(|&(_, kw)| kw > 0.0) {
            wtr.write_record(&[
                schedule.vehicle_id().to_string(),
                t.to_string(),
                bin_start(grid, t),
                format!("{kw:.4}"),
                format!("{:.4}", kw * dt),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the report as pretty-printed JSON.
///
/// # Errors
///
/// Returns an `io::Error` if serialization or writing fails.
pub fn write_summary_json(report: &Report, mut writer: impl Write) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut writer, report)?;
    writeln!(writer)?;
    Ok(())
}

fn create(path: &Path) -> io::Result<io::BufWriter<File>> {
    File::create(path).map(io::BufWriter::new)
}

/// Writes every output of a run into `dir`, creating it if needed.
///
/// Produces `baseline_load.csv`, `optimized_load_<scenario>.csv` and
/// `optimized_schedule_<scenario>.csv` for each solved scenario, and
/// `summary.json`.
///
/// # Returns
///
/// The paths written, in the order above.
///
/// # Errors
///
/// Returns an `io::Error` if the directory or any file cannot be written.
pub fn export_outputs(dir: &Path, run: &RunOutcome) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let path = dir.join("baseline_load.csv");
    write_load_csv(&run.baseline, create(&path)?)?;
    written.push(path);

    for row in &run.report.scenarios {
        let (Some(load), Some(allocation)) = (&row.load, run.allocation(row.scenario)) else {
            continue;
        };
        let path = dir.join(format!("optimized_load_{}.csv", row.scenario));
        write_load_csv(load, create(&path)?)?;
        written.push(path);

        let path = dir.join(format!("optimized_schedule_{}.csv", row.scenario));
        write_schedule_csv(allocation, create(&path)?)?;
        written.push(path);
    }

    let path = dir.join("summary.json");
    write_summary_json(&run.report, create(&path)?)?;
    written.push(path);

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::policy::Scenario;
    use crate::sim::types::VehicleSchedule;
    use chrono::{NaiveDate, TimeDelta};

    fn grid() -> TimeGrid {
        let start = NaiveDate::from_ymd_opt(2026, 2, 17)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid");
        TimeGrid::new(start, start + TimeDelta::hours(2), TimeDelta::minutes(30)).expect("grid")
    }

    fn lines(buf: Vec<u8>) -> Vec<String> {
        String::from_utf8(buf)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn load_csv_has_one_row_per_step() {
        let curve = LoadCurve::from_power(grid(), vec![1.0, 2.5, 0.0, 4.0]);
        let mut buf = Vec::new();
        write_load_csv(&curve, &mut buf).expect("write");
        let lines = lines(buf);
        assert_eq!(lines[0], LOAD_HEADER);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[2], "1,2026-02-17 00:30:00,2.5000");
    }

    #[test]
    fn schedule_csv_omits_idle_steps() {
        let a = VehicleSchedule::new("A".into(), 0..3, vec![4.0, 0.0, 2.0], 3.0, 3.0, 0.0);
        let alloc = Allocation::new(Scenario::Expected, grid(), 10.0, vec![a]);
        let mut buf = Vec::new();
        write_schedule_csv(&alloc, &mut buf).expect("write");
        let lines = lines(buf);
        assert_eq!(lines[0], SCHEDULE_HEADER);
        assert_eq!(
            &lines[1..],
            &[
                "A,0,2026-02-17 00:00:00,4.0000,2.0000".to_string(),
                "A,2,2026-02-17 01:00:00,2.0000,1.0000".to_string(),
            ]
        );
    }
}
