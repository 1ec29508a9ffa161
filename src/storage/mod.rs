//! Run artifacts.
//!
//! Run summaries are saved as pretty JSON; the per-epoch log and the sweep
//! table are written as CSV with a header row.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::backtest::sweep::SummaryRecord;
use crate::engine::{EpochRecord, RunSummary};

/// Default summary file path.
const DEFAULT_SUMMARY_FILE: &str = "predictoor_summary.json";

/// Fixed leading columns of the sweep table; override names follow.
const SWEEP_COLUMNS: [&str; 9] = [
    "accuracy_estimate",
    "accuracy_lower",
    "accuracy_upper",
    "f1",
    "precision",
    "recall",
    "total",
    "missed",
    "profit",
];

/// Save a run summary to a JSON file.
pub fn save_summary(summary: &RunSummary, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_SUMMARY_FILE);
    let json = serde_json::to_string_pretty(summary).context("Failed to serialise run summary")?;

    std::fs::write(path, &json).context(format!("Failed to write summary to {path}"))?;

    debug!(path, epochs = summary.epochs, "Summary saved");
    Ok(())
}

/// Load a run summary from a JSON file.
/// Returns None if the file doesn't exist.
pub fn load_summary(path: Option<&str>) -> Result<Option<RunSummary>> {
    let path = path.unwrap_or(DEFAULT_SUMMARY_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved summary found");
        return Ok(None);
    }

    let json =
        std::fs::read_to_string(path).context(format!("Failed to read summary from {path}"))?;
    let summary: RunSummary =
        serde_json::from_str(&json).context(format!("Failed to parse summary from {path}"))?;

    Ok(Some(summary))
}

/// Write one CSV row per scored epoch.
pub fn write_epoch_log(records: &[EpochRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create epoch log {}", path.display()))?;
    for record in records {
        writer.serialize(record).context("Failed to write epoch log row")?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = records.len(), "Epoch log written");
    Ok(())
}

/// Write one row per sweep combination, header first.
pub fn write_sweep_csv(records: &[SummaryRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create sweep table {}", path.display()))?;

    let mut header: Vec<String> = SWEEP_COLUMNS.iter().map(|c| c.to_string()).collect();
    if let Some(first) = records.first() {
        header.extend(first.overrides.iter().map(|v| v.name().to_string()));
    }
    writer.write_record(&header)?;

    for record in records {
        let m = &record.summary.metrics;
        let mut row = vec![
            format!("{:.6}", m.accuracy_estimate),
            format!("{:.6}", m.accuracy_lower),
            format!("{:.6}", m.accuracy_upper),
            format!("{:.6}", m.f1),
            format!("{:.6}", m.precision),
            format!("{:.6}", m.recall),
            m.total.to_string(),
            m.missed.to_string(),
            m.profit.to_string(),
        ];
        row.extend(record.overrides.iter().map(|v| v.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = records.len(), "Sweep table written");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::sweep::ParamValue;
    use crate::engine::RunningMetrics;
    use crate::types::{EpochStatus, Timeframe};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn make_summary() -> RunSummary {
        let metrics = RunningMetrics {
            correct_up: 3,
            correct_down: 3,
            total: 10,
            missed: 2,
            profit: dec!(12.5),
            ..Default::default()
        };
        RunSummary {
            asset_pair: "BTC/USDT".into(),
            timeframe: Timeframe::M5,
            epochs: 12,
            accepted: 10,
            missed: 2,
            attempts: 26,
            metrics: metrics.summary(),
        }
    }

    #[test]
    fn test_save_and_load_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let path = path.to_str().unwrap();
        let summary = make_summary();
        save_summary(&summary, Some(path)).unwrap();

        let loaded = load_summary(Some(path)).unwrap().unwrap();
        assert_eq!(loaded.epochs, 12);
        assert_eq!(loaded.metrics.total, 10);
        assert_eq!(loaded.metrics.profit, dec!(12.5));
    }

    #[test]
    fn test_load_missing_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(load_summary(path.to_str()).unwrap().is_none());
    }

    #[test]
    fn test_epoch_log_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epochs.csv");
        let record = EpochRecord {
            epoch_index: 5_666_666,
            start_time: Utc.timestamp_opt(1_699_999_800, 0).unwrap(),
            status: EpochStatus::Accepted,
            cycles: 1,
            prob_up: Some(0.7),
            stake_up: dec!(2100),
            stake_down: dec!(900),
            realized_up: true,
            price_delta: 1.5,
            correct: Some(true),
            profit: Decimal::ZERO,
        };
        write_epoch_log(&[record.clone(), record], &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("epoch_index,start_time,status"));
        assert!(lines[1].contains("accepted"));
    }

    #[test]
    fn test_sweep_csv_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");
        let records: Vec<SummaryRecord> = [dec!(100), dec!(200)]
            .iter()
            .map(|b| SummaryRecord {
                overrides: vec![ParamValue::Budget(*b), ParamValue::LeadSecs(30)],
                summary: make_summary(),
            })
            .collect();
        write_sweep_csv(&records, &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(&header[0], "accuracy_estimate");
        assert_eq!(&header[9], "budget");
        assert_eq!(&header[10], "submission_lead_secs");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][9], "200");
        assert_eq!(&rows[0][6], "10");
    }
}
