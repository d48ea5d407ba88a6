//! Output Writer (§4.9, ADDED): renders drained `ProbeResult`s, `StatTable`s
//! and `JobMetrics` to a sink (stdout or a file), choosing CSV or JSON for
//! the Results by the `-o` path's extension (§6).

use std::io::Write;
use std::path::Path;

use crate::error::ConfigError;
use crate::model::{JobMetrics, ProbeResult, StatTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Csv,
    Json,
}

/// `.json` on the `-o` path selects JSON; anything else, including the
/// absence of `-o` (stdout), selects CSV (§6).
pub fn format_for_path(path: Option<&str>) -> ResultFormat {
    match path {
        Some(p) if Path::new(p).extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) => {
            ResultFormat::Json
        }
        _ => ResultFormat::Csv,
    }
}

/// Serializes `results` to `format` and writes them, followed by the stat
/// tables and job metrics trailer, to `path` or stdout if `path` is `None`.
pub fn write_report(
    results: &[ProbeResult],
    tables: &[StatTable],
    metrics: &JobMetrics,
    format: ResultFormat,
    path: Option<&str>,
) -> Result<(), ConfigError> {
    let mut body = Vec::new();
    write_results(&mut body, results, format).expect("writing to an in-memory buffer cannot fail");
    for table in tables {
        write_table(&mut body, table).expect("writing to an in-memory buffer cannot fail");
    }
    write_metrics(&mut body, metrics).expect("writing to an in-memory buffer cannot fail");

    match path {
        None => {
            std::io::stdout().write_all(&body).ok();
        }
        Some(path) => {
            std::fs::write(path, &body).map_err(|source| ConfigError::UnwritableOutput {
                path: path.to_string(),
                source,
            })?;
        }
    }
    Ok(())
}

fn write_results(out: &mut impl Write, results: &[ProbeResult], format: ResultFormat) -> std::io::Result<()> {
    match format {
        ResultFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for result in results {
                writer.serialize(result).expect("ProbeResult always serializes");
            }
            let csv_bytes = writer.into_inner().expect("in-memory writer never fails to flush");
            out.write_all(&csv_bytes)?;
        }
        ResultFormat::Json => {
            let json = serde_json::to_string_pretty(results).expect("ProbeResult always serializes");
            out.write_all(json.as_bytes())?;
            out.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn write_table(out: &mut impl Write, table: &StatTable) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", table.name())?;
    match table {
        StatTable::Countable { rows, .. } => {
            for (value, count, percent) in rows {
                writeln!(out, "  {value:<30} {count:>8}  {percent:>6.2}%")?;
            }
        }
        StatTable::Measurable { metrics, .. } => {
            let header: Vec<String> = crate::model::PERCENTILES.iter().map(|p| format!("p{p}")).collect();
            writeln!(out, "  {:<16} {}", "", header.join("  "))?;
            for (label, cols) in metrics {
                let values: Vec<String> = cols.iter().map(|(_, v)| format!("{v:>7.1}")).collect();
                writeln!(out, "  {label:<16} {}", values.join("  "))?;
            }
        }
        StatTable::DescendingProgression { iterations, .. } => {
            for (label, count, percent) in iterations {
                writeln!(out, "  {label:<16} {count:>8}  {percent:>6.2}%")?;
            }
        }
    }
    Ok(())
}

fn write_metrics(out: &mut impl Write, metrics: &JobMetrics) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(out, "Job summary")?;
    writeln!(out, "  duration:              {} ms", metrics.duration_ms)?;
    writeln!(out, "  requests:              {}", metrics.reqs_cnt)?;
    writeln!(out, "  responses:             {}", metrics.resp_cnt)?;
    writeln!(out, "  unique exit node IPs:  {}", metrics.unique_exit_nodes_ip_cnt)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_extension_selects_json_format() {
        assert_eq!(format_for_path(Some("out.json")), ResultFormat::Json);
        assert_eq!(format_for_path(Some("out.JSON")), ResultFormat::Json);
    }

    #[test]
    fn non_json_extension_and_stdout_select_csv() {
        assert_eq!(format_for_path(Some("out.csv")), ResultFormat::Csv);
        assert_eq!(format_for_path(Some("out.txt")), ResultFormat::Csv);
        assert_eq!(format_for_path(None), ResultFormat::Csv);
    }

    #[test]
    fn write_report_to_file_round_trips() {
        use chrono::Utc;
        let result = ProbeResult::new("http://p".into(), "https://t".into(), Utc::now());
        let metrics = JobMetrics {
            duration_ms: 10,
            reqs_cnt: 1,
            resp_cnt: 0,
            unique_exit_nodes_ip_cnt: 0,
        };
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        write_report(&[result], &[], &metrics, ResultFormat::Csv, Some(path)).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("proxy"));
        assert!(contents.contains("Job summary"));
    }
}
