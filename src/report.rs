//! Scenario report records and JSON output

use crate::scenario::{ResultCode, Scenario};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Report errors
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of one scenario execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub id: u32,
    pub name: String,
    pub code: ResultCode,
    /// One-line account of what happened
    pub summary: String,
    pub duration_ms: u64,
}

impl ScenarioReport {
    pub fn new(
        scenario: &dyn Scenario,
        code: ResultCode,
        summary: impl Into<String>,
        duration: Duration,
    ) -> Self {
        ScenarioReport {
            id: scenario.id(),
            name: scenario.name().to_string(),
            code,
            summary: summary.into(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// The scenario could not run
    pub fn not_ready(
        scenario: &dyn Scenario,
        reason: impl std::fmt::Display,
        duration: Duration,
    ) -> Self {
        ScenarioReport::new(scenario, ResultCode::NotReady, reason.to_string(), duration)
    }
}

#[derive(Serialize)]
struct ReportFile<'a> {
    scenarios: &'a [ScenarioReport],
    findings: usize,
}

/// Encode reports as a pretty-printed JSON document
pub fn to_json(reports: &[ScenarioReport]) -> Result<String, ReportError> {
    let file = ReportFile {
        scenarios: reports,
        findings: reports.iter().filter(|r| r.code.is_finding()).count(),
    };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Write reports to `path`, replacing any previous content
pub fn write_json<P: AsRef<Path>>(path: P, reports: &[ScenarioReport]) -> Result<(), ReportError> {
    let path = path.as_ref();
    let json = to_json(reports)?;
    fs::write(path, json).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), scenarios = reports.len(), "report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::find;
    use tempfile::TempDir;

    fn sample() -> Vec<ScenarioReport> {
        let two = find(2).unwrap();
        let eight = find(8).unwrap();
        vec![
            ScenarioReport::new(
                two.as_ref(),
                ResultCode::CertAccepted,
                "127.0.0.1:4000: TLSv1.3 TLS_AES_256_GCM_SHA384, no data before timeout",
                Duration::from_millis(1500),
            ),
            ScenarioReport::not_ready(eight.as_ref(), "SSLv2 is not supported", Duration::ZERO),
        ]
    }

    #[test]
    fn test_report_fields() {
        let reports = sample();
        assert_eq!(reports[0].id, 2);
        assert_eq!(reports[0].duration_ms, 1500);
        assert_eq!(reports[1].code, ResultCode::NotReady);
        assert_eq!(reports[1].summary, "SSLv2 is not supported");
    }

    #[test]
    fn test_json_document() {
        let json = to_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["findings"], 1);
        assert_eq!(value["scenarios"][0]["code"], "CERT_ACCEPTED");
        assert_eq!(value["scenarios"][1]["id"], 8);
        assert_eq!(value["scenarios"][1]["code"], "NOT_READY");
    }

    #[test]
    fn test_write_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");

        write_json(&path, &sample()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("\"PROTO_ACCEPTED\""));
        assert!(written.contains("\"CERT_ACCEPTED\""));
    }

    #[test]
    fn test_write_json_to_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("report.json");
        assert!(matches!(
            write_json(&path, &sample()),
            Err(ReportError::Io { .. })
        ));
    }
}
