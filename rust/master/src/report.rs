//! Result-file readback
//!
//! On success the slave leaves a text artifact in the master-specified
//! folder. The master reads it for display and extracts the
//! slave-reported elapsed time from `Duration:<integer>` lines.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Companion file written by the slave, as read back by the master.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifact {
    /// Full text content, for display.
    pub content: String,
    /// Slave-reported elapsed milliseconds, when present.
    pub slave_elapsed_ms: Option<u64>,
}

/// Extract the slave-reported elapsed time. If several `Duration:` lines
/// exist, the last one parsed wins.
pub fn parse_slave_elapsed(content: &str) -> Option<u64> {
    let mut elapsed = None;
    for line in content.lines() {
        if let Some(rest) = line.trim().strip_prefix("Duration:") {
            if let Ok(ms) = rest.trim().parse::<u64>() {
                elapsed = Some(ms);
            }
        }
    }
    elapsed
}

/// Read the named artifact from the results folder. A missing or
/// unreadable file is not a cycle failure; the artifact is simply absent.
pub async fn load_result_artifact(folder: &Path, file_name: &str) -> Option<ResultArtifact> {
    if file_name.is_empty() {
        return None;
    }
    let path = folder.join(file_name);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => {
            let slave_elapsed_ms = parse_slave_elapsed(&content);
            Some(ResultArtifact {
                content,
                slave_elapsed_ms,
            })
        }
        Err(e) => {
            warn!(path = %path.display(), "result file unreadable: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_duration_line_wins() {
        let content = "Sum:5050\nDuration:12\nDuration:34\n";
        assert_eq!(parse_slave_elapsed(content), Some(34));
    }

    #[test]
    fn malformed_duration_lines_are_skipped() {
        assert_eq!(parse_slave_elapsed("Duration:abc\n"), None);
        assert_eq!(parse_slave_elapsed("Duration:abc\nDuration: 7\n"), Some(7));
        assert_eq!(parse_slave_elapsed("Sum:10\n"), None);
        assert_eq!(parse_slave_elapsed(""), None);
    }

    #[tokio::test]
    async fn artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let content = "Sum:55\nDuration:3\n";
        tokio::fs::write(dir.path().join("result_1.txt"), content)
            .await
            .unwrap();

        let artifact = load_result_artifact(dir.path(), "result_1.txt")
            .await
            .unwrap();
        assert_eq!(artifact.content, content);
        assert_eq!(artifact.slave_elapsed_ms, Some(3));
    }

    #[tokio::test]
    async fn missing_artifact_is_absent_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_result_artifact(dir.path(), "nope.txt").await.is_none());
        assert!(load_result_artifact(dir.path(), "").await.is_none());
    }
}
