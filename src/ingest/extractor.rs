//! Capture file extraction via the nfdump export tool
//!
//! The `FlowExtractor` trait is the seam between the pipeline and the
//! external process, so the coordinator can be driven by canned text in tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Fixed output template: one comma separated line per flow.
pub const NFDUMP_FORMAT: &str = "fmt:%ts,%sa,%da,%sp,%dp,%pr,%pkt,%byt";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to start {program} for {path}: {source}")]
    Spawn {
        program: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?} on {path}")]
    Timeout {
        program: String,
        path: PathBuf,
        timeout: Duration,
    },

    #[error("{program} exited with {status} for {path}: {diagnostic}")]
    Failed {
        program: String,
        path: PathBuf,
        status: String,
        diagnostic: String,
    },
}

/// Turns a capture file into raw text lines.
#[async_trait]
pub trait FlowExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractionError>;
}

/// Runs `nfdump -r <file> -o <NFDUMP_FORMAT>` with a process-level timeout.
#[derive(Debug, Clone)]
pub struct NfdumpExtractor {
    program: String,
    timeout: Duration,
}

impl NfdumpExtractor {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl FlowExtractor for NfdumpExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
        let child = Command::new(&self.program)
            .arg("-r")
            .arg(path)
            .arg("-o")
            .arg(NFDUMP_FORMAT)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractionError::Spawn {
                program: self.program.clone(),
                path: path.to_path_buf(),
                source,
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExtractionError::Timeout {
                program: self.program.clone(),
                path: path.to_path_buf(),
                timeout: self.timeout,
            })?
            .map_err(|source| ExtractionError::Spawn {
                program: self.program.clone(),
                path: path.to_path_buf(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        classify_output(
            &self.program,
            path,
            output.status.success(),
            &output.status.to_string(),
            &stdout,
            &String::from_utf8_lossy(&output.stderr),
        )
    }
}

/// Apply the exit-status rules.
///
/// - success: every stdout line, possibly none
/// - failure with stdout: error carrying the tool's diagnostic text
/// - failure with empty stdout: nfdump reports "no data" this way, so no flows
fn classify_output(
    program: &str,
    path: &Path,
    success: bool,
    status: &str,
    stdout: &str,
    stderr: &str,
) -> Result<Vec<String>, ExtractionError> {
    if success {
        return Ok(stdout.lines().map(str::to_string).collect());
    }

    if stdout.trim().is_empty() {
        log::debug!(
            "{} exited with {} and no output for {}, treating as empty",
            program,
            status,
            path.display()
        );
        return Ok(Vec::new());
    }

    let mut diagnostic = stdout.trim().to_string();
    if !stderr.trim().is_empty() {
        diagnostic.push_str(" | ");
        diagnostic.push_str(stderr.trim());
    }

    Err(ExtractionError::Failed {
        program: program.to_string(),
        path: path.to_path_buf(),
        status: status.to_string(),
        diagnostic,
    })
}
