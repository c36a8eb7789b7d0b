//! Frame source backed by an external program.
//!
//! The configured argv is run once per request with the camera letter and the frame
//! count appended as the last two arguments. The program prints the issued frame
//! identifiers on stdout, separated by whitespace, and exits with status 0.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::FrameSource;
use crate::camera::CameraId;
use crate::error::SourceError;

/// Runs an external command to obtain frames.
#[derive(Debug, Clone)]
pub struct CommandFrameSource {
    argv: Vec<String>,
}

impl CommandFrameSource {
    /// Returns `None` for an empty argv.
    pub fn new(argv: Vec<String>) -> Option<Self> {
        (!argv.is_empty()).then_some(Self { argv })
    }

    /// The program and its fixed arguments.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

#[async_trait]
impl FrameSource for CommandFrameSource {
    async fn request_frames(
        &self,
        camera: CameraId,
        count: u32,
    ) -> Result<Vec<String>, SourceError> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| SourceError::Unavailable("no frame command configured".into()))?;

        debug!(program = %program, camera = %camera, count, "running frame command");
        let output = Command::new(program)
            .args(args)
            .arg(camera.to_string())
            .arg(count.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SourceError::Unavailable(format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(program = %program, status = %output.status, "frame command failed: {}", stderr.trim());
            return Err(SourceError::Unavailable(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.split_whitespace().map(str::to_string).collect())
    }
}
