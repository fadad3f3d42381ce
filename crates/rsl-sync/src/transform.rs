//! Downstream SQL transform step (`dbt run`), run as an opaque child process.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;
use tokio::process::Command;
use tracing::{info, info_span, Instrument};

pub const DEFAULT_TRANSFORM_PROGRAM: &str = "dbt";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Failed { program: String, status: ExitStatus },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformStep {
    pub program: String,
    pub project_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub extra_args: Vec<String>,
}

impl TransformStep {
    pub fn dbt(project_dir: impl Into<PathBuf>, profiles_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: DEFAULT_TRANSFORM_PROGRAM.to_string(),
            project_dir: project_dir.into(),
            profiles_dir: profiles_dir.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "run".into(),
            "--project-dir".into(),
            self.project_dir.clone().into_os_string(),
            "--profiles-dir".into(),
            self.profiles_dir.clone().into_os_string(),
        ];
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }

    /// Runs the tool with inherited stdio. A non-zero exit is an error.
    pub async fn run(&self) -> Result<ExitStatus, TransformError> {
        let span = info_span!("transform", program = %self.program);
        async {
            info!(project_dir = %self.project_dir.display(), "starting transform");
            let status = Command::new(&self.program)
                .args(self.args())
                .kill_on_drop(true)
                .status()
                .await
                .map_err(|source| TransformError::Spawn {
                    program: self.program.clone(),
                    source,
                })?;

            if !status.success() {
                return Err(TransformError::Failed {
                    program: self.program.clone(),
                    status,
                });
            }
            info!("transform finished");
            Ok::<_, TransformError>(status)
        }
        .instrument(span)
        .await
    }
}
