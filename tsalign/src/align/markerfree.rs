//! Runs the `Markerfree` executable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{error, info};

use super::process::run_command_with_logs;
use super::{AlignRequest, Aligner};
use crate::{Error, Result};

/// Default executable name.
pub const MARKERFREE_PROGRAM: &str = "Markerfree";

/// How to launch the aligner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignerConfig {
    /// Executable name or path.
    #[serde(default = "default_program")]
    pub program: String,
    /// Installation root. `<home>/build/bin` is put first on `PATH`.
    #[serde(default)]
    pub home: Option<PathBuf>,
    /// Shell snippet run before the program, e.g. `conda activate markerfree-0.1`.
    /// When set the aligner is launched through `sh -c`.
    #[serde(default)]
    pub env_activation: Option<String>,
}

fn default_program() -> String {
    MARKERFREE_PROGRAM.to_string()
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            home: None,
            env_activation: None,
        }
    }
}

/// [`Aligner`] backed by the Markerfree command-line tool.
pub struct MarkerfreeAligner {
    config: AlignerConfig,
}

impl MarkerfreeAligner {
    pub fn new(config: AlignerConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, request: &AlignRequest) -> Command {
        let args = request.to_args();

        let mut command = match self.config.env_activation.as_deref() {
            Some(activation) if !activation.trim().is_empty() => {
                let script = format!(
                    "{} && {} {}",
                    activation,
                    shell_quote(&self.config.program),
                    args.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ")
                );
                let mut c = Command::new("sh");
                c.arg("-c").arg(script);
                c
            }
            _ => {
                let mut c = Command::new(&self.config.program);
                c.args(&args);
                c
            }
        };

        if let Some(path) = self.search_path() {
            command.env("PATH", path);
        }
        command
    }

    /// `PATH` with `<home>/build/bin` prepended, when a home is configured.
    fn search_path(&self) -> Option<OsString> {
        let bin = self.config.home.as_ref()?.join("build").join("bin");
        let current = std::env::var_os("PATH").unwrap_or_default();
        let paths = std::iter::once(bin).chain(std::env::split_paths(&current));
        std::env::join_paths(paths).ok()
    }
}

#[async_trait]
impl Aligner for MarkerfreeAligner {
    fn name(&self) -> &'static str {
        "MarkerfreeAligner"
    }

    async fn align(&self, request: &AlignRequest) -> Result<()> {
        let mut command = self.build_command(request);

        info!(
            item_id = %request.item_id,
            program = %self.config.program,
            args = %request.to_args().join(" "),
            "Running aligner"
        );

        let output = run_command_with_logs(&mut command, &request.item_id)
            .await
            .map_err(|e| {
                Error::external(
                    &request.item_id,
                    format!("failed to launch {}: {}", self.config.program, e),
                )
            })?;

        if !output.status.success() {
            error!(
                item_id = %request.item_id,
                status = %output.status,
                "Aligner exited unsuccessfully"
            );
            let mut message = format!(
                "{} exited with code {}",
                self.config.program,
                output.status.code().unwrap_or(-1)
            );
            if let Some(last) = output.stderr_tail.last() {
                message.push_str(": ");
                message.push_str(last);
            }
            return Err(Error::external(&request.item_id, message));
        }

        info!(
            item_id = %request.item_id,
            duration_secs = output.duration_secs,
            "Aligner finished"
        );
        Ok(())
    }
}

/// Single-quote `arg` for `sh`.
fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./,=:".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::Geometry;
    use std::path::Path;

    fn request(dir: &Path) -> AlignRequest {
        AlignRequest {
            item_id: "ts1".to_string(),
            input_path: dir.join("ts1.mrcs"),
            output_path: dir.join("ts1_aligned.mrc"),
            angle_manifest: dir.join("ts1.rawtlt"),
            tilt_axis_angle: 85.0,
            geometry: Geometry::default(),
            projections: 10,
        }
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/work/ts1.mrc"), "/work/ts1.mrc");
        assert_eq!(shell_quote("0,85,0,0,0,0,0"), "0,85,0,0,0,0,0");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_search_path_prepends_home_bin() {
        let aligner = MarkerfreeAligner::new(AlignerConfig {
            home: Some(PathBuf::from("/opt/markerfree")),
            ..Default::default()
        });
        let path = aligner.search_path().unwrap();
        let first = std::env::split_paths(&path).next().unwrap();
        assert_eq!(first, PathBuf::from("/opt/markerfree/build/bin"));

        assert!(MarkerfreeAligner::new(AlignerConfig::default()).search_path().is_none());
    }

    /// Aligner whose "program" is a shell function defined by the activation snippet.
    #[cfg(unix)]
    fn shell_function_aligner(definition: String, name: &str) -> MarkerfreeAligner {
        MarkerfreeAligner::new(AlignerConfig {
            program: name.to_string(),
            env_activation: Some(definition),
            ..Default::default()
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_external_error() {
        let dir = tempfile::tempdir().unwrap();
        let aligner = shell_function_aligner(
            "fail() { echo 'CUDA error: no device' >&2; return 2; }".to_string(),
            "fail",
        );

        match aligner.align(&request(dir.path())).await {
            Err(Error::ExternalComputation { item_id, message }) => {
                assert_eq!(item_id, "ts1");
                assert!(message.contains("exited with code 2"));
                assert!(message.contains("CUDA error: no device"));
            }
            other => panic!("expected external computation error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_arguments_reach_the_program() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("args.txt");
        let aligner = shell_function_aligner(
            format!("record() {{ echo \"$@\" > '{}'; }}", record.display()),
            "record",
        );

        let req = request(dir.path());
        aligner.align(&req).await.unwrap();
        let recorded = std::fs::read_to_string(&record).unwrap();
        assert_eq!(recorded.trim(), req.to_args().join(" "));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_direct_exec_failure() {
        let dir = tempfile::tempdir().unwrap();
        let aligner = MarkerfreeAligner::new(AlignerConfig {
            program: "false".to_string(),
            ..Default::default()
        });
        let err = aligner.align(&request(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("false exited with code 1"));
    }

    #[tokio::test]
    async fn test_missing_program_is_external_error() {
        let aligner = MarkerfreeAligner::new(AlignerConfig {
            program: "/nonexistent/Markerfree".to_string(),
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let err = aligner.align(&request(dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::ExternalComputation { .. }));
    }
}
