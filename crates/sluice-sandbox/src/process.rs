//! Process-based backend
//!
//! Each execution spawns the installed entrypoint as an OS process with the
//! parameters on stdin and reads the result from stdout.
//!
//! Isolation is limited to:
//! - Working directory restriction
//! - Environment variable control
//! - Timeout enforcement
//! - Output size limits

use crate::bundle::Bundle;
use crate::error::{SandboxError, SandboxResult};
use crate::traits::Backend;
use async_trait::async_trait;
use sluice_core::constants::{EXECUTION_TIMEOUT_MS_DEFAULT, RESULT_SIZE_BYTES_MAX};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, info, warn};

/// Stderr bytes kept in a fault reason
const STDERR_TAIL_BYTES_MAX: usize = 2048;

/// Process backend configuration
#[derive(Debug, Clone)]
pub struct ProcessBackendConfig {
    /// Directory the bundle is installed into and the process runs in
    pub workdir: PathBuf,
    /// Entrypoint used when the bundle does not define one
    pub entrypoint: Option<Vec<String>>,
    /// Time budget per execution
    pub exec_timeout_ms: u64,
    /// Largest stdout accepted as a result
    pub output_bytes_max: usize,
    /// Extra environment passed to the process
    pub env: Vec<(String, String)>,
}

impl ProcessBackendConfig {
    /// Create a configuration rooted at `workdir`
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            entrypoint: None,
            exec_timeout_ms: EXECUTION_TIMEOUT_MS_DEFAULT,
            output_bytes_max: RESULT_SIZE_BYTES_MAX,
            env: Vec::new(),
        }
    }

    /// Set the fallback entrypoint
    pub fn with_entrypoint(mut self, argv: Vec<String>) -> Self {
        self.entrypoint = Some(argv);
        self
    }

    /// Set the per-execution timeout
    pub fn with_exec_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.exec_timeout_ms = timeout_ms;
        self
    }

    /// Set the output limit
    pub fn with_output_bytes_max(mut self, bytes: usize) -> Self {
        self.output_bytes_max = bytes;
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl From<&sluice_core::config::BackendConfig> for ProcessBackendConfig {
    fn from(config: &sluice_core::config::BackendConfig) -> Self {
        Self {
            workdir: PathBuf::from(&config.workdir),
            entrypoint: config.entrypoint.clone(),
            exec_timeout_ms: config.exec_timeout_ms,
            output_bytes_max: config.output_bytes_max,
            env: Vec::new(),
        }
    }
}

/// Backend that runs its entrypoint as a child process per execution
pub struct ProcessBackend {
    config: ProcessBackendConfig,
    entrypoint: Option<Vec<String>>,
    executions: u64,
}

impl ProcessBackend {
    /// Create a new process backend
    pub fn new(config: ProcessBackendConfig) -> Self {
        let entrypoint = config.entrypoint.clone();
        Self {
            config,
            entrypoint,
            executions: 0,
        }
    }

    /// Entrypoint currently in effect
    pub fn entrypoint(&self) -> Option<&[String]> {
        self.entrypoint.as_deref()
    }

    /// Number of executions started
    pub fn executions(&self) -> u64 {
        self.executions
    }

    fn command(&self, argv: &[String]) -> SandboxResult<Command> {
        let (program, args) = argv.split_first().ok_or(SandboxError::NotInstalled)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.config.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.env_clear();
        for (k, v) in &self.config.env {
            cmd.env(k, v);
        }
        cmd.env("PATH", "/usr/local/bin:/usr/bin:/bin");

        Ok(cmd)
    }
}

#[async_trait]
impl Backend for ProcessBackend {
    fn name(&self) -> &str {
        "process"
    }

    async fn install(&mut self, bundle: Bundle) -> SandboxResult<()> {
        tokio::fs::create_dir_all(&self.config.workdir)
            .await
            .map_err(|e| SandboxError::InstallFailed {
                path: self.config.workdir.display().to_string(),
                reason: e.to_string(),
            })?;

        for file in &bundle.files {
            let target = file.resolve_under(&self.config.workdir)?;

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SandboxError::InstallFailed {
                        path: file.path.clone(),
                        reason: e.to_string(),
                    })?;
            }

            tokio::fs::write(&target, &file.contents)
                .await
                .map_err(|e| SandboxError::InstallFailed {
                    path: file.path.clone(),
                    reason: e.to_string(),
                })?;

            debug!(path = %file.path, bytes = file.contents.len(), "Installed bundle file");
        }

        let files = bundle.files.len();
        let bytes = bundle.size_bytes();
        if let Some(entrypoint) = bundle.entrypoint {
            self.entrypoint = Some(entrypoint);
        }

        info!(
            workdir = %self.config.workdir.display(),
            files,
            bytes,
            "Bundle installed"
        );
        Ok(())
    }

    async fn execute_backend(&mut self, parameters: &str) -> SandboxResult<String> {
        let argv = self.entrypoint.clone().ok_or(SandboxError::NotInstalled)?;
        let mut cmd = self.command(&argv)?;
        self.executions += 1;

        let start = Instant::now();
        let timeout = Duration::from_millis(self.config.exec_timeout_ms);
        let output_limit = self.config.output_bytes_max;

        let mut child = cmd.spawn().map_err(|e| SandboxError::ExecutionFault {
            reason: format!("failed to spawn {}: {}", argv[0], e),
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| SandboxError::IoError {
            reason: "backend stdout not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| SandboxError::IoError {
            reason: "backend stderr not captured".to_string(),
        })?;

        // Pipes are serviced together; an oversized stdout short-circuits the rest
        let run = async {
            let (_, stdout, stderr_tail) = tokio::try_join!(
                feed_parameters(stdin, parameters.as_bytes()),
                read_capped(stdout, output_limit),
                read_tail(stderr, STDERR_TAIL_BYTES_MAX),
            )?;
            let status = child.wait().await?;
            Ok::<_, SandboxError>((status, stdout, stderr_tail))
        };

        let outcome = tokio::time::timeout(timeout, run).await;
        let (status, stdout, stderr_tail) = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let _ = child.start_kill();
                if let SandboxError::OutputTooLarge { limit, .. } = &e {
                    warn!(limit, "Backend output exceeded limit, execution killed");
                }
                return Err(e);
            }
            Err(_) => {
                let _ = child.start_kill();
                warn!(timeout_ms = self.config.exec_timeout_ms, "Backend execution timed out");
                return Err(SandboxError::ExecTimeout {
                    timeout_ms: self.config.exec_timeout_ms,
                });
            }
        };

        debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            status = ?status.code(),
            "Backend process exited"
        );

        if !status.success() {
            return Err(SandboxError::ExecutionFault {
                reason: format!(
                    "exit status {}: {}",
                    status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string()),
                    tail_text(&stderr_tail)
                ),
            });
        }

        String::from_utf8(stdout).map_err(|_| SandboxError::ExecutionFault {
            reason: "backend output is not valid UTF-8".to_string(),
        })
    }
}

async fn feed_parameters(stdin: Option<ChildStdin>, input: &[u8]) -> SandboxResult<()> {
    if let Some(mut stdin) = stdin {
        // A process that ignores its input closes the pipe early
        if let Err(e) = stdin.write_all(input).await {
            debug!(error = %e, "Backend did not consume parameters");
        }
    }
    Ok(())
}

/// Read at most `limit` bytes; one byte more fails the execution
async fn read_capped<R: AsyncRead + Unpin>(reader: R, limit: usize) -> SandboxResult<Vec<u8>> {
    let mut buf = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut buf)
        .await?;

    if buf.len() > limit {
        return Err(SandboxError::OutputTooLarge {
            size: buf.len(),
            limit,
        });
    }
    Ok(buf)
}

/// Drain `reader` to EOF, keeping only the last `keep` bytes
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, keep: usize) -> SandboxResult<Vec<u8>> {
    let mut tail = Vec::with_capacity(keep);
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        tail.extend_from_slice(&chunk[..n]);
        if tail.len() > keep {
            let excess = tail.len() - keep;
            tail.drain(..excess);
        }
    }
    Ok(tail)
}

/// Text of a byte tail that may start inside a multi-byte character
fn tail_text(bytes: &[u8]) -> String {
    let start = bytes
        .iter()
        .position(|b| b & 0xC0 != 0x80)
        .unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}
