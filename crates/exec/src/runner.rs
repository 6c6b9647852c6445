use std::process::Stdio;
use std::time::Duration;

use dbvault_core::{BackupError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

const STDERR_LIMIT: usize = 64 * 1024;

/// One external command, fully described.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    /// Upper bound on captured stdout.
    pub max_output: usize,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            timeout: Duration::from_secs(60),
            max_output: 1024 * 1024,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_output(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs an external command to completion and captures its stdout.
///
/// Implementations must enforce `timeout` and `max_output` and report a
/// non-zero exit as [`BackupError::Subprocess`].
#[async_trait::async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput>;
}

/// Spawns real processes with tokio.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

#[async_trait::async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        let program = invocation.program.as_str();
        debug!(program, args = ?invocation.args, "spawning process");

        let mut cmd = Command::new(program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| BackupError::Spawn {
            program: program.to_owned(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let work = async {
            let (_, stdout, stderr) = tokio::try_join!(
                feed_stdin(stdin, invocation.stdin.as_deref(), program),
                read_capped(stdout, invocation.max_output, program),
                read_capped(stderr, STDERR_LIMIT, program),
            )?;
            let status = child.wait().await.map_err(|source| BackupError::Spawn {
                program: program.to_owned(),
                source,
            })?;
            Ok::<_, BackupError>((status, stdout, stderr))
        };

        let (status, stdout, stderr) = match tokio::time::timeout(invocation.timeout, work).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackupError::Timeout {
                    program: program.to_owned(),
                    timeout: invocation.timeout,
                })
            }
        };

        if !status.success() {
            return Err(BackupError::Subprocess {
                program: program.to_owned(),
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_owned(),
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }
}

async fn feed_stdin(
    pipe: Option<tokio::process::ChildStdin>,
    input: Option<&[u8]>,
    program: &str,
) -> Result<()> {
    let (Some(mut pipe), Some(input)) = (pipe, input) else {
        return Ok(());
    };
    let write = async {
        pipe.write_all(input).await?;
        pipe.shutdown().await
    };
    match write.await {
        Ok(()) => Ok(()),
        // The child exited without reading everything; its exit status says why.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(source) => Err(BackupError::Spawn {
            program: program.to_owned(),
            source,
        }),
    }
}

async fn read_capped<R>(reader: Option<R>, limit: usize, program: &str) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    reader
        .take(cap)
        .read_to_end(&mut buf)
        .await
        .map_err(|source| BackupError::Spawn {
            program: program.to_owned(),
            source,
        })?;
    if buf.len() > limit {
        return Err(BackupError::OutputTooLarge {
            program: program.to_owned(),
            limit,
        });
    }
    Ok(buf)
}
