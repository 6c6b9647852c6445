//! In-memory [`ProcessRunner`] for tests. Never spawns anything.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dbvault_core::{BackupError, Result};

use crate::runner::{Invocation, ProcessOutput, ProcessRunner};

/// Scripted reply for the next invocation.
#[derive(Debug, Clone)]
pub enum FakeResponse {
    Output(Vec<u8>),
    Fail { status: i32, stderr: String },
    Timeout,
    /// Succeeds with `stdout` after `delay`, like a long-running load.
    Slow { delay: Duration, stdout: Vec<u8> },
}

#[derive(Debug, Default)]
struct FakeState {
    script: VecDeque<FakeResponse>,
    calls: Vec<Invocation>,
}

/// Replays queued responses in order and records every invocation.
/// Once the script is exhausted every call succeeds with empty output.
#[derive(Debug, Clone, Default)]
pub struct FakeProcessRunner {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: FakeResponse) -> &Self {
        self.lock().script.push_back(response);
        self
    }

    pub fn push_output(&self, stdout: impl Into<Vec<u8>>) -> &Self {
        self.push(FakeResponse::Output(stdout.into()))
    }

    pub fn push_failure(&self, stderr: impl Into<String>) -> &Self {
        self.push(FakeResponse::Fail {
            status: 1,
            stderr: stderr.into(),
        })
    }

    pub fn push_timeout(&self) -> &Self {
        self.push(FakeResponse::Timeout)
    }

    pub fn push_slow_output(&self, delay: Duration, stdout: impl Into<Vec<u8>>) -> &Self {
        self.push(FakeResponse::Slow {
            delay,
            stdout: stdout.into(),
        })
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.lock().calls.clone()
    }

    /// Index of the first recorded call whose args contain `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.lock()
            .calls
            .iter()
            .position(|c| c.args.iter().any(|a| a.contains(needle)))
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        // a panicking test thread must not hide the recorded calls
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl ProcessRunner for FakeProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        let response = {
            let mut state = self.lock();
            state.calls.push(invocation.clone());
            state.script.pop_front()
        };

        if let Some(FakeResponse::Slow { delay, .. }) = &response {
            tokio::time::sleep(*delay).await;
        }

        match response {
            None => Ok(ProcessOutput::default()),
            Some(FakeResponse::Output(stdout)) | Some(FakeResponse::Slow { stdout, .. }) => {
                if stdout.len() > invocation.max_output {
                    return Err(BackupError::OutputTooLarge {
                        program: invocation.program.clone(),
                        limit: invocation.max_output,
                    });
                }
                Ok(ProcessOutput {
                    stdout,
                    stderr: Vec::new(),
                })
            }
            Some(FakeResponse::Fail { status, stderr }) => Err(BackupError::Subprocess {
                program: invocation.program.clone(),
                status: format!("exit status: {status}"),
                stderr,
            }),
            Some(FakeResponse::Timeout) => Err(BackupError::Timeout {
                program: invocation.program.clone(),
                timeout: invocation.timeout,
            }),
        }
    }
}
