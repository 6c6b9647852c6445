use std::sync::Arc;

use dbvault_core::Result;
use tracing::info;

use crate::runner::ProcessRunner;
use crate::target::{DatabaseTarget, ExecLimits, ToolPaths};

/// Produces a whole-database dump through the external dump utility.
#[derive(Clone)]
pub struct DumpExecutor {
    runner: Arc<dyn ProcessRunner>,
    target: DatabaseTarget,
    tools: ToolPaths,
    limits: ExecLimits,
}

impl DumpExecutor {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        target: DatabaseTarget,
        tools: ToolPaths,
        limits: ExecLimits,
    ) -> Self {
        Self {
            runner,
            target,
            tools,
            limits,
        }
    }

    /// Runs the dump and returns its full stdout. Nothing is written to disk here.
    pub async fn dump(&self) -> Result<Vec<u8>> {
        self.target.validate()?;
        let invocation = self
            .target
            .invocation(&self.tools.dump_command)
            .args([
                "--single-transaction",
                "--routines",
                "--triggers",
                "--events",
            ])
            .arg(self.target.name.as_str())
            .timeout(self.limits.dump_timeout())
            .max_output(self.limits.max_dump_bytes);

        let output = self.runner.run(&invocation).await?;
        info!(
            database = %self.target.name,
            bytes = output.stdout.len(),
            "database dump captured"
        );
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeProcessRunner;
    use dbvault_core::BackupError;

    fn executor(fake: &FakeProcessRunner) -> DumpExecutor {
        DumpExecutor::new(
            Arc::new(fake.clone()),
            DatabaseTarget {
                name: "feedback".to_owned(),
                ..DatabaseTarget::default()
            },
            ToolPaths::default(),
            ExecLimits::default(),
        )
    }

    #[tokio::test]
    async fn dump_returns_stdout_and_targets_the_database() {
        let fake = FakeProcessRunner::new();
        fake.push_output("CREATE TABLE t (id INT);");

        let bytes = executor(&fake).dump().await.expect("dump");
        assert_eq!(bytes, b"CREATE TABLE t (id INT);");

        let calls = fake.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "mysqldump");
        assert_eq!(calls[0].args.last().map(String::as_str), Some("feedback"));
        assert!(calls[0].args.iter().any(|a| a == "--single-transaction"));
        assert_eq!(calls[0].timeout, ExecLimits::default().dump_timeout());
    }

    #[tokio::test]
    async fn timeouts_propagate() {
        let fake = FakeProcessRunner::new();
        fake.push_timeout();
        let err = executor(&fake).dump().await.unwrap_err();
        assert!(matches!(err, BackupError::Timeout { .. }));
    }
}
