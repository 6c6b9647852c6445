//! Subprocess side of the backup engine: the process runner seam plus the
//! dump and restore executors built on it.

pub mod dump;
pub mod fake;
pub mod restore;
pub mod runner;
pub mod target;

pub use dump::DumpExecutor;
pub use fake::{FakeProcessRunner, FakeResponse};
pub use restore::{ProgressFn, RestoreExecutor};
pub use runner::{Invocation, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use target::{DatabaseTarget, ExecLimits, ToolPaths};
