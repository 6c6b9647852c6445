use std::time::Duration;

use dbvault_core::{BackupError, Result};
use serde::Deserialize;

use crate::runner::Invocation;

/// Connection details for the single database the engine manages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub name: String,
}

impl Default for DatabaseTarget {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 3306,
            user: "root".to_owned(),
            password: None,
            name: "portal".to_owned(),
        }
    }
}

impl DatabaseTarget {
    /// Database names end up inside SQL text, so only plain identifiers pass.
    pub fn validate(&self) -> Result<()> {
        let ok = !self.name.is_empty()
            && self.name.len() <= 64
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
        if ok {
            Ok(())
        } else {
            Err(BackupError::InvalidConfig(format!(
                "database name {:?} is not a plain identifier",
                self.name
            )))
        }
    }

    /// Base invocation with connection flags. The password goes through
    /// `MYSQL_PWD` so it never shows up in a process listing.
    pub(crate) fn invocation(&self, program: &str) -> Invocation {
        let inv = Invocation::new(program)
            .arg("-h")
            .arg(self.host.as_str())
            .arg("-P")
            .arg(self.port.to_string())
            .arg("-u")
            .arg(self.user.as_str());
        match &self.password {
            Some(password) => inv.env("MYSQL_PWD", password.as_str()),
            None => inv,
        }
    }
}

/// External utilities used for dump and restore.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub dump_command: String,
    pub client_command: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            dump_command: "mysqldump".to_owned(),
            client_command: "mysql".to_owned(),
        }
    }
}

/// Timeouts (seconds) and buffer caps (bytes) for subprocess work.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecLimits {
    pub dump_timeout_secs: u64,
    pub max_dump_bytes: usize,
    pub drop_timeout_secs: u64,
    pub load_timeout_secs: u64,
    pub verify_timeout_secs: u64,
    pub max_restore_bytes: u64,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            dump_timeout_secs: 300,
            max_dump_bytes: 512 * 1024 * 1024,
            drop_timeout_secs: 60,
            load_timeout_secs: 1800,
            verify_timeout_secs: 30,
            max_restore_bytes: 512 * 1024 * 1024,
        }
    }
}

impl ExecLimits {
    pub fn dump_timeout(&self) -> Duration {
        Duration::from_secs(self.dump_timeout_secs)
    }

    pub fn drop_timeout(&self) -> Duration {
        Duration::from_secs(self.drop_timeout_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }
}
