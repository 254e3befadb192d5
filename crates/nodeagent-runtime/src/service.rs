use crate::RuntimeError;
use std::path::PathBuf;
use std::process::Command;

pub const DEFAULT_SYSTEMCTL: &str = "/usr/bin/systemctl";

/// `systemctl disable` exit code for a unit that does not exist.
const DISABLE_UNIT_NOT_FOUND: i32 = 1;
/// `systemctl stop` exit code for a unit that does not exist.
const STOP_UNIT_NOT_FOUND: i32 = 5;

/// Service supervisor operations used by resource groups.
///
/// `disable` and `stop` report a missing unit as
/// `RuntimeError::UnitNotFound` so callers can treat it as success.
pub trait ServiceManager: Send + Sync {
    fn daemon_reload(&self) -> Result<(), RuntimeError>;
    fn enable(&self, unit: &str) -> Result<(), RuntimeError>;
    fn disable(&self, unit: &str) -> Result<(), RuntimeError>;
    fn start(&self, unit: &str) -> Result<(), RuntimeError>;
    fn stop(&self, unit: &str) -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone)]
pub struct Systemctl {
    binary: PathBuf,
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEMCTL)
    }
}

impl Systemctl {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, action: &str, unit: Option<&str>, not_found: Option<i32>) -> Result<(), RuntimeError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(action);
        if let Some(unit) = unit {
            cmd.arg(unit);
        }
        let output = cmd.output().map_err(|e| RuntimeError::Service {
            action: action.to_owned(),
            unit: unit.unwrap_or_default().to_owned(),
            detail: format!("cannot run {}: {e}", self.binary.display()),
        })?;
        if output.status.success() {
            return Ok(());
        }
        if let (Some(unit), Some(code)) = (unit, not_found) {
            if output.status.code() == Some(code) {
                return Err(RuntimeError::UnitNotFound(unit.to_owned()));
            }
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(RuntimeError::Service {
            action: action.to_owned(),
            unit: unit.unwrap_or_default().to_owned(),
            detail: format!("{}: {}", output.status, stderr.trim()),
        })
    }
}

impl ServiceManager for Systemctl {
    fn daemon_reload(&self) -> Result<(), RuntimeError> {
        self.run("daemon-reload", None, None)
    }

    fn enable(&self, unit: &str) -> Result<(), RuntimeError> {
        self.run("enable", Some(unit), None)
    }

    fn disable(&self, unit: &str) -> Result<(), RuntimeError> {
        self.run("disable", Some(unit), Some(DISABLE_UNIT_NOT_FOUND))
    }

    fn start(&self, unit: &str) -> Result<(), RuntimeError> {
        self.run("start", Some(unit), None)
    }

    fn stop(&self, unit: &str) -> Result<(), RuntimeError> {
        self.run("stop", Some(unit), Some(STOP_UNIT_NOT_FOUND))
    }
}
