//! Communication-thread ownership check
//!
//! World mutation (allocation, release, record changes) must happen on the
//! thread that owns the tick loop. The guard records that thread and checks
//! callers against it.

use std::fmt;
use std::str::FromStr;
use std::thread::{self, ThreadId};

use serde::{Deserialize, Serialize};

/// What to do when a mutation arrives from the wrong thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadSafetyMode {
    /// Reject the call
    #[default]
    Strict,
    /// Log and allow
    Warn,
    /// No check
    Off,
}

impl FromStr for ThreadSafetyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(ThreadSafetyMode::Strict),
            "warn" => Ok(ThreadSafetyMode::Warn),
            "off" => Ok(ThreadSafetyMode::Off),
            other => Err(format!("unknown thread safety mode '{}'", other)),
        }
    }
}

impl fmt::Display for ThreadSafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadSafetyMode::Strict => "strict",
            ThreadSafetyMode::Warn => "warn",
            ThreadSafetyMode::Off => "off",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} called from {actual:?}, owner is {expected:?}")]
pub struct ThreadViolation {
    pub operation: &'static str,
    pub expected: ThreadId,
    pub actual: ThreadId,
}

#[derive(Debug, Clone)]
pub struct ThreadGuard {
    mode: ThreadSafetyMode,
    owner: ThreadId,
}

impl ThreadGuard {
    /// Guard owned by the calling thread
    pub fn new(mode: ThreadSafetyMode) -> Self {
        Self {
            mode,
            owner: thread::current().id(),
        }
    }

    /// Transfer ownership to the calling thread
    pub fn bind_current(&mut self) {
        self.owner = thread::current().id();
    }

    pub fn mode(&self) -> ThreadSafetyMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ThreadSafetyMode) {
        self.mode = mode;
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn check(&self, operation: &'static str) -> Result<(), ThreadViolation> {
        if self.mode == ThreadSafetyMode::Off {
            return Ok(());
        }
        let actual = thread::current().id();
        if actual == self.owner {
            return Ok(());
        }
        let violation = ThreadViolation {
            operation,
            expected: self.owner,
            actual,
        };
        match self.mode {
            ThreadSafetyMode::Strict => Err(violation),
            _ => {
                tracing::warn!("{}", violation);
                Ok(())
            }
        }
    }
}
