//! User-facing messages.
//!
//! Diagnostics go through `tracing`; what the operator should read (progress
//! while polling, per-host failures) goes through a [`UserLog`] handed to the
//! components that need it.

/// Sink for operator-facing messages.
pub trait UserLog: Send + Sync {
    fn info(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Writes messages to stderr, keeping stdout free for command output.
#[derive(Debug, Clone, Default)]
pub struct ConsoleLog {
    silent: bool,
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `info` messages. Errors are always shown.
    pub fn silent() -> Self {
        Self { silent: true }
    }
}

impl UserLog for ConsoleLog {
    fn info(&self, msg: &str) {
        tracing::debug!(message = msg, "user info");
        if !self.silent {
            eprintln!("{msg}");
        }
    }

    fn error(&self, msg: &str) {
        tracing::debug!(message = msg, "user error");
        eprintln!("{msg}");
    }
}
