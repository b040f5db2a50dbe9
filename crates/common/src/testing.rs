//! Test support: a [`CommandRunner`] that records calls instead of spawning
//! processes.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::command::{CommandError, CommandLine, CommandRunner, RunOptions, RunResult};
use crate::error::Result;

type Responder = dyn Fn(&CommandLine) -> Result<String> + Send + Sync;

/// One call seen by a [`RecordingRunner`]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub command: CommandLine,
    pub options: RunOptions,
}

/// Records every `(command, options)` pair and answers with a canned result.
///
/// Clones share the same call log.
#[derive(Clone)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    responder: Arc<Responder>,
}

impl RecordingRunner {
    /// Every command succeeds with empty stdout
    pub fn succeeding() -> Self {
        Self::with_responder(|_| Ok(String::new()))
    }

    /// Every command exits with the given status
    pub fn failing(exit_code: i32) -> Self {
        Self::with_responder(move |command| Err(failure(command, exit_code)))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&CommandLine) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        }
    }

    /// Snapshot of all calls in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Calls whose first word is `program`
    pub fn calls_to(&self, program: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.command.program() == Some(program))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &CommandLine, options: &RunOptions) -> Result<String> {
        self.calls.lock().push(RecordedCall {
            command: command.clone(),
            options: options.clone(),
        });
        (self.responder)(command)
    }
}

/// Build the error a command exiting with `exit_code` would produce
pub fn failure(command: &CommandLine, exit_code: i32) -> crate::Error {
    CommandError {
        command: command.to_shell(),
        result: RunResult {
            exit_code,
            stdout: String::new(),
            stderr: format!("exit {}", exit_code),
        },
    }
    .into()
}
