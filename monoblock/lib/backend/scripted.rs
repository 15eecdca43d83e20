use std::{collections::VecDeque, sync::Mutex};

use async_trait::async_trait;
use monoutils::{CommandError, CommandRunner, MonoutilsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`CommandRunner`] that replays queued results and records every invocation.
///
/// Once the queue is drained every command succeeds with empty output.
#[derive(Debug, Default)]
pub(crate) struct ScriptedRunner {
    responses: Mutex<VecDeque<Result<String, (i32, String)>>>,
    calls: Mutex<Vec<String>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ScriptedRunner {
    /// Queues a successful run printing `stdout`.
    pub(crate) fn push_ok(&self, stdout: &str) {
        self.lock_responses().push_back(Ok(stdout.to_string()));
    }

    /// Queues a run exiting with `code`.
    pub(crate) fn push_exit(&self, code: i32, stderr: &str) {
        self.lock_responses()
            .push_back(Err((code, stderr.to_string())));
    }

    /// Queues `count` runs exiting with `code`.
    pub(crate) fn push_exits(&self, code: i32, count: usize) {
        for _ in 0..count {
            self.push_exit(code, "");
        }
    }

    /// Every command run so far, as `program arg arg ...`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, (i32, String)>>> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> MonoutilsResult<String> {
        if let Ok(mut calls) = self.calls.lock() {
            let mut line = program.to_string();
            for arg in args {
                line.push(' ');
                line.push_str(arg);
            }
            calls.push(line);
        }

        match self.lock_responses().pop_front() {
            Some(Ok(stdout)) => Ok(stdout),
            Some(Err((code, stderr))) => {
                Err(CommandError::new(program, args.iter().cloned(), Some(code), stderr).into())
            }
            None => Ok(String::new()),
        }
    }
}
