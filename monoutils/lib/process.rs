//! `monoutils::process` runs external administrative tools and captures what they say.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::{CommandError, MonoutilsError, MonoutilsResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Runs a program to completion and hands back its stdout.
///
/// A non-zero exit is reported as [`MonoutilsError::CommandFailed`] so callers can interpret the
/// exit code instead of treating every failure the same way.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and returns its stdout.
    async fn run(&self, program: &str, args: &[String]) -> MonoutilsResult<String>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`CommandRunner`] that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Spawns `program` with the requested stdio and a readable error if it cannot start.
pub fn spawn_piped(
    program: &str,
    args: &[String],
    stdin: Stdio,
    stdout: Stdio,
) -> MonoutilsResult<Child> {
    Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| MonoutilsError::CommandSpawn {
            program: program.to_string(),
            source,
        })
}

/// Turns an exit status into a [`CommandError`] if it is not a success.
pub fn check_status(
    program: &str,
    args: &[String],
    status: ExitStatus,
    stderr: impl Into<String>,
) -> Result<(), CommandError> {
    if status.success() {
        return Ok(());
    }

    Err(CommandError::new(
        program,
        args.iter().cloned(),
        status.code(),
        stderr,
    ))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> MonoutilsResult<String> {
        tracing::trace!("running {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| MonoutilsError::CommandSpawn {
                program: program.to_string(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        check_status(program, args, output.status, stderr)?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl<T> CommandRunner for &T
where
    T: CommandRunner + ?Sized,
{
    async fn run(&self, program: &str, args: &[String]) -> MonoutilsResult<String> {
        (**self).run(program, args).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
