//! `monoutils::error` is a module containing error utilities for the monoblock project.

use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a monoutils-related operation.
pub type MonoutilsResult<T> = Result<T, MonoutilsError>;

/// An error that occurred while running an external tool or moving bytes around.
#[derive(pretty_error_debug::Debug, Error)]
pub enum MonoutilsError {
    /// A command ran but did not exit successfully.
    #[error("command failed: {0}")]
    CommandFailed(#[from] CommandError),

    /// A command could not be started at all.
    #[error("failed to spawn {program}: {source}")]
    CommandSpawn {
        /// The program that could not be spawned.
        program: String,

        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An error that occurred when performing an IO operation
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Custom error.
    #[error("Custom error: {0}")]
    Custom(#[from] AnyError),
}

/// A failed invocation of an external command.
///
/// Keeps the exit code so callers can tell "busy" from "already in that state" from a real
/// failure, and the captured stderr for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{program} {} exited with {}: {}", .args.join(" "), display_code(.exit_code), .stderr.trim())]
pub struct CommandError {
    /// The program that was run.
    pub program: String,

    /// The arguments it was run with.
    pub args: Vec<String>,

    /// The exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,

    /// Everything the process wrote to stderr.
    pub stderr: String,
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MonoutilsError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> MonoutilsError {
        MonoutilsError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns the exit code of the failed command, if this error came from one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            MonoutilsError::CommandFailed(e) => e.exit_code,
            _ => None,
        }
    }
}

impl CommandError {
    /// Creates a new command error.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
        exit_code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited with the given code.
    pub fn exited_with(&self, code: i32) -> bool {
        self.exit_code == Some(code)
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `MonoutilsResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> MonoutilsResult<T> {
    Result::Ok(value)
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
