use std::{
    error::Error,
    fmt::{self, Display},
};

use monoutils::{CommandError, MonoutilsError};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a monoblock-related operation.
pub type MonoblockResult<T> = Result<T, MonoblockError>;

/// An error that occurred while managing RBD volumes.
#[derive(pretty_error_debug::Debug, Error)]
pub enum MonoblockError {
    /// The entity does not exist: no snapshots, no clones, or no parent.
    ///
    /// Distinct from [`MonoblockError::Backend`] so that "nothing there" is never confused with
    /// "could not ask".
    #[error("not found: {0}")]
    NotFound(String),

    /// A backend command failed for any other reason.
    #[error("backend error: {0}")]
    Backend(#[from] CommandError),

    /// A backend name is missing its pool delimiter or another required part.
    #[error("malformed volume name {name:?}: {reason}")]
    MalformedName {
        /// The offending string.
        name: String,

        /// What was wrong with it.
        reason: &'static str,
    },

    /// A backend name does not start with a known volume type prefix.
    #[error("unrecognized volume type in {0:?}")]
    UnrecognizedType(String),

    /// The volume is not mapped to any kernel block device.
    #[error("volume {0:?} not mapped to an RBD device")]
    NotMapped(String),

    /// The map command succeeded but printed no device path.
    #[error("failed to detect mapped device path in {0:?}")]
    MappedPathNotFound(String),

    /// The backend kept reporting the device as busy.
    #[error("volume {volume:?} still busy after {attempts} unmap attempts: {source}")]
    UnmapBusy {
        /// The image that could not be unmapped.
        volume: String,

        /// How many busy responses were seen.
        attempts: u32,

        /// The last busy response.
        #[source]
        source: CommandError,
    },

    /// A differential export or import failed.
    #[error("{operation} failed: ({}) {stderr}", .errors.join("; "))]
    Transfer {
        /// `export-diff` or `import-diff`.
        operation: &'static str,

        /// Every failure seen, in the order they were collected.
        errors: Vec<String>,

        /// Captured diagnostics of the backend process.
        stderr: String,
    },

    /// The backend printed something we could not make sense of.
    #[error("unexpected backend output: {0}")]
    UnexpectedOutput(String),

    /// The configuration is invalid.
    #[error("invalid configuration: {}", .0.join(", "))]
    InvalidConfig(Vec<String>),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML decoding error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MonoblockError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> MonoblockError {
        MonoblockError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Creates a [`MonoblockError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> MonoblockError {
        MonoblockError::NotFound(what.into())
    }

    /// Creates a [`MonoblockError::MalformedName`].
    pub fn malformed(name: impl Into<String>, reason: &'static str) -> MonoblockError {
        MonoblockError::MalformedName {
            name: name.into(),
            reason,
        }
    }

    /// Returns true if this is a [`MonoblockError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, MonoblockError::NotFound(_))
    }

    /// Returns the exit code of the backend command behind this error, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            MonoblockError::Backend(e) => e.exit_code,
            MonoblockError::UnmapBusy { source, .. } => source.exit_code,
            _ => None,
        }
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

/// Creates an `Ok` `MonoblockResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> MonoblockResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<MonoutilsError> for MonoblockError {
    fn from(error: MonoutilsError) -> Self {
        match error {
            MonoutilsError::CommandFailed(e) => MonoblockError::Backend(e),
            MonoutilsError::IoError(e) => MonoblockError::Io(e),
            other => MonoblockError::custom(other),
        }
    }
}

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
