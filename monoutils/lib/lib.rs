//! `monoutils` is a library containing general utilities for the monoblock project.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod error;
pub mod process;
pub mod progress;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use error::*;
pub use process::*;
pub use progress::*;
