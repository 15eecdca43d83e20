//! Command-line arguments of the `monoblock` binary.

mod args;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use args::*;
