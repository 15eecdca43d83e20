//! Reconciles kernel-mapped RBD devices with volume identities.

mod registry;
mod resolver;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use registry::*;
