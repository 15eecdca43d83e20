//! Volume identities and their flat backend names.
//!
//! Every place that needs to turn a string reported by the backend into a [`Volume`] (or back)
//! goes through this module, so the rest of the crate never slices names by hand.

mod codec;
mod volume;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use codec::*;
pub use volume::*;
