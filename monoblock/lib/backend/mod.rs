//! Backend access: the queries the deletion walk relies on and the `rbd` CLI driver that answers
//! them.

mod rbd;
mod traits;

#[cfg(test)]
mod memory;
#[cfg(test)]
mod scripted;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use rbd::*;
pub use traits::*;

#[cfg(test)]
pub(crate) use memory::*;
#[cfg(test)]
pub(crate) use scripted::*;
