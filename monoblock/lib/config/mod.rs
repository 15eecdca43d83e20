//! Pool configuration and its defaults.

mod defaults;
mod rbd;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use rbd::*;
