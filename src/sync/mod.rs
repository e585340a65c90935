//! Synchronization module containing the reconciler and its helpers

pub mod balance;
pub mod maintenance;
pub mod reconciler;
pub mod transfers;

pub use balance::*;
pub use maintenance::*;
pub use reconciler::*;
pub use transfers::*;
