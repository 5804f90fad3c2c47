//! Sandbox module containing the isolated execution worker and its
//! host-side bridge.

pub mod bridge;
pub mod config;
pub mod interpreter;
pub mod io;
pub mod limits;
pub mod protocol;
pub(crate) mod worker;
