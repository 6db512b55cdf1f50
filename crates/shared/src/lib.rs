//! Rendezvous shared library: typed ids, backend wire types and constants
//! used by the encryption core and its orchestration layer.

pub mod api;
pub mod constants;
pub mod error;
pub mod ids;
