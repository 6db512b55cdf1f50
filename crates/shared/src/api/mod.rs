//! Wire types exchanged with the backend collaborators.

pub mod attachment;
pub mod conversation;
pub mod device;
pub mod message;
