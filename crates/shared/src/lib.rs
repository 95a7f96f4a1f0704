//! Shared types for the notifeed client: the notification model, the push
//! channel protocol and the error types both sides agree on.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
