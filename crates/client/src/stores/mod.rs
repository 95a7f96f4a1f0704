//! State stores fed by the push channel.

pub mod notifications;

pub use notifications::{NotificationState, NotificationStore};
