pub mod runner;

pub use runner::{forward_capture_notifications, Command, Session};
