//! IPC module for daemon-front end communication

mod protocol;
mod server;

pub use protocol::TutorStatus;
pub use server::{Server, ServerLinks};
