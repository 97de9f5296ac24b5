//! SSH transport through the bastion
//!
//! This module opens the bastion session, reaches the whitelisted target
//! either through the bastion's interactive menu or through a tunnel, and
//! runs one command there.

pub mod command;
pub mod connection;
pub mod executor;
pub mod handler;
pub mod menu;
pub mod terminal;

// Re-exports
pub use command::CommandOutput;
pub use connection::{BastionConnection, TargetConnection};
pub use executor::{BastionExecutor, RemoteExecutor};
pub use handler::SshHandler;
pub use menu::{clean_output, JumpMenu, MenuTimings};
pub use terminal::{Expect, Matched, PtyTerminal, Terminal};
