pub mod client;
pub mod command;
pub mod error;

pub use client::{GitCliClient, GitClient};
pub use command::{GitCli, GitOutput};
pub use error::GitError;
