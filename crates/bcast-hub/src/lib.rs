pub mod client;
pub mod error;
pub mod types;

pub use client::{GhCliHubClient, HubClient};
pub use error::HubError;
pub use types::{Branch, FileContent, Pr, PrRequest, PrState, User};
