//! Conversational gift-finder agent.

mod manager;
mod session;

pub use manager::ChatManager;
pub use session::Session;
