// Re-export needed modules for testing
pub mod client;
pub mod error;
pub mod models;
pub mod realtime;
pub mod registry;
pub mod roster;
pub mod timeline;

// Re-export main types for convenience
pub use client::{ChatClient, ConversationFeed, NewGroup, ProfileUpdate};
pub use error::ChatError;
pub use models::*;
pub use realtime::{LiveStore, MemoryStore};
pub use roster::RosterReconciler;
pub use timeline::TimelineAssembler;
