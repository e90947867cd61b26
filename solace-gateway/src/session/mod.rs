//! Per-session conversation state.

mod store;
mod types;

pub use store::{SessionHandle, SessionStore, SessionStoreConfig};
pub use types::{ConversationHistory, ConversationTurn, HistoryError, Role, SYSTEM_PROMPT};
