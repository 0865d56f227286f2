pub mod components;
pub mod history;
pub mod state;

pub use components::message_input::{DraftError, MessageDraft};
pub use history::render_feed;
pub use state::HistoryState;
