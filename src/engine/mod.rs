pub mod persistence;
pub mod store;

pub use persistence::Persistence;
pub use store::{message_from_words, MessageDocument, MessageStore, MESSAGE_FILE};
