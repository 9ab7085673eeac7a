pub mod client;
pub mod models;

pub use client::{HttpShelleyClient, ShelleyClient};
pub use models::{
    ConversationDetail, ConversationSummary, Message, ModelEntry, ModelList, StartResponse,
    parse_summaries,
};
