pub mod chat;
pub mod timestamp;
pub mod user;

pub use chat::{
    Conversation, ConversationSummary, Message, SeenResponse, SendMessageRequest,
    StartConversationRequest, TypingRequest, normalized_pair,
};
pub use timestamp::Timestamp;
pub use user::{ListingRef, UserProfile};
