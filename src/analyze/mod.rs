//! Report classification: prompts, transport, retry, rate limiting and the
//! batch/single classifier built from them.

pub mod chat;
pub mod classifier;
pub mod parse;
pub mod prompt;
pub mod rate_limit;
pub mod retry;
pub mod types;

pub use chat::{ChatMessage, ChatRequest, ChatTransport, DynChatTransport, ZChatClient};
pub use classifier::{BatchOutcome, Classifier, ClassifierSettings};
pub use rate_limit::RateLimiter;
pub use retry::{Backoff, RetryFailure, RetryPolicy};
pub use types::{Classification, ClassifiedReport, Impact, Sentiment};
