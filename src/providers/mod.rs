//! LLM engine adapters.
//!
//! [`ChatEngine`] is the seam the governor and the prompt pool work against:
//! validate a conversation up front, then issue it as a single chat call.
//! The one concrete adapter today targets OpenAI-style chat completions.

mod error;
mod openai;

pub use error::{ProviderError, ProviderErrorKind};
pub use openai::{OpenAiEngine, OpenAiSettings};

use async_trait::async_trait;

use crate::conversation::{AssistantTurn, Conversation};

#[async_trait]
pub trait ChatEngine: Send + Sync {
    /// Reject a conversation the engine cannot serve before any bytes go out:
    /// unknown model, capability mismatch, out-of-range parameters.
    fn validate(&self, conversation: &Conversation) -> anyhow::Result<()>;

    /// Issue one chat call and decode the first choice into an assistant
    /// turn. Classification of failures is the adapter's job; retry policy is
    /// the governor's.
    async fn chat(&self, conversation: &Conversation) -> Result<AssistantTurn, ProviderError>;
}
