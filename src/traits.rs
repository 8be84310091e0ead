use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::CoreError;
use crate::types::{
    ChatMessage, Conversation, GenerationStatus, MemoryEntry, Message, Personality,
    SamplingOverrides,
};

/// A lazily pulled sequence of partial-content chunks. Finite and
/// forward-only; dropping it releases the underlying connection.
pub type ChunkStream = BoxStream<'static, Result<String, CoreError>>;

/// Durable relational memory: conversations, messages, personalities,
/// memory entries, and settings.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn create_conversation(
        &self,
        personality_id: &str,
        title: &str,
    ) -> Result<Conversation, CoreError>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, CoreError>;

    /// All conversations, most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, CoreError>;

    /// Stamp `updated_at` and optionally replace the rolling summary.
    /// Conversation bookkeeping belongs to the orchestrator, not to
    /// `append_message`.
    async fn touch_conversation(&self, id: &str, summary: Option<&str>)
        -> Result<(), CoreError>;

    /// Insert one message. Fails with a constraint error when the
    /// conversation does not exist. Never updates the parent conversation.
    async fn append_message(&self, msg: &Message) -> Result<(), CoreError>;

    /// All messages for a conversation in creation order (ties broken by
    /// insertion order). Empty for unknown conversations, never an error.
    async fn get_history(&self, conversation_id: &str) -> Result<Vec<Message>, CoreError>;

    async fn get_personality(&self, id: &str) -> Result<Option<Personality>, CoreError>;

    async fn list_personalities(&self) -> Result<Vec<Personality>, CoreError>;

    async fn upsert_personality(&self, personality: &Personality) -> Result<(), CoreError>;

    async fn append_memory_entry(&self, entry: &MemoryEntry) -> Result<(), CoreError>;

    /// Entries for a conversation, highest importance first, ties in
    /// insertion order.
    async fn list_memory_entries(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<MemoryEntry>, CoreError>;

    /// Delete entries beyond `cap`, dropping lowest-importance oldest rows
    /// first. Returns how many were deleted.
    async fn prune_memory_entries(&self, cap: u64) -> Result<u64, CoreError>;

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<(), CoreError>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CoreError>;
}

/// Generation endpoint client: blocking and streaming chat plus
/// introspection. Implemented by the Ollama client in production and by a
/// scripted mock in tests.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        overrides: Option<&SamplingOverrides>,
    ) -> Result<String, CoreError>;

    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, CoreError>;

    async fn list_models(&self) -> Result<Vec<String>, CoreError>;

    fn status(&self) -> GenerationStatus;
}

/// Source of raw screen frames. The production source shells out to the
/// platform screenshot tool; tests script it.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    /// Grab one still frame as encoded PNG bytes.
    async fn grab(&self) -> Result<Vec<u8>, CoreError>;
}
