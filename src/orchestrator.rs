//! The conversation turn pipeline: resolve, persist, generate, persist.
//!
//! Ordering is the contract here. The user message is committed before the
//! generation call goes out, so a failed or timed-out generation never
//! loses what the user typed. The assistant message and the conversation
//! touch happen only after the model replied.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::capture::CaptureStore;
use crate::error::CoreError;
use crate::memory::{bool_setting, SETTING_AUTO_CAPTURE};
use crate::traits::{Generator, MemoryStore};
use crate::types::{ChatMessage, Message, Personality, Role, TurnOutcome, TurnRequest};
use crate::utils::truncate_str;

/// Max characters of the first user text used as a conversation title.
const TITLE_MAX_CHARS: usize = 48;
/// Max characters of the last assistant reply kept as the rolling summary.
const SUMMARY_MAX_CHARS: usize = 120;

const DEFAULT_TITLE: &str = "New conversation";

pub struct Orchestrator {
    store: Arc<dyn MemoryStore>,
    generator: Arc<dyn Generator>,
    captures: Arc<CaptureStore>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        generator: Arc<dyn Generator>,
        captures: Arc<CaptureStore>,
    ) -> Self {
        Self {
            store,
            generator,
            captures,
        }
    }

    /// Run one full turn: persist the user message, generate a reply,
    /// persist the assistant message, return both ends of the exchange.
    pub async fn handle_turn(&self, request: &TurnRequest) -> Result<TurnOutcome, CoreError> {
        let (conversation_id, personality) = self.begin_turn(request).await?;

        let wire = self.wire_messages(personality.as_ref(), &conversation_id).await?;
        let reply = self.generator.generate(&wire, None).await?;

        self.record_assistant_reply(&conversation_id, &reply).await
    }

    /// Same contract as [`handle_turn`], but chunks are forwarded to
    /// `observer` as they arrive. A dropped receiver only stops the
    /// forwarding; the turn still completes and persists the full reply.
    ///
    /// [`handle_turn`]: Orchestrator::handle_turn
    pub async fn handle_turn_streaming(
        &self,
        request: &TurnRequest,
        observer: mpsc::UnboundedSender<String>,
    ) -> Result<TurnOutcome, CoreError> {
        use futures::StreamExt;

        let (conversation_id, personality) = self.begin_turn(request).await?;

        let wire = self.wire_messages(personality.as_ref(), &conversation_id).await?;
        let mut stream = self.generator.generate_stream(&wire).await?;

        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            reply.push_str(&chunk);
            let _ = observer.send(chunk);
        }

        self.record_assistant_reply(&conversation_id, &reply).await
    }

    /// Steps shared by both turn flavors: resolve or create the
    /// conversation, look up the personality, and durably append the user
    /// message (with the latest capture attached when auto-capture is on).
    async fn begin_turn(
        &self,
        request: &TurnRequest,
    ) -> Result<(String, Option<Personality>), CoreError> {
        let conversation = match &request.conversation_id {
            Some(id) => self
                .store
                .get_conversation(id)
                .await?
                .ok_or_else(|| CoreError::constraint(format!("unknown conversation '{}'", id)))?,
            None => {
                let trimmed = request.text.trim();
                let title = if trimmed.is_empty() {
                    DEFAULT_TITLE.to_string()
                } else {
                    truncate_str(trimmed, TITLE_MAX_CHARS)
                };
                self.store
                    .create_conversation(&request.personality_id, &title)
                    .await?
            }
        };

        let personality = self.store.get_personality(&request.personality_id).await?;
        if personality.is_none() {
            debug!(
                personality_id = %request.personality_id,
                "personality not found; generating without a system prompt"
            );
        }

        let mut user_msg = Message::new(&conversation.id, Role::User, &request.text);
        if bool_setting(self.store.as_ref(), SETTING_AUTO_CAPTURE, true).await {
            self.attach_latest_capture(&mut user_msg).await;
        }
        self.store.append_message(&user_msg).await?;

        Ok((conversation.id, personality))
    }

    /// Best-effort context decoration. The capture path rides along as
    /// message metadata; it is never injected into the model-bound text.
    async fn attach_latest_capture(&self, msg: &mut Message) {
        match self.captures.latest().await {
            Ok(Some(record)) => {
                msg.screenshot_path = Some(record.path.to_string_lossy().into_owned());
            }
            Ok(None) => {}
            Err(e) => warn!("latest capture unavailable: {}", e),
        }
    }

    /// Full stored history mapped to wire messages, prefixed with the
    /// personality's system prompt when one exists.
    async fn wire_messages(
        &self,
        personality: Option<&Personality>,
        conversation_id: &str,
    ) -> Result<Vec<ChatMessage>, CoreError> {
        let history = self.store.get_history(conversation_id).await?;

        let mut wire = Vec::with_capacity(history.len() + 1);
        if let Some(p) = personality {
            wire.push(ChatMessage::system(&p.system_prompt));
        }
        wire.extend(history.iter().map(ChatMessage::from_message));
        Ok(wire)
    }

    async fn record_assistant_reply(
        &self,
        conversation_id: &str,
        reply: &str,
    ) -> Result<TurnOutcome, CoreError> {
        let assistant_message = Message::new(conversation_id, Role::Assistant, reply);
        self.store.append_message(&assistant_message).await?;

        let summary = truncate_str(reply.trim(), SUMMARY_MAX_CHARS);
        self.store
            .touch_conversation(conversation_id, Some(&summary))
            .await?;

        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                CoreError::storage(format!("conversation '{}' vanished mid-turn", conversation_id))
            })?;

        Ok(TurnOutcome {
            conversation,
            assistant_message,
        })
    }
}
