//! State-store persistence.
//!
//! Every message-carrying element is appended to the conversation named
//! by the element's `conversation_id` metadata (falling back to the
//! configured default). The `system_prompt` from element metadata is
//! materialised as a leading system-role message when the conversation
//! does not yet carry one. Externalized media parts are recorded on the
//! conversation state.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use arena_domain::element::{meta, ElementPayload, StreamElement};
use arena_domain::message::{ContentPart, Message};
use arena_domain::state::{ConversationState, MediaRecord};
use arena_store::StateStore;

use crate::{forward, next_element, Stage};

pub struct StateStoreSave {
    store: Arc<StateStore>,
    default_conversation_id: String,
}

impl StateStoreSave {
    pub fn new(store: Arc<StateStore>, default_conversation_id: impl Into<String>) -> Self {
        Self {
            store,
            default_conversation_id: default_conversation_id.into(),
        }
    }

    fn persist(&self, element: &StreamElement, message: &Message) -> arena_domain::error::Result<()> {
        let conversation_id = element
            .conversation_id()
            .unwrap_or(&self.default_conversation_id)
            .to_owned();

        let mut state = match self.store.load(&conversation_id) {
            Ok(state) => state,
            Err(arena_domain::error::Error::NotFound(_)) => {
                ConversationState::new(&conversation_id, "")
            }
            Err(e) => return Err(e),
        };

        if let Some(prompt) = element.system_prompt() {
            if !state.has_system_message() {
                state.messages.insert(0, Message::system(prompt));
            }
        }

        let mut message = message.clone();
        if message.turn_id().is_none() {
            if let Some(turn_id) = element.turn_id() {
                message
                    .metadata
                    .insert(meta::TURN_ID.into(), serde_json::json!(turn_id));
            }
        }

        state.push_message(message);

        let message_index = state.messages.len() - 1;
        let appended = &state.messages[message_index];
        if let Some(parts) = &appended.parts {
            for (part_index, part) in parts.iter().enumerate() {
                if let ContentPart::Media {
                    media_type,
                    path: Some(path),
                    size_bytes,
                    sha256,
                    ..
                } = part
                {
                    state.media.push(MediaRecord {
                        message_index,
                        part_index,
                        path: path.clone(),
                        media_type: media_type.clone(),
                        size_bytes: size_bytes.unwrap_or(0),
                        sha256: sha256.clone().unwrap_or_default(),
                    });
                }
            }
        }

        self.store.save(state)
    }
}

#[async_trait]
impl Stage for StateStoreSave {
    fn name(&self) -> &'static str {
        "state_store_save"
    }

    async fn run(
        self: Box<Self>,
        cancel: CancellationToken,
        mut input: mpsc::Receiver<StreamElement>,
        output: mpsc::Sender<StreamElement>,
    ) {
        while let Some(element) = next_element(&mut input, &cancel).await {
            if let ElementPayload::Message { message } = &element.payload {
                if let Err(e) = self.persist(&element, message) {
                    tracing::warn!(error = %e, "state store save failed");
                    if !forward(
                        &output,
                        &cancel,
                        StreamElement::error(format!("pipeline: state store save: {e}")),
                    )
                    .await
                    {
                        return;
                    }
                }
            }
            if !forward(&output, &cancel, element).await {
                return;
            }
        }
    }
}
