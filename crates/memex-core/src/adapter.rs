//! Records model calls into conversation history.
//!
//! [`HistoryRecorder`] sits between a caller and a [`ChatProvider`]: inbound
//! messages are appended before the call, the provider sees the
//! algorithm-selected window, and every reply choice is appended afterwards.

use memex_models::NewMessage;
use memex_traits::{
    ChatProvider, HistoryError, ProviderMessage, ProviderRequest, ProviderResponse, Result,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::manager::HistoryManager;

/// Provider reply together with the thread it was recorded in.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub thread_id: String,
    pub response: ProviderResponse,
}

/// Wraps a provider so every exchange lands in a thread.
#[derive(Clone)]
pub struct HistoryRecorder {
    manager: HistoryManager,
    provider: Arc<dyn ChatProvider>,
}

impl HistoryRecorder {
    pub fn new(manager: HistoryManager, provider: Arc<dyn ChatProvider>) -> Self {
        Self { manager, provider }
    }

    pub fn manager(&self) -> &HistoryManager {
        &self.manager
    }

    /// Record `messages`, call the provider with the context window and
    /// record its reply.
    ///
    /// Without a `thread_id` a new thread is created. Inbound messages stay
    /// recorded when the provider call fails.
    pub async fn chat(
        &self,
        thread_id: Option<&str>,
        messages: Vec<ProviderMessage>,
        model: Option<&str>,
    ) -> Result<ChatOutcome> {
        let thread_id = match thread_id {
            Some(id) => id.to_string(),
            None => self.manager.create_thread(None).await?.id,
        };

        for message in messages {
            let inbound = NewMessage::new(message.role, message.content).with_meta("type", "input");
            self.manager.add_message_with(&thread_id, inbound).await?;
        }

        let context = self
            .manager
            .get_context_window(&thread_id)
            .await?
            .into_iter()
            .map(|m| ProviderMessage::new(m.role, m.content))
            .collect::<Vec<_>>();
        debug!(thread_id = %thread_id, messages = context.len(), "Calling provider");

        let request = ProviderRequest {
            model: model.map(str::to_string),
            messages: context,
        };
        let response = self.provider.complete(request).await.map_err(|err| {
            warn!(thread_id = %thread_id, error = %err, "Provider call failed");
            match err {
                HistoryError::Provider(_) => err,
                other => HistoryError::Provider(other.to_string()),
            }
        })?;

        for choice in &response.choices {
            let outbound = NewMessage::new(choice.role, choice.content.clone().unwrap_or_default())
                .with_meta("type", "output")
                .with_meta("finish_reason", choice.finish_reason.clone())
                .with_meta("model", response.model.clone());
            self.manager.add_message_with(&thread_id, outbound).await?;
        }

        Ok(ChatOutcome {
            thread_id,
            response,
        })
    }
}
