// src/sink.rs
//
// Wyjście na platformę czatu: ban, usunięcie wiadomości, ulotne powiadomienie.
// Transport (Bot API) implementuje ten trait poza rdzeniem.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("not enough rights: {0}")]
    Forbidden(String),
    #[error("target not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ModerationSink: Send + Sync {
    async fn ban(&self, chat_id: i64, user_id: i64) -> Result<(), SinkError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), SinkError>;

    /// Wysyła powiadomienie, które platforma/transport usuwa po `ttl_secs`.
    async fn send_transient_notice(
        &self,
        chat_id: i64,
        text: &str,
        ttl_secs: u64,
    ) -> Result<(), SinkError>;
}

/// Sink, który tylko loguje (tryb "dry run").
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlySink;

#[async_trait]
impl ModerationSink for LogOnlySink {
    async fn ban(&self, chat_id: i64, user_id: i64) -> Result<(), SinkError> {
        tracing::info!(chat_id, user_id, "dry-run: ban");
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), SinkError> {
        tracing::info!(chat_id, message_id, "dry-run: delete message");
        Ok(())
    }

    async fn send_transient_notice(
        &self,
        chat_id: i64,
        text: &str,
        ttl_secs: u64,
    ) -> Result<(), SinkError> {
        tracing::info!(chat_id, ttl_secs, %text, "dry-run: notice");
        Ok(())
    }
}
