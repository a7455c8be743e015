use thiserror::Error;

/// Structured errors surfaced by the rendering pipeline.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("document processing failed: {message}")]
    Document { message: String },
    #[error("emoji pack unavailable: {message}")]
    EmojiPack { message: String },
}

impl RenderError {
    pub fn document(message: impl Into<String>) -> Self {
        Self::Document {
            message: message.into(),
        }
    }

    pub fn emoji_pack(message: impl Into<String>) -> Self {
        Self::EmojiPack {
            message: message.into(),
        }
    }
}
