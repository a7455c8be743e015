use async_trait::async_trait;
use reqwest::Client;

use crate::application::render::{EmojiPacks, EmojiSource, RenderError};

/// Downloads OwO-style emoji pack documents.
#[derive(Clone)]
pub struct HttpEmojiSource {
    client: Client,
}

impl HttpEmojiSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EmojiSource for HttpEmojiSource {
    async fn fetch(&self, url: &str) -> Result<EmojiPacks, RenderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| RenderError::emoji_pack(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::emoji_pack(format!("status {status} from {url}")));
        }

        response
            .json::<EmojiPacks>()
            .await
            .map_err(|err| RenderError::emoji_pack(format!("invalid pack document: {err}")))
    }
}
