use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::comments::moderation::CLASSIFIER_CHAR_BUDGET;
use crate::application::ports::{Classification, ContentClassifier, PortError};

use super::{Envelope, read_json};

const SOURCE: &str = "infra::http::moderation";

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(flatten)]
    envelope: Envelope<Classification>,
    #[serde(default)]
    request_id: Option<String>,
}

/// Posts comment text to a moderation endpoint and decodes its verdict.
#[derive(Clone)]
pub struct HttpContentClassifier {
    client: Client,
}

impl HttpContentClassifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentClassifier for HttpContentClassifier {
    async fn classify(&self, endpoint: &str, text: &str) -> Result<Classification, PortError> {
        let text = match text.char_indices().nth(CLASSIFIER_CHAR_BUDGET) {
            Some((cut, _)) => &text[..cut],
            None => text,
        };

        let response = self
            .client
            .post(endpoint)
            .json(&ClassifyRequest { text })
            .send()
            .await
            .map_err(PortError::transport)?;
        let body: ClassifyResponse = read_json(response).await?;

        debug!(
            target = SOURCE,
            op = "classify",
            result = "ok",
            request_id = body.request_id.as_deref().unwrap_or("-"),
            "Classifier responded"
        );
        body.envelope.into_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_envelope_decodes() {
        let raw = r#"{
            "code": 200,
            "msg": "success",
            "data": {
                "categories": ["spam"],
                "explanation": "advertising",
                "is_violation": true,
                "keywords": ["buy"],
                "risk_level": "高"
            },
            "request_id": "r-1"
        }"#;
        let body: ClassifyResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.request_id.as_deref(), Some("r-1"));

        let verdict = body.envelope.into_data().unwrap();
        assert!(verdict.is_violation);
        assert_eq!(verdict.categories, vec!["spam".to_string()]);
        assert_eq!(verdict.risk_level, "高");
    }
}
