use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::application::ports::{PortError, QqProfile, QqProfileLookup};
use crate::application::repos::SettingsSource;
use crate::application::settings::keys;

use super::{Envelope, read_json};

/// `data` is a profile on success and a bare message on failure.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QqData {
    Profile(QqProfile),
    Message(String),
}

fn decode(envelope: Envelope<QqData>) -> Result<QqProfile, PortError> {
    match envelope.into_data()? {
        QqData::Profile(profile) => Ok(profile),
        QqData::Message(message) => Err(PortError::response(message)),
    }
}

/// QQ profile API client; endpoint and key are read from site settings per call.
#[derive(Clone)]
pub struct QqProfileClient {
    client: Client,
    settings: Arc<dyn SettingsSource>,
}

impl QqProfileClient {
    pub fn new(client: Client, settings: Arc<dyn SettingsSource>) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl QqProfileLookup for QqProfileClient {
    async fn lookup(&self, qq: &str) -> Result<QqProfile, PortError> {
        let endpoint = self
            .settings
            .get_string(keys::QQ_API_URL)
            .await
            .filter(|url| !url.trim().is_empty())
            .ok_or(PortError::NotConfigured("QQ API url"))?;

        let mut url = Url::parse(endpoint.trim())
            .map_err(|err| PortError::response(format!("invalid QQ API url: {err}")))?;
        url.query_pairs_mut().append_pair("qq", qq);

        let mut request = self.client.get(url);
        if let Some(key) = self
            .settings
            .get_string(keys::QQ_API_KEY)
            .await
            .filter(|key| !key.trim().is_empty())
        {
            request = request.bearer_auth(key.trim());
        }

        let response = request.send().await.map_err(PortError::transport)?;
        decode(read_json(response).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_payload_decodes() {
        let raw = r#"{"code":200,"msg":"ok","data":{"qq":"10001","nick":"pony","email":"10001@qq.com","avatar":"https://q.example/10001.jpg"}}"#;
        let profile = decode(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(profile.nick, "pony");
        assert_eq!(profile.email, "10001@qq.com");
    }

    #[test]
    fn string_data_is_an_error() {
        let raw = r#"{"code":200,"msg":"ok","data":"qq not found"}"#;
        let err = decode(serde_json::from_str(raw).unwrap()).unwrap_err();
        assert!(err.to_string().contains("qq not found"));
    }
}
