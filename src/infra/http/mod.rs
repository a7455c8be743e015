//! Outbound HTTP adapters for the collaborator ports.

mod emoji;
mod moderation;
mod push;
mod qq;

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::application::ports::PortError;
use crate::infra::error::InfraError;

pub use emoji::HttpEmojiSource;
pub use moderation::HttpContentClassifier;
pub use push::WebhookPushChannel;
pub use qq::QqProfileClient;

pub fn user_agent() -> &'static str {
    concat!("threadline/", env!("CARGO_PKG_VERSION"))
}

/// Shared client for every adapter; `timeout` bounds each whole request.
pub fn build_client(timeout: Duration) -> Result<Client, InfraError> {
    Client::builder()
        .user_agent(user_agent())
        .timeout(timeout)
        .build()
        .map_err(|err| InfraError::http_client(err.to_string()))
}

/// `{code, msg, data}` wrapper used by the classifier and QQ APIs.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub(crate) fn into_data(self) -> Result<T, PortError> {
        if !matches!(self.code, 0 | 200) {
            return Err(PortError::response(format!(
                "code {}: {}",
                self.code, self.msg
            )));
        }
        self.data
            .ok_or_else(|| PortError::response("response carried no data"))
    }
}

pub(crate) async fn read_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, PortError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(PortError::response(format!("status {status} body {text}")));
    }
    response.json::<T>().await.map_err(PortError::transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_accepts_zero_and_200_codes() {
        let ok: Envelope<u8> = serde_json::from_str(r#"{"code":200,"msg":"ok","data":1}"#).unwrap();
        assert_eq!(ok.into_data().unwrap(), 1);
        let zero: Envelope<u8> = serde_json::from_str(r#"{"code":0,"data":2}"#).unwrap();
        assert_eq!(zero.into_data().unwrap(), 2);
    }

    #[test]
    fn envelope_errors_carry_the_message() {
        let err: Envelope<u8> =
            serde_json::from_str(r#"{"code":500,"msg":"quota exceeded"}"#).unwrap();
        let message = err.into_data().unwrap_err().to_string();
        assert!(message.contains("quota exceeded"));
    }
}
