//! Reversible public identifiers.
//!
//! Internal numeric keys never leave the process. Each key is encoded together
//! with its entity tag, masked with a salt-derived key stream, and rendered as
//! unpadded URL-safe base64.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::domain::{error::DomainError, types::EntityKind};

const PAYLOAD_LEN: usize = 9;

#[derive(Debug, Clone)]
pub struct PublicIdCodec {
    mask: [u8; PAYLOAD_LEN],
}

impl PublicIdCodec {
    pub fn new(salt: &str) -> Self {
        let digest = Sha256::digest(salt.as_bytes());
        let mut mask = [0u8; PAYLOAD_LEN];
        mask.copy_from_slice(&digest[..PAYLOAD_LEN]);
        Self { mask }
    }

    pub fn encode(&self, kind: EntityKind, id: u64) -> String {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[0] = kind.tag();
        payload[1..].copy_from_slice(&id.to_be_bytes());
        self.apply_mask(&mut payload);
        URL_SAFE_NO_PAD.encode(payload)
    }

    pub fn decode(&self, kind: EntityKind, token: &str) -> Result<u64, DomainError> {
        let malformed = || DomainError::validation(format!("malformed identifier `{token}`"));

        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim().as_bytes())
            .map_err(|_| malformed())?;
        let mut payload: [u8; PAYLOAD_LEN] = bytes.try_into().map_err(|_| malformed())?;
        self.apply_mask(&mut payload);

        if payload[0] != kind.tag() {
            return Err(malformed());
        }

        let mut id = [0u8; 8];
        id.copy_from_slice(&payload[1..]);
        Ok(u64::from_be_bytes(id))
    }

    pub fn encode_comment(&self, id: u64) -> String {
        self.encode(EntityKind::Comment, id)
    }

    pub fn decode_comment(&self, token: &str) -> Result<u64, DomainError> {
        self.decode(EntityKind::Comment, token)
    }

    fn apply_mask(&self, payload: &mut [u8; PAYLOAD_LEN]) {
        for (byte, mask) in payload.iter_mut().zip(self.mask.iter()) {
            *byte ^= mask;
        }
    }
}

impl Default for PublicIdCodec {
    fn default() -> Self {
        Self::new("threadline")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_what_it_encodes() {
        let codec = PublicIdCodec::new("salt");
        for id in [0, 1, 42, u64::MAX] {
            let token = codec.encode_comment(id);
            assert_eq!(codec.decode_comment(&token).unwrap(), id);
        }
    }

    #[test]
    fn rejects_foreign_entity_tags() {
        let codec = PublicIdCodec::new("salt");
        let token = codec.encode(EntityKind::User, 7);
        assert!(codec.decode_comment(&token).is_err());
    }

    #[test]
    fn rejects_garbage_and_other_salts() {
        let codec = PublicIdCodec::new("salt");
        assert!(codec.decode_comment("not-an-id!").is_err());
        assert!(codec.decode_comment("").is_err());

        let token = PublicIdCodec::new("other").encode_comment(7);
        assert!(codec.decode_comment(&token).is_err());
    }

    #[test]
    fn tokens_are_url_safe() {
        let token = PublicIdCodec::default().encode_comment(123_456_789);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }
}
