use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::core::error::SimError;
use crate::core::types::Result;
use crate::security::signing::Signer;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 签名器，模拟钱包签名
///
/// 签名内容: intent_id + ":" + payload，十六进制输出
pub struct HmacSigner {
    identity: String,
    secret: Vec<u8>,
}

impl HmacSigner {
    pub fn new(identity: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.as_ref().to_vec(),
        }
    }
}

#[async_trait]
impl Signer for HmacSigner {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn sign(&self, data: &[u8], intent_id: &str) -> Result<String> {
        hmac_sha256(&self.secret, &[intent_id.as_bytes(), b":", data])
    }
}

/// 通用 HMAC-SHA256 帮助方法
pub fn hmac_sha256(secret: &[u8], parts: &[&[u8]]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| SimError::SignerFailure(format!("HMAC 密钥无效: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// 交易哈希: SHA256(payload + signature)
pub fn tx_hash(payload: &[u8], signature: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.update(signature.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}
