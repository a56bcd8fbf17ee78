// Webhook Signing - HMAC signatures over the canonical JSON body

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use super::SignatureAlgorithm;

/// Hex-encoded HMAC over the canonical JSON bytes of the payload, keyed
/// by the endpoint secret. The receiver verifies by recomputing over the
/// raw request body.
pub fn sign_payload(
    secret: &str,
    payload: &serde_json::Value,
    algorithm: SignatureAlgorithm,
) -> Result<String, serde_json::Error> {
    let body = serde_json::to_vec(payload)?;
    Ok(sign_bytes(secret.as_bytes(), &body, algorithm))
}

pub fn sign_bytes(secret: &[u8], body: &[u8], algorithm: SignatureAlgorithm) -> String {
    match algorithm {
        SignatureAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret)
                .expect("HMAC accepts keys of any length");
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        SignatureAlgorithm::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(secret)
                .expect("HMAC accepts keys of any length");
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
    }
}
