use ixp_gate_domain::gateway::GatewayError;
use ixp_gate_domain::model::OrderId;
use ring::hmac;

/// Checks checkout signatures, which the gateway computes as
/// `hex(HMAC-SHA256(key_secret, "{order_id}|{payment_id}"))`.
pub struct SignatureVerifier {
    key: hmac::Key,
}

impl SignatureVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    pub fn sign(&self, order_id: &OrderId, payment_id: &str) -> String {
        let tag = hmac::sign(&self.key, payload(order_id, payment_id).as_bytes());
        hex::encode(tag.as_ref())
    }

    /// Constant-time comparison against the decoded signature.
    pub fn verify(
        &self,
        order_id: &OrderId,
        payment_id: &str,
        signature: &str,
    ) -> Result<(), GatewayError> {
        let tag = hex::decode(signature.trim()).map_err(|_| GatewayError::SignatureMismatch)?;
        hmac::verify(&self.key, payload(order_id, payment_id).as_bytes(), &tag)
            .map_err(|_| GatewayError::SignatureMismatch)
    }
}

fn payload(order_id: &OrderId, payment_id: &str) -> String {
    format!("{}|{}", order_id.as_str(), payment_id)
}
