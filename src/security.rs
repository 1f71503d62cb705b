use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::warn;

use crate::credentials::CredentialStore;
use crate::error::RelayError;
use crate::metrics;
use crate::model::SubscriberId;

type HmacSha256 = Hmac<Sha256>;

const TAG_CONTEXT: &[u8] = b"signal-relay/credential-check";

/// Compares two secrets without leaking how much of them matched.
///
/// Both sides are turned into an HMAC tag keyed by the secret itself and the
/// tags are compared with `verify_slice`, which is constant time.
fn secrets_match(expected: &str, presented: &str) -> bool {
    if expected.is_empty() {
        return false;
    }

    let Ok(mut presented_mac) = HmacSha256::new_from_slice(presented.as_bytes()) else {
        return false;
    };
    presented_mac.update(TAG_CONTEXT);
    let tag = presented_mac.finalize().into_bytes();

    let Ok(mut expected_mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    expected_mac.update(TAG_CONTEXT);
    expected_mac.verify_slice(&tag).is_ok()
}

/// Checks control-plane requests and subscriber connection attempts.
#[derive(Clone)]
pub struct AuthGate {
    credentials: Arc<CredentialStore>,
}

impl AuthGate {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self { credentials }
    }

    pub fn check_control_plane(&self, presented: Option<&str>) -> Result<(), RelayError> {
        let presented = presented.unwrap_or_default();
        if secrets_match(self.credentials.control_plane_secret(), presented) {
            return Ok(());
        }

        metrics::inc_auth_rejection("control_plane");
        warn!("⛔ Control-plane request rejected (missing or invalid secret)");
        Err(RelayError::Forbidden)
    }

    /// Succeeds only if `id` has a configured secret equal to `presented`.
    pub fn check_subscriber(
        &self,
        id: Option<&str>,
        presented: Option<&str>,
    ) -> Result<SubscriberId, RelayError> {
        let Some(id) = id.filter(|id| !id.is_empty()) else {
            metrics::inc_auth_rejection("subscriber");
            warn!("⛔ Subscriber connection without client_id rejected");
            return Err(RelayError::Unauthorized("missing client_id".to_string()));
        };

        let id = SubscriberId::new(id);
        let authorized = match self.credentials.subscriber_secret(&id) {
            Some(expected) => secrets_match(expected, presented.unwrap_or_default()),
            None => false,
        };

        if authorized {
            Ok(id)
        } else {
            metrics::inc_auth_rejection("subscriber");
            warn!(subscriber = %id, "⛔ Subscriber credentials rejected");
            Err(RelayError::Unauthorized(id.to_string()))
        }
    }
}
