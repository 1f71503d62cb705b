use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::model::SubscriberId;

const ENV_SLAVE_PREFIX: &str = "RELAY_AUTH__SLAVES__";

/// Subscriber names set through `RELAY_AUTH__SLAVES__<NAME>` whose case the
/// config loader folds away, as `(variable name, identity it registers as)`.
fn lowercased_env_slots<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut folded: Vec<_> = vars
        .into_iter()
        .filter_map(|(key, _)| {
            let prefix = key.get(..ENV_SLAVE_PREFIX.len())?;
            if !prefix.eq_ignore_ascii_case(ENV_SLAVE_PREFIX) {
                return None;
            }
            let name = &key[ENV_SLAVE_PREFIX.len()..];
            let lowered = name.to_lowercase();
            (!name.is_empty() && lowered != name).then(|| (key.clone(), lowered))
        })
        .collect();
    folded.sort();
    folded
}

/// Secrets for the control plane and every subscriber slot.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    control_plane: String,
    subscribers: HashMap<SubscriberId, String>,
}

impl CredentialStore {
    pub fn new<I, K, V>(control_plane: impl Into<String>, subscribers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<SubscriberId>,
        V: Into<String>,
    {
        let mut table = HashMap::new();
        for (id, secret) in subscribers {
            let id = id.into();
            let secret = secret.into();
            if secret.is_empty() {
                warn!(subscriber = %id, "⚠️ Empty secret configured, slot disabled");
                continue;
            }
            table.insert(id, secret);
        }

        Self {
            control_plane: control_plane.into(),
            subscribers: table,
        }
    }

    pub fn from_settings(auth: &AuthConfig) -> Self {
        let store = Self::new(
            auth.master_token.clone(),
            auth.slaves
                .iter()
                .map(|(id, secret)| (SubscriberId::new(id.clone()), secret.clone())),
        );

        if store.control_plane.is_empty() {
            warn!("⚠️ auth.master_token not set. Every control-plane request will be rejected.");
        }
        let vars = std::env::vars_os().map(|(k, v)| {
            (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned())
        });
        for (var, id) in lowercased_env_slots(vars) {
            warn!(
                subscriber = %id,
                "⚠️ {} is registered as '{}'; subscribers must connect with the lowercase id",
                var,
                id
            );
        }
        info!(
            "🔐 Credential store loaded ({} subscriber slots)",
            store.subscribers.len()
        );
        store
    }

    pub fn control_plane_secret(&self) -> &str {
        &self.control_plane
    }

    /// `None` for an unknown identity; that is not an error.
    pub fn subscriber_secret(&self, id: &SubscriberId) -> Option<&str> {
        self.subscribers.get(id).map(String::as_str)
    }

    pub fn subscriber_ids(&self) -> Vec<&SubscriberId> {
        let mut ids: Vec<_> = self.subscribers.keys().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let store = CredentialStore::new("master", [("alpha", "a-secret"), ("beta", "b-secret")]);

        assert_eq!(store.control_plane_secret(), "master");
        assert_eq!(
            store.subscriber_secret(&SubscriberId::from("alpha")),
            Some("a-secret")
        );
        assert_eq!(store.subscriber_secret(&SubscriberId::from("gamma")), None);
    }

    #[test]
    fn test_empty_subscriber_secret_is_dropped() {
        let store = CredentialStore::new("master", [("alpha", ""), ("beta", "b")]);
        assert_eq!(store.subscriber_secret(&SubscriberId::from("alpha")), None);
        assert_eq!(store.subscriber_ids(), vec![&SubscriberId::from("beta")]);
    }

    #[test]
    fn test_env_slot_names_reported_when_case_folded() {
        let vars = [
            ("RELAY_AUTH__SLAVES__Alpha", "a"),
            ("RELAY_AUTH__SLAVES__BETA", "b"),
            ("RELAY_AUTH__SLAVES__gamma", "c"),
            ("RELAY_AUTH__MASTER_TOKEN", "m"),
            ("HOME", "/root"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()));

        assert_eq!(
            lowercased_env_slots(vars),
            vec![
                ("RELAY_AUTH__SLAVES__Alpha".to_string(), "alpha".to_string()),
                ("RELAY_AUTH__SLAVES__BETA".to_string(), "beta".to_string()),
            ]
        );
    }

    #[test]
    fn test_from_settings() {
        let mut auth = AuthConfig {
            master_token: "m".into(),
            ..Default::default()
        };
        auth.slaves.insert("alpha".into(), "s".into());

        let store = CredentialStore::from_settings(&auth);
        assert_eq!(store.subscriber_secret(&SubscriberId::from("alpha")), Some("s"));
    }
}
