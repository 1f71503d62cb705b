use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Stable name of a subscriber slot, assigned through configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifies one physical connection. A subscriber that reconnects gets a
/// fresh `ConnectionId` under the same `SubscriberId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0.simple())
    }
}

/// The payload forwarded to subscribers. Only `action` and `symbol` are
/// required; the relay never interprets the remaining fields. Absent
/// optionals go out as `null` so every subscriber sees the same keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub action: String,
    pub symbol: String,
    #[serde(rename = "type", default)]
    pub side: Option<String>,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub sl: Option<f64>,
    #[serde(default)]
    pub tp: Option<f64>,
    #[serde(default)]
    pub ticket: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Control-plane submission: the signal plus routing metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalRequest {
    #[serde(flatten)]
    pub signal: Signal,
    #[serde(default)]
    pub target_ids: Option<HashSet<SubscriberId>>,
}

impl SignalRequest {
    pub fn broadcast(signal: Signal) -> Self {
        Self {
            signal,
            target_ids: None,
        }
    }

    pub fn targeted<I, T>(signal: Signal, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<SubscriberId>,
    {
        Self {
            signal,
            target_ids: Some(ids.into_iter().map(Into::into).collect()),
        }
    }

    /// Splits routing from payload. An empty `target_ids` list means broadcast.
    pub fn into_parts(self) -> (Signal, Option<HashSet<SubscriberId>>) {
        let targets = self.target_ids.filter(|ids| !ids.is_empty());
        (self.signal, targets)
    }
}

/// Query parameters a subscriber presents when opening its connection,
/// e.g. `/ws?client_id=alpha&token=secret`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default, alias = "id")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl ConnectParams {
    pub fn from_query(query: Option<&str>) -> Self {
        query
            .and_then(|q| serde_urlencoded::from_str(q).ok())
            .unwrap_or_default()
    }
}

/// Outcome of a single dispatch call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: Vec<SubscriberId>,
    /// Registered subscribers after failed ones were evicted.
    pub clients: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignalResponse {
    pub status: String,
    pub clients: usize,
    pub delivered: usize,
}

impl From<&DispatchReport> for SignalResponse {
    fn from(report: &DispatchReport) -> Self {
        Self {
            status: "Signal sent".to_string(),
            clients: report.clients,
            delivered: report.delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signal_request_parsing() {
        let body = json!({
            "action": "open",
            "symbol": "EURUSD",
            "type": "long",
            "entry_price": 1.0845,
            "sl": 1.08,
            "tp": 1.095,
            "ticket": 991245,
            "target_ids": ["alpha", "beta"]
        });

        let req: SignalRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.signal.action, "open");
        assert_eq!(req.signal.side.as_deref(), Some("long"));
        assert_eq!(req.signal.entry_price, Some(1.0845));
        assert_eq!(req.signal.ticket, Some(991245));

        let (signal, targets) = req.into_parts();
        let wire = serde_json::to_value(&signal).unwrap();
        assert_eq!(wire["entry_price"], json!(1.0845));
        assert_eq!(wire["sl"], json!(1.08));

        let targets = targets.unwrap();
        assert!(targets.contains(&SubscriberId::from("alpha")));
        assert!(targets.contains(&SubscriberId::from("beta")));
    }

    #[test]
    fn test_minimal_signal_sends_absent_fields_as_null() {
        let req: SignalRequest =
            serde_json::from_value(json!({"action": "close", "symbol": "XAUUSD"})).unwrap();
        let (signal, targets) = req.into_parts();
        assert!(targets.is_none());

        let wire = serde_json::to_value(&signal).unwrap();
        assert_eq!(
            wire,
            json!({
                "action": "close",
                "symbol": "XAUUSD",
                "type": null,
                "entry_price": null,
                "sl": null,
                "tp": null,
                "ticket": null,
                "reason": null
            })
        );
    }

    #[test]
    fn test_extreme_prices_pass_through_unchanged() {
        let req: SignalRequest = serde_json::from_value(json!({
            "action": "open",
            "symbol": "SHIB",
            "entry_price": 1e29,
            "sl": 1e-30,
            "tp": 0
        }))
        .unwrap();
        let (signal, _) = req.into_parts();

        let text = serde_json::to_string(&signal).unwrap();
        let back: Signal = serde_json::from_str(&text).unwrap();
        assert_eq!(back.entry_price, Some(1e29));
        assert_eq!(back.sl, Some(1e-30));
        assert_eq!(back.tp, Some(0.0));
        assert_eq!(back, signal);
    }

    #[test]
    fn test_payload_never_carries_target_ids() {
        let req = SignalRequest::targeted(
            Signal {
                action: "open".into(),
                symbol: "BTCUSD".into(),
                side: None,
                entry_price: None,
                sl: None,
                tp: None,
                ticket: None,
                reason: Some("breakout".into()),
            },
            ["alpha"],
        );
        let (signal, _) = req.into_parts();
        let wire = serde_json::to_value(&signal).unwrap();
        assert!(wire.get("target_ids").is_none());
        assert_eq!(wire["reason"], "breakout");
    }

    #[test]
    fn test_empty_targets_mean_broadcast() {
        let req: SignalRequest = serde_json::from_value(
            json!({"action": "open", "symbol": "EURUSD", "target_ids": []}),
        )
        .unwrap();
        assert!(req.into_parts().1.is_none());
    }

    #[test]
    fn test_connect_params_from_query() {
        let params = ConnectParams::from_query(Some("client_id=alpha&token=s%3Dcret"));
        assert_eq!(params.client_id.as_deref(), Some("alpha"));
        assert_eq!(params.token.as_deref(), Some("s=cret"));

        let empty = ConnectParams::from_query(None);
        assert!(empty.client_id.is_none());
        assert!(empty.token.is_none());
    }

    #[test]
    fn test_missing_symbol_rejected() {
        let parsed = serde_json::from_value::<SignalRequest>(json!({"action": "open"}));
        assert!(parsed.is_err());
    }
}
