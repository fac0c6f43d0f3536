//! Feed Control Messages
//!
//! Client-to-server JSON subscription requests and the fixed text markers
//! of the positional quote protocol.
//!
//! ```json
//! {"type":"sub","topic":"stockRealtimeBySymbolsAndBoards",
//!  "variables":{"symbols":["MBB"],"boardIds":["MAIN"]},
//!  "component":"priceTableEquities"}
//! {"type":"sub","topic":"notifyIndexRealtimeByListV2","variables":["VNINDEX","VN30"]}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::market::TRACKED_INDICES;

/// Prefix of a main-board quote frame.
pub const MAIN_FRAME_PREFIX: &str = "MAIN|S#";

/// Prefix of an index quote frame.
pub const INDEX_FRAME_PREFIX: &str = "I#";

/// Liveness marker sent by the server.
pub const HEARTBEAT_MARKER: &str = "__TICK__";

/// Prefix of the server's subscription acknowledgement.
pub const ACK_PREFIX: &str = "Subscribed";

/// Field delimiter of quote frames.
pub const FIELD_DELIMITER: char = '|';

/// Topic for per-symbol equity quotes.
pub const SYMBOL_TOPIC: &str = "stockRealtimeBySymbolsAndBoards";

/// Topic for index quotes.
pub const INDEX_TOPIC: &str = "notifyIndexRealtimeByListV2";

/// Board the symbol subscription is restricted to.
pub const MAIN_BOARD_ID: &str = "MAIN";

/// Component tag of the symbol subscription.
pub const SYMBOL_COMPONENT: &str = "priceTableEquities";

/// Variables of a subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionVariables {
    /// Symbols restricted to boards.
    Symbols {
        /// Upper-case tickers.
        symbols: Vec<String>,
        /// Board ids.
        #[serde(rename = "boardIds")]
        board_ids: Vec<String>,
    },
    /// Plain symbol list.
    List(Vec<String>),
}

/// A `{"type":"sub", ...}` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Always `sub`.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Topic name.
    pub topic: String,
    /// Topic variables.
    pub variables: SubscriptionVariables,
    /// Optional component tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

impl SubscriptionRequest {
    /// Subscribe to main-board quotes for `symbols` (upper-cased).
    #[must_use]
    pub fn symbols<S: AsRef<str>>(symbols: &[S]) -> Self {
        Self {
            msg_type: "sub".to_string(),
            topic: SYMBOL_TOPIC.to_string(),
            variables: SubscriptionVariables::Symbols {
                symbols: symbols.iter().map(|s| s.as_ref().to_uppercase()).collect(),
                board_ids: vec![MAIN_BOARD_ID.to_string()],
            },
            component: Some(SYMBOL_COMPONENT.to_string()),
        }
    }

    /// Subscribe to the tracked indices.
    #[must_use]
    pub fn indices() -> Self {
        Self {
            msg_type: "sub".to_string(),
            topic: INDEX_TOPIC.to_string(),
            variables: SubscriptionVariables::List(
                TRACKED_INDICES.iter().map(ToString::to_string).collect(),
            ),
            component: None,
        }
    }
}

/// What should be subscribed on the socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    /// Symbols of interest, upper-case.
    pub symbols: Vec<String>,
    /// Whether index quotes are wanted.
    pub include_indices: bool,
}

impl SubscriptionSet {
    /// Requests to send after connecting. Empty symbol lists are skipped.
    #[must_use]
    pub fn requests(&self) -> Vec<SubscriptionRequest> {
        let mut requests = Vec::with_capacity(2);
        if !self.symbols.is_empty() {
            requests.push(SubscriptionRequest::symbols(&self.symbols));
        }
        if self.include_indices {
            requests.push(SubscriptionRequest::indices());
        }
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_request_shape() {
        let json = serde_json::to_value(SubscriptionRequest::symbols(&["mbb", "FPT"])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "sub",
                "topic": "stockRealtimeBySymbolsAndBoards",
                "variables": {"symbols": ["MBB", "FPT"], "boardIds": ["MAIN"]},
                "component": "priceTableEquities"
            })
        );
    }

    #[test]
    fn index_request_shape() {
        let json = serde_json::to_value(SubscriptionRequest::indices()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "sub",
                "topic": "notifyIndexRealtimeByListV2",
                "variables": ["VNINDEX", "VN30"]
            })
        );
    }

    #[test]
    fn request_parses_back_from_wire() {
        let text = r#"{"type":"sub","topic":"notifyIndexRealtimeByListV2","variables":["VNINDEX","VN30"]}"#;
        let parsed: SubscriptionRequest = serde_json::from_str(text).unwrap();
        assert_eq!(parsed, SubscriptionRequest::indices());
    }

    #[test]
    fn subscription_set_skips_empty_symbols() {
        let set = SubscriptionSet {
            symbols: vec![],
            include_indices: true,
        };
        let requests = set.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].topic, INDEX_TOPIC);

        let none = SubscriptionSet::default();
        assert!(none.requests().is_empty());
    }
}
