// SPDX-License-Identifier: Apache-2.0

//! The external-data provider HTTP wire format (§4.7).

use serde::{Deserialize, Serialize};
use serde_json::Value;

const API_VERSION: &str = "externaldata.gatekeeper.sh/v1beta1";

/// The request envelope POSTed to a provider endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    request: ProviderRequestBody,
}

#[derive(Debug, Clone, Serialize)]
struct ProviderRequestBody {
    keys: Vec<Value>,
}

impl ProviderRequest {
    /// Builds the wire request for `keys`.
    #[must_use]
    pub fn new(keys: Vec<Value>) -> Self {
        Self { api_version: API_VERSION, kind: "ProviderRequest", request: ProviderRequestBody { keys } }
    }
}

/// The response envelope a provider endpoint returns.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponse {
    /// Always `externaldata.gatekeeper.sh/v1beta1`, tolerated but not
    /// enforced on read.
    #[serde(rename = "apiVersion", default)]
    #[allow(dead_code)]
    pub api_version: Option<String>,
    /// Always `ProviderResponse`, tolerated but not enforced on read.
    #[serde(default)]
    #[allow(dead_code)]
    pub kind: Option<String>,
    /// The response body.
    pub response: ProviderResponseBody,
}

/// One key's resolved value or per-key error.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponseItem {
    /// The key this item answers.
    pub key: Value,
    /// The resolved value, if the lookup for this key succeeded.
    #[serde(default)]
    pub value: Option<Value>,
    /// The per-key error, if the lookup for this key failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// The body of a [`ProviderResponse`].
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponseBody {
    /// Whether repeating the request returns the same answer; informational
    /// only, not currently consulted by the driver.
    #[serde(default)]
    #[allow(dead_code)]
    pub idempotent: bool,
    /// Per-key results, in the same order as the request's keys.
    #[serde(default)]
    pub items: Vec<ProviderResponseItem>,
    /// A whole-request failure distinct from a per-key `error`.
    #[serde(default)]
    #[serde(rename = "systemError")]
    pub system_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_the_wire_shape() {
        let req = ProviderRequest::new(vec![Value::String("a".to_owned())]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["apiVersion"], "externaldata.gatekeeper.sh/v1beta1");
        assert_eq!(json["kind"], "ProviderRequest");
        assert_eq!(json["request"]["keys"][0], "a");
    }

    #[test]
    fn response_deserializes_mixed_items() {
        let raw = serde_json::json!({
            "apiVersion": "externaldata.gatekeeper.sh/v1beta1",
            "kind": "ProviderResponse",
            "response": {
                "idempotent": true,
                "items": [
                    {"key": "a", "value": 1},
                    {"key": "b", "error": "not found"},
                ],
            },
        });
        let parsed: ProviderResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.response.items.len(), 2);
        assert_eq!(parsed.response.items[0].value, Some(Value::from(1)));
        assert_eq!(parsed.response.items[1].error.as_deref(), Some("not found"));
    }
}
