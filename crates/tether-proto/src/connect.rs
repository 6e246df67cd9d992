//! Connect handshake parameters.

use serde::{Deserialize, Serialize};

use crate::{MAX_PROTOCOL, MIN_PROTOCOL};

/// Parameters for the initial `connect` request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectParams {
    /// Oldest protocol version the client accepts.
    #[serde(rename = "minProtocol")]
    pub min_protocol: u32,
    /// Newest protocol version the client accepts.
    #[serde(rename = "maxProtocol")]
    pub max_protocol: u32,
    /// Client identity.
    pub client: ClientInfo,
    /// Requested role (e.g. `operator`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Requested scopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    /// BCP 47 locale tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Free-form user agent string.
    #[serde(rename = "userAgent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Optional authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
}

/// Client identity inside `ConnectParams`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Stable client identifier.
    pub id: String,
    /// Client version string.
    pub version: String,
    /// Platform (e.g. `darwin`, `linux`, `win32`).
    pub platform: String,
    /// Client mode (e.g. `editor`).
    pub mode: String,
}

/// Authentication material in the handshake.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectAuth {
    /// Bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ConnectParams {
    /// Build handshake params for an editor client with the supported
    /// protocol range.
    pub fn editor(client_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            min_protocol: MIN_PROTOCOL,
            max_protocol: MAX_PROTOCOL,
            client: ClientInfo {
                id: client_id.into(),
                version: version.into(),
                platform: std::env::consts::OS.to_owned(),
                mode: "editor".into(),
            },
            role: Some("operator".into()),
            scopes: None,
            locale: None,
            user_agent: None,
            auth: None,
        }
    }

    /// Attach a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(ConnectAuth {
            token: Some(token.into()),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn editor_params_protocol_range() {
        let params = ConnectParams::editor("tether-editor", "0.1.0");
        assert_eq!(params.min_protocol, MIN_PROTOCOL);
        assert_eq!(params.max_protocol, MAX_PROTOCOL);
        assert_eq!(params.client.mode, "editor");
    }

    #[test]
    fn wire_names_are_camel_case() {
        let params = ConnectParams::editor("c", "1.0").with_token("tok");
        let json = serde_json::to_string(&params).unwrap();
        let v: Value = serde_json::from_str(&json).unwrap();
        assert!(v.get("minProtocol").is_some());
        assert!(v.get("maxProtocol").is_some());
        assert_eq!(v["auth"]["token"], "tok");
    }

    #[test]
    fn optional_fields_omitted() {
        let params = ConnectParams::editor("c", "1.0");
        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("auth"));
        assert!(!json.contains("locale"));
        assert!(!json.contains("userAgent"));
    }

    #[test]
    fn roundtrip() {
        let params = ConnectParams::editor("c", "1.0").with_token("t");
        let json = serde_json::to_string(&params).unwrap();
        let back: ConnectParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back.client.id, "c");
        assert_eq!(back.auth.unwrap().token.as_deref(), Some("t"));
    }
}
