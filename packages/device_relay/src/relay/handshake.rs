//! Handshake Authenticator
//!
//! Resolves the claimed role and token of an upgrade request and checks them
//! against the configured policy before any relay state exists.
//!
//! Credentials are looked up in a fixed order:
//! 1. query parameters `role` and `token`
//! 2. one subprotocol of the form `role:token`
//! 3. two or more subprotocols, read as `[role, token, ..]`
//! 4. one subprotocol without `:`, read as the role alone
//!
//! Later sources only fill what earlier ones left empty, and steps 2 and 3
//! only apply while no token has been found. A token without a role admits
//! an observer.

use axum::http::{HeaderMap, header};
use serde::Deserialize;

use super::peer::Role;
use crate::config::{AllowedOrigin, RelayConfig};
use crate::error::HandshakeError;

/// Query parameters accepted on the relay path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialParams {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// The parts of an upgrade request the authenticator looks at.
#[derive(Debug, Clone, Default)]
pub struct HandshakeRequest {
    pub path: String,
    pub origin: Option<String>,
    pub params: CredentialParams,
    /// Offered subprotocols, in client order
    pub protocols: Vec<String>,
}

impl HandshakeRequest {
    pub fn new(path: &str, headers: &HeaderMap, params: CredentialParams) -> Self {
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Self {
            path: path.to_string(),
            origin,
            params,
            protocols: offered_protocols(headers),
        }
    }
}

/// Split every `Sec-WebSocket-Protocol` header into trimmed, non-empty entries.
pub fn offered_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// A connection that may join the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub role: Role,
    /// Subprotocol to echo back; browsers abort the handshake without one
    pub subprotocol: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HandshakePolicy {
    path: String,
    token: String,
    allowed_origin: AllowedOrigin,
}

impl HandshakePolicy {
    pub fn new(path: impl Into<String>, token: impl Into<String>, allowed_origin: AllowedOrigin) -> Self {
        Self {
            path: path.into(),
            token: token.into(),
            allowed_origin,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.path.clone(),
            config.token.clone(),
            config.allowed_origin.clone(),
        )
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn authenticate(&self, request: &HandshakeRequest) -> Result<Accepted, HandshakeError> {
        if request.path != self.path {
            return Err(HandshakeError::WrongPath(request.path.clone()));
        }

        if let Some(origin) = request.origin.as_deref().filter(|o| !o.is_empty()) {
            if !self.allowed_origin.allows(origin) {
                return Err(HandshakeError::OriginNotAllowed(origin.to_string()));
            }
        }

        let (role, token) = resolve_credentials(&request.params, &request.protocols);
        if token.is_empty() {
            return Err(HandshakeError::MissingToken);
        }
        if token != self.token {
            return Err(HandshakeError::TokenMismatch);
        }

        Ok(Accepted {
            role: Role::parse(&role),
            subprotocol: request.protocols.first().cloned(),
        })
    }
}

/// Apply the lookup order to produce `(role, token)`; either may be empty.
fn resolve_credentials(params: &CredentialParams, protocols: &[String]) -> (String, String) {
    let mut role = params.role.clone().unwrap_or_default().to_lowercase();
    let mut token = params.token.clone().unwrap_or_default();

    match protocols {
        [combined] if token.is_empty() && combined.contains(':') => {
            if let Some((p_role, p_token)) = combined.split_once(':') {
                if role.is_empty() {
                    role = p_role.to_lowercase();
                }
                token = p_token.to_string();
            }
        }
        [p_role, p_token, ..] if token.is_empty() => {
            if role.is_empty() {
                role = p_role.to_lowercase();
            }
            token = p_token.clone();
        }
        [p_role] if role.is_empty() => {
            role = p_role.to_lowercase();
        }
        _ => {}
    }

    (role, token)
}
