//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use corral_protocol::{AgentType, Authorization};

use super::serde_utils::timeout_secs;

/// How the client proves its identity after the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CredentialsConfig {
    /// Login and password
    Password { login: String, password: String },
    /// Pre-issued access token
    Token { token: String },
    /// Trust based on the connecting address
    Address,
}

impl CredentialsConfig {
    /// Build the authorization request for the given agent type
    pub fn to_authorization(&self, agent: AgentType) -> Authorization {
        match self {
            CredentialsConfig::Password { login, password } => Authorization::Password {
                login: login.clone(),
                password: password.clone(),
                agent,
            },
            CredentialsConfig::Token { token } => Authorization::Token {
                token: token.clone(),
                agent,
            },
            CredentialsConfig::Address => Authorization::Address { agent },
        }
    }
}

/// Configuration for a management client session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Controller address (host:port)
    pub address: String,

    /// Name announced in the handshake (defaults to the host name)
    pub client_name: String,

    /// Agent type presented during authorization
    pub agent_type: AgentType,

    /// Connection timeout
    #[serde(with = "timeout_secs")]
    pub connect_timeout: Duration,

    /// Per-subscriber buffer of the event bus feed
    pub event_buffer: usize,

    /// Per-subscriber buffer of each console stream feed
    pub stream_buffer: usize,

    /// Credentials used by `authorize_configured`
    pub credentials: Option<CredentialsConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "localhost:7500".to_string(),
            client_name: gethostname::gethostname().to_string_lossy().into_owned(),
            agent_type: AgentType::User,
            connect_timeout: Duration::from_secs(10),
            event_buffer: 256,
            stream_buffer: 1024,
            credentials: None,
        }
    }
}
