//! Connection state exposed to the UI.

use serde::{Deserialize, Serialize};

/// Lifecycle of the live stream.
///
/// `Disconnected → Connecting → Connected → (Error | Disconnected)`;
/// `disconnect()` returns to `Disconnected` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Error => "Error",
        }
    }

    /// `connect()` is a no-op in these states.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// State plus the message a UI shows in its error banner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_lowercase_for_the_ui() {
        let status = ConnectionStatus {
            state: ConnectionState::Error,
            last_error: Some("event stream closed by server".to_string()),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "error");
        assert_eq!(json["last_error"], "event stream closed by server");
    }

    #[test]
    fn live_states() {
        assert!(ConnectionState::Connecting.is_live());
        assert!(ConnectionState::Connected.is_live());
        assert!(!ConnectionState::Error.is_live());
        assert!(!ConnectionState::default().is_live());
        assert_eq!(ConnectionState::Connected.as_str(), "Connected");
    }
}
