//! Configuration types for the live session coordinator

use serde::{Deserialize, Serialize};

/// Public STUN servers used when nothing else is configured
pub const DEFAULT_STUN_SERVERS: [&str; 5] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
];

/// Main configuration for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// ICE servers handed to every negotiation handle
    pub ice: IceConfig,

    /// Per-connection outbound signaling queue depth (default: 128)
    pub outbound_buffer: usize,

    /// Per-connection negotiation event queue depth (default: 64)
    pub event_buffer: usize,

    /// RTP packets buffered per relay subscriber before it starts skipping (default: 256)
    pub relay_buffer: usize,
}

/// ICE server list supplied when a negotiation handle is created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceConfig {
    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    #[serde(default)]
    pub turn_servers: Vec<TurnServerConfig>,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            ice: IceConfig::default(),
            outbound_buffer: 128,
            event_buffer: 64,
            relay_buffer: 256,
        }
    }
}

impl IceConfig {
    /// Validate the ICE server list
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        Ok(())
    }
}

impl LiveConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `ice.stun_servers` is empty or holds a non-STUN URL
    /// - a TURN URL does not use the turn:/turns: scheme
    /// - any buffer size is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        self.ice.validate()?;

        for (name, value) in [
            ("outbound_buffer", self.outbound_buffer),
            ("event_buffer", self.event_buffer),
            ("relay_buffer", self.relay_buffer),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LiveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ice.stun_servers.len(), 5);
        assert_eq!(config.ice.stun_servers[0], "stun:stun.l.google.com:19302");
    }

    #[test]
    fn test_empty_stun_servers() {
        let mut config = LiveConfig::default();
        config.ice.stun_servers.clear();
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_bad_stun_scheme() {
        let mut config = LiveConfig::default();
        config.ice.stun_servers = vec!["http://stun.example.com".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_turn_scheme() {
        let mut config = LiveConfig::default();
        config.ice.turn_servers.push(TurnServerConfig {
            url: "stun:turn.example.com:3478".to_string(),
            username: "user".to_string(),
            credential: "pass".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_buffer() {
        let config = LiveConfig {
            relay_buffer: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("relay_buffer"));
    }

    #[test]
    fn test_ice_config_deserialize_without_turn() {
        let ice: IceConfig =
            serde_json::from_str(r#"{"stun_servers": ["stun:stun.example.org:3478"]}"#).unwrap();
        assert!(ice.turn_servers.is_empty());
        assert!(ice.validate().is_ok());
    }
}
