//! Multiplexer configuration
//!
//! Loaded from JSON; every field has a default, so a file only needs to list
//! the endpoints:
//!
//! ```json
//! {
//!   "endpoints": [
//!     { "address": "10.0.1.6", "io_group": 1 },
//!     { "address": "10.0.1.7", "io_group": 2 }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use pix_packet::Generation;
use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};

/// Default port of the board request/reply socket
pub const DEFAULT_COMMAND_PORT: u16 = 5555;
/// Default port of the board stream socket
pub const DEFAULT_STREAM_PORT: u16 = 5556;
/// Default per-channel message bound, also the per-drain message cap
pub const DEFAULT_HIGH_WATER_MARK: usize = 20_000;

/// One board endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Host name or IP address of the board
    pub address: String,
    /// io-group served by the board
    pub io_group: u8,
}

impl EndpointConfig {
    pub fn new(address: impl Into<String>, io_group: u8) -> Self {
        Self {
            address: address.into(),
            io_group,
        }
    }
}

/// Multiplexer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// Boards in polling order
    pub endpoints: Vec<EndpointConfig>,
    /// Port of each board's request/reply socket
    pub command_port: u16,
    /// Port of each board's stream socket
    pub stream_port: u16,
    /// Messages queued per stream channel and received per drain
    pub high_water_mark: usize,
    /// ASIC generation behind the boards
    pub generation: Generation,
    /// Whether generation-2 chips run with FIFO diagnostics
    pub fifo_diagnostics: bool,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            command_port: DEFAULT_COMMAND_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            generation: Generation::default(),
            fifo_diagnostics: false,
        }
    }
}

impl MultiplexerConfig {
    /// Configuration with default ports for the given endpoints
    pub fn with_endpoints(endpoints: Vec<EndpointConfig>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MuxError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| MuxError::Config(e.to_string()))
    }

    /// Check that addresses and io-groups are unique and the bound is usable
    pub fn validate(&self) -> Result<()> {
        if self.high_water_mark == 0 {
            return Err(MuxError::Config("high_water_mark must be positive".into()));
        }
        let mut addresses = HashSet::new();
        let mut io_groups = HashSet::new();
        for endpoint in &self.endpoints {
            if !addresses.insert(endpoint.address.as_str()) {
                return Err(MuxError::Config(format!(
                    "duplicate endpoint address {}",
                    endpoint.address
                )));
            }
            if !io_groups.insert(endpoint.io_group) {
                return Err(MuxError::Config(format!(
                    "io-group {} served by more than one endpoint",
                    endpoint.io_group
                )));
            }
        }
        Ok(())
    }

    /// `host:port` of an endpoint's command socket
    pub fn command_address(&self, endpoint: &EndpointConfig) -> String {
        format!("{}:{}", endpoint.address, self.command_port)
    }

    /// `host:port` of an endpoint's stream socket
    pub fn stream_address(&self, endpoint: &EndpointConfig) -> String {
        format!("{}:{}", endpoint.address, self.stream_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MultiplexerConfig::default();
        assert_eq!(config.command_port, 5555);
        assert_eq!(config.stream_port, 5556);
        assert_eq!(config.high_water_mark, 20_000);
        assert_eq!(config.generation, Generation::V2);
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MultiplexerConfig::from_json_str(
            r#"{"endpoints": [{"address": "10.0.1.6", "io_group": 1}], "generation": "v1"}"#,
        )
        .unwrap();
        assert_eq!(config.endpoints, vec![EndpointConfig::new("10.0.1.6", 1)]);
        assert_eq!(config.generation, Generation::V1);
        assert_eq!(config.high_water_mark, DEFAULT_HIGH_WATER_MARK);
        assert_eq!(config.command_address(&config.endpoints[0]), "10.0.1.6:5555");
        assert_eq!(config.stream_address(&config.endpoints[0]), "10.0.1.6:5556");
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = MultiplexerConfig::with_endpoints(vec![
            EndpointConfig::new("a", 1),
            EndpointConfig::new("b", 2),
        ]);
        config.fifo_diagnostics = true;
        let json = config.to_json_string().unwrap();
        assert_eq!(MultiplexerConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_duplicates() {
        let config = MultiplexerConfig::with_endpoints(vec![
            EndpointConfig::new("a", 1),
            EndpointConfig::new("b", 1),
        ]);
        assert!(matches!(config.validate(), Err(MuxError::Config(_))));

        let config = MultiplexerConfig::with_endpoints(vec![
            EndpointConfig::new("a", 1),
            EndpointConfig::new("a", 2),
        ]);
        assert!(matches!(config.validate(), Err(MuxError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_high_water_mark() {
        assert!(matches!(
            MultiplexerConfig::from_json_str(r#"{"high_water_mark": 0}"#),
            Err(MuxError::Config(_))
        ));
        assert!(matches!(
            MultiplexerConfig::from_json_str("not json"),
            Err(MuxError::Config(_))
        ));
    }
}
