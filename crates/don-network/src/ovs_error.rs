//! OVS-specific error types for better error handling and debugging
//!
//! Every failure of the OVSDB JSON-RPC client is reported through [`OvsError`],
//! so callers can tell a missing row apart from a dead socket.

use thiserror::Error;

/// OVS-specific errors
#[derive(Error, Debug)]
pub enum OvsError {
    // ========================================================================
    // Socket/Connection Errors
    // ========================================================================
    #[error("Invalid OVSDB endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("OVSDB socket not found at {0}")]
    OvsdbSocketNotFound(String),

    #[error("Failed to connect to OVSDB at {endpoint}: {source}")]
    OvsdbConnection {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OVSDB I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OVSDB connection closed by server")]
    ConnectionClosed,

    #[error("Timeout waiting for OVSDB response to '{0}'")]
    Timeout(String),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    #[error("Malformed OVSDB message: {0}")]
    Protocol(String),

    #[error("Failed to encode OVSDB request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("OVSDB error: {0}")]
    Rpc(String),

    #[error("OVSDB transaction failed: {0}")]
    Transaction(String),

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    #[error("Bridge '{0}' not found")]
    BridgeNotFound(String),

    #[error("Port '{0}' not found")]
    PortNotFound(String),
}

impl OvsError {
    /// Get a helpful suggestion for resolving this error
    pub fn suggestion(&self) -> &'static str {
        match self {
            OvsError::InvalidEndpoint(_) => {
                "Use unix:/path/to/db.sock or tcp:host:port for the OVSDB endpoint"
            }
            OvsError::OvsdbSocketNotFound(_) => {
                "Check if OVS is installed: apt install openvswitch-switch"
            }
            OvsError::OvsdbConnection { .. } | OvsError::ConnectionClosed => {
                "Start OVS: sudo systemctl start openvswitch-switch"
            }
            OvsError::Timeout(_) => "Increase the OVSDB timeout or check system load",
            OvsError::BridgeNotFound(_) => "List bridges with: ovs-vsctl list-br",
            OvsError::PortNotFound(_) => "List ports with: ovs-vsctl list-ports <bridge>",
            _ => "Check ovsdb-server logs for more details",
        }
    }

    /// Returns true if the referenced row does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, OvsError::BridgeNotFound(_) | OvsError::PortNotFound(_))
    }
}
