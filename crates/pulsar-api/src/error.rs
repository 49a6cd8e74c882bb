use thiserror::Error;

/// Top-level error type for the `pulsar-api` crate.
///
/// Covers every failure mode of the device capability: dialing the
/// RS-485 converter, moving bytes over the socket, and the protocol
/// client's own request/response handling. `pulsar-core` maps these
/// into connection vs. protocol failures.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// TCP connect failed (refused, unreachable, DNS failure, etc.)
    #[error("Cannot connect to {socket}: {source}")]
    Connect {
        socket: String,
        #[source]
        source: std::io::Error,
    },

    /// TCP connect did not complete within the configured timeout.
    #[error("Connection to {socket} timed out after {timeout_ms}ms")]
    ConnectTimeout { socket: String, timeout_ms: u64 },

    /// A read or write did not complete within the configured timeout.
    #[error("Transport I/O timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Socket-level I/O error on an established connection.
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport was closed locally or by the peer.
    #[error("Transport closed")]
    Closed,

    // ── Protocol ────────────────────────────────────────────────────
    /// The device address could not be used to build a client.
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    /// The device answered with an error frame.
    #[error("Device rejected request: {message}")]
    Rejected { message: String },

    /// The response frame failed checksum or field decoding.
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },
}

impl Error {
    /// Returns `true` if the failure happened below the protocol layer,
    /// i.e. the socket itself is suspect.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::ConnectTimeout { .. }
                | Self::Timeout { .. }
                | Self::Io(_)
                | Self::Closed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        assert!(Error::Closed.is_transport());
        assert!(Error::Timeout { timeout_ms: 10 }.is_transport());
        assert!(
            Error::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).is_transport()
        );
    }

    #[test]
    fn protocol_errors_are_not_transport() {
        assert!(!Error::InvalidAddress("xyz".into()).is_transport());
        assert!(
            !Error::MalformedResponse {
                message: "bad crc".into()
            }
            .is_transport()
        );
    }
}
