// ── Core error types ──
//
// Initialization errors (`Config`, `MalformedDuration`) are fatal: a
// poller must not be built from them. Everything else is per-cycle and
// recoverable; the next cycle reconnects and tries again.

use thiserror::Error;

use crate::poller::Phase;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Initialization errors ────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Malformed duration: {input:?}")]
    MalformedDuration { input: String },

    // ── Session errors ───────────────────────────────────────────────
    #[error("Cannot connect to converter at {socket}: {source}")]
    Connection {
        socket: String,
        #[source]
        source: pulsar_api::Error,
    },

    #[error("{operation} request failed: {source}")]
    Protocol {
        operation: &'static str,
        #[source]
        source: pulsar_api::Error,
    },

    // ── Cycle errors ─────────────────────────────────────────────────
    #[error("{phase} phase aborted after {attempts} attempts: {source}")]
    CycleAborted {
        phase: Phase,
        attempts: u32,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns `true` for errors that must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::MalformedDuration { .. })
    }

    /// The phase that aborted the cycle, if this is a cycle failure.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::CycleAborted { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}
