// ── Connection session ──
//
// Two-state machine over one converter link. The protocol client is
// built on the first successful dial and rebound with `reset` on every
// later one. Callers that see a failed device request must call
// `mark_failed` (or `fail`) before propagating, so the next `acquire`
// dials again.

use pulsar_api::{DeviceClient, Dialer, Transport};
use tracing::{debug, warn};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    /// Value reported in the `net_status` field.
    pub fn net_status(self) -> &'static str {
        match self {
            Self::Connected => "online",
            Self::Disconnected => "offline",
        }
    }
}

pub struct Session<D: Dialer, C> {
    dialer: D,
    socket: String,
    address: String,
    transport: Option<D::Transport>,
    client: Option<C>,
    state: ConnectionState,
}

impl<D, C> Session<D, C>
where
    D: Dialer,
    C: DeviceClient<Transport = D::Transport>,
{
    pub fn new(dialer: D, socket: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            dialer,
            socket: socket.into(),
            address: address.into(),
            transport: None,
            client: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn socket(&self) -> &str {
        &self.socket
    }

    /// Return a usable client, dialing first if disconnected.
    pub async fn acquire(&mut self) -> Result<&mut C, CoreError> {
        if self.state != ConnectionState::Connected || self.client.is_none() {
            self.connect().await?;
        }
        self.client.as_mut().ok_or_else(|| CoreError::Connection {
            socket: self.socket.clone(),
            source: pulsar_api::Error::Closed,
        })
    }

    /// Drop to `Disconnected`. The stale transport is closed on the next
    /// `acquire`.
    pub fn mark_failed(&mut self) {
        if self.state == ConnectionState::Connected {
            debug!(socket = %self.socket, "connection marked failed");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Mark the session failed and wrap a device error.
    pub fn fail(&mut self, operation: &'static str, source: pulsar_api::Error) -> CoreError {
        warn!(operation, error = %source, "device request failed");
        self.mark_failed();
        CoreError::Protocol { operation, source }
    }

    /// Close the current transport, if any.
    pub async fn close(&mut self) {
        self.state = ConnectionState::Disconnected;
        if let Some(transport) = self.transport.take() {
            if let Err(err) = transport.close().await {
                debug!(error = %err, "closing transport failed");
            }
        }
    }

    async fn connect(&mut self) -> Result<(), CoreError> {
        self.close().await;

        debug!(socket = %self.socket, "connecting to converter");
        let transport = match self.dialer.dial(&self.socket).await {
            Ok(transport) => transport,
            Err(source) => {
                warn!(socket = %self.socket, error = %source, "connection failed");
                return Err(CoreError::Connection {
                    socket: self.socket.clone(),
                    source,
                });
            }
        };

        if let Some(client) = self.client.as_mut() {
            client.reset(transport.clone());
        } else {
            debug!(address = %self.address, "building device client");
            match C::new(&self.address, transport.clone()) {
                Ok(client) => self.client = Some(client),
                Err(source) => {
                    warn!(address = %self.address, error = %source, "device client setup failed");
                    if let Err(err) = transport.close().await {
                        debug!(error = %err, "closing transport failed");
                    }
                    return Err(CoreError::Connection {
                        socket: self.socket.clone(),
                        source,
                    });
                }
            }
        }

        self.transport = Some(transport);
        self.state = ConnectionState::Connected;
        debug!(socket = %self.socket, "connected");
        Ok(())
    }
}
