// ── Runtime device configuration ──
//
// The validated, strongly typed form the poller runs on. File loading and
// env overlays live in pulsar-config and convert into this.

use chrono_tz::Tz;
use pulsar_api::{TcpDialer, TransportConfig};

use crate::channels::ChannelSet;
use crate::duration::CalendarDuration;
use crate::error::CoreError;

/// Everything needed to poll one registrator.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// `host:port` of the TCP/serial converter.
    pub socket: String,
    /// Device address on the bus, used verbatim as the `id` tag.
    pub address: String,
    /// Cadence of the diagnostics check. Zero disables it.
    pub status_interval: CalendarDuration,
    /// Zone the device clock reports local time in.
    pub timezone: Tz,
    pub channels: ChannelSet,
    pub channel_prefix: String,
    pub transport: TransportConfig,
}

impl DeviceConfig {
    pub fn new(socket: impl Into<String>, address: impl Into<String>, channels: ChannelSet) -> Self {
        Self {
            socket: socket.into(),
            address: address.into(),
            status_interval: CalendarDuration::ZERO,
            timezone: Tz::UTC,
            channels,
            channel_prefix: String::new(),
            transport: TransportConfig::default(),
        }
    }

    #[must_use]
    pub fn with_status_interval(mut self, interval: CalendarDuration) -> Self {
        self.status_interval = interval;
        self
    }

    #[must_use]
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    #[must_use]
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// TCP dialer carrying this device's timeouts and frame logging.
    pub fn dialer(&self) -> TcpDialer {
        TcpDialer::new(self.transport.clone())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.socket.trim().is_empty() {
            return Err(CoreError::config("socket is required"));
        }
        if self.address.trim().is_empty() {
            return Err(CoreError::config("address is required"));
        }
        Ok(())
    }
}

/// Resolve an IANA zone name. Empty means UTC.
pub fn parse_timezone(name: &str) -> Result<Tz, CoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>()
        .map_err(|_| CoreError::config(format!("invalid timezone {name:?}")))
}
