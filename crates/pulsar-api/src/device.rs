// ── Device capability ──
//
// The seam between the poll engine and a concrete Pulsar-M protocol
// implementation. The engine only ever sees these traits; framing,
// checksums and field decoding live behind `DeviceClient`.

use std::future::Future;

use chrono::NaiveDateTime;

use crate::error::Error;

/// A live byte pipe to the RS-485 converter.
///
/// Cloneable so the session can keep a handle for `close()` while the
/// protocol client holds another for I/O.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Shut the connection down. Further I/O fails with [`Error::Closed`].
    fn close(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Opens transports to a socket address (`host:port`).
pub trait Dialer: Send + Sync {
    type Transport: Transport;

    fn dial(&self, socket: &str) -> impl Future<Output = Result<Self::Transport, Error>> + Send;
}

/// A single current reading returned by [`DeviceClient::cur_values`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelValue {
    /// Channel id (1-based).
    pub channel: u8,
    pub value: f64,
}

/// Protocol client bound to one device address.
///
/// Construction may be expensive (address encoding, request templates),
/// so the session builds it once and rebinds it with
/// [`reset`](Self::reset) after every reconnect.
pub trait DeviceClient: Sized + Send {
    type Transport: Transport;

    fn new(address: &str, transport: Self::Transport) -> Result<Self, Error>;

    /// Rebind the client to a freshly dialed transport.
    fn reset(&mut self, transport: Self::Transport);

    /// Device wall clock, in the device's own (unspecified) timezone.
    fn sys_time(&mut self) -> impl Future<Output = Result<NaiveDateTime, Error>> + Send;

    /// Raw diagnostics bitmask.
    fn diagnostics_flags(&mut self) -> impl Future<Output = Result<u32, Error>> + Send;

    /// Current readings for `channels`, returned in the same order.
    fn cur_values(
        &mut self,
        channels: &[u8],
    ) -> impl Future<Output = Result<Vec<ChannelValue>, Error>> + Send;
}
