// pulsar-api: device capability seam and TCP transport for Pulsar-M registrators

pub mod device;
pub mod error;
pub mod transport;

pub use device::{ChannelValue, DeviceClient, Dialer, Transport};
pub use error::Error;
pub use transport::{TcpDialer, TcpTransport, TransportConfig};
