//! Status reporting to the remote collector

pub mod channel;
pub mod transport;

pub use channel::{ChannelConfig, ChannelState, DEFAULT_LINGER, DrainOutcome, ReportChannel};
pub use transport::{ConnectFuture, Connector, Endpoint, ReportStream, TcpConnector};
