// lightpad-api: Async Rust client for Plum Lightpad dimmers (cloud auth + local control)

pub mod auth;
pub mod cloud;
pub mod codec;
pub mod connection;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod transport;

pub use auth::{Credentials, Session};
pub use cloud::{DEFAULT_CLOUD_URL, HouseClient};
pub use codec::{Frame, FrameCodec, FrameKind};
pub use connection::{Connection, EventLane};
pub use discovery::{HEARTBEAT_PORT, HeartbeatListener, LightpadAnnouncement, parse_announcement};
pub use dispatch::{
    Command, CommandChannel, CommandReply, ForceGlow, LoadMetrics, PadMetrics, load_metrics, send,
};
pub use error::{AuthError, CommandError, ConnectError, ConnectionLost, DecodeError};
pub use event::{LightpadEvent, classify};
pub use transport::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_DEVICE_PORT, DeviceConnector, DeviceEndpoint, DeviceTransport,
    TlsMode, TransportConfig,
};
