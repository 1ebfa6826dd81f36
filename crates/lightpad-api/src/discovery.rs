//! Lightpad heartbeat discovery.
//!
//! Pads periodically broadcast a short ASCII datagram on UDP port
//! [`HEARTBEAT_PORT`]:
//!
//! ```text
//! PLUM 8888 <lightpad-id> <control-port>
//! ```
//!
//! [`HeartbeatListener`] binds that port and turns datagrams into
//! [`LightpadAnnouncement`]s. Anything that does not match the shape is
//! skipped.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use futures_core::Stream;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::DeviceEndpoint;

pub const HEARTBEAT_PORT: u16 = 43770;

const MAGIC: &str = "PLUM";
const PROTOCOL_MARKER: &str = "8888";
const MAX_DATAGRAM: usize = 512;

/// One heartbeat heard on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightpadAnnouncement {
    pub lightpad_id: String,
    pub port: u16,
    pub address: IpAddr,
}

impl LightpadAnnouncement {
    /// Endpoint for the pad that sent this heartbeat, driving `load_id`.
    /// Heartbeats name the pad, not its logical load, so the caller
    /// supplies the load.
    pub fn endpoint(&self, load_id: impl Into<String>) -> DeviceEndpoint {
        DeviceEndpoint::new(load_id, self.address).with_port(self.port)
    }
}

/// Decode one heartbeat datagram received from `from`.
pub fn parse_announcement(datagram: &[u8], from: SocketAddr) -> Option<LightpadAnnouncement> {
    let text = std::str::from_utf8(datagram).ok()?;
    let mut fields = text.split_whitespace();

    if fields.next()? != MAGIC || fields.next()? != PROTOCOL_MARKER {
        return None;
    }
    let lightpad_id = fields.next()?.to_owned();
    let port = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }

    Some(LightpadAnnouncement {
        lightpad_id,
        port,
        address: from.ip(),
    })
}

/// Bound heartbeat socket.
#[derive(Debug)]
pub struct HeartbeatListener {
    socket: UdpSocket,
}

impl HeartbeatListener {
    /// Bind `0.0.0.0:43770`.
    pub async fn bind_default() -> std::io::Result<Self> {
        Self::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), HEARTBEAT_PORT)).await
    }

    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        debug!(addr = %socket.local_addr()?, "listening for lightpad heartbeats");
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Announcements in arrival order until `cancel` fires or the socket
    /// fails.
    pub fn listen(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = LightpadAnnouncement> + Send + 'static {
        let socket = self.socket;
        async_stream::stream! {
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                let received = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    res = socket.recv_from(&mut buf) => res,
                };
                match received {
                    Ok((len, from)) => match parse_announcement(&buf[..len], from) {
                        Some(announcement) => yield announcement,
                        None => debug!(%from, len, "ignoring malformed heartbeat"),
                    },
                    Err(e) => {
                        warn!(error = %e, "heartbeat socket failed");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;

    fn from() -> SocketAddr {
        "192.168.1.40:43770".parse().unwrap()
    }

    #[test]
    fn parses_well_formed_heartbeat() {
        let ann = parse_announcement(b"PLUM 8888 a1b2c3 8443", from()).unwrap();
        assert_eq!(
            ann,
            LightpadAnnouncement {
                lightpad_id: "a1b2c3".into(),
                port: 8443,
                address: "192.168.1.40".parse().unwrap(),
            }
        );
        let ep = ann.endpoint("load-9");
        assert_eq!(ep.id, "load-9");
        assert_eq!(ep.port, 8443);
    }

    #[test]
    fn tolerates_trailing_newline() {
        assert!(parse_announcement(b"PLUM 8888 pad 8443\n", from()).is_some());
    }

    #[test]
    fn rejects_malformed_heartbeats() {
        for raw in [
            &b""[..],
            b"PLUM",
            b"PLUM 8888 pad",
            b"PLUM 9999 pad 8443",
            b"NEST 8888 pad 8443",
            b"PLUM 8888 pad port",
            b"PLUM 8888 pad 70000",
            b"PLUM 8888 pad 8443 extra",
            b"\xff\xfe",
        ] {
            assert!(parse_announcement(raw, from()).is_none(), "{raw:?}");
        }
    }

    #[tokio::test]
    async fn listener_skips_noise_and_stops_on_cancel() {
        let listener = HeartbeatListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let target = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let stream = listener.listen(cancel.clone());
        tokio::pin!(stream);

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"garbage", target).await.unwrap();
        sender.send_to(b"PLUM 8888 pad-1 8443", target).await.unwrap();

        let ann = stream.next().await.unwrap();
        assert_eq!(ann.lightpad_id, "pad-1");
        assert_eq!(ann.address, IpAddr::V4(Ipv4Addr::LOCALHOST));

        cancel.cancel();
        assert!(stream.next().await.is_none());
    }
}
