// # Netlink Route Controller
//
// Installs and removes blackhole routes in the kernel's main routing table
// over an rtnetlink socket.
//
// ## Messages
//
// - add:    RTM_NEWROUTE, NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL
// - remove: RTM_DELROUTE, NLM_F_REQUEST | NLM_F_ACK
//
// Both carry `rtm_type = RTN_BLACKHOLE`, the main table, static protocol,
// universe scope, and `RTA_DST` set to the banned network. Every request
// waits for the kernel's ACK before returning.
//
// ## Errors
//
// - EEXIST          -> Error::RouteExists
// - ESRCH / ENOENT  -> Error::RouteMissing
// - anything else   -> Error::Route (EPERM without CAP_NET_ADMIN, ...)
//
// ## Platform Support
//
// Netlink is Linux-only. On other targets construction fails with a
// configuration error.

use blackhole_core::config::Prefixes;
use blackhole_core::{Error, Result};

#[cfg(target_os = "linux")]
pub use linux::NetlinkRouteController;

#[cfg(not(target_os = "linux"))]
pub use unsupported::NetlinkRouteController;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use async_trait::async_trait;
    use blackhole_core::traits::RouteController;
    use ipnet::IpNet;
    use netlink_packet_core::{
        NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage,
        NetlinkPayload,
    };
    use netlink_packet_route::route::Nla;
    use netlink_packet_route::{
        RT_SCOPE_UNIVERSE, RT_TABLE_MAIN, RTN_BLACKHOLE, RTPROT_STATIC, RouteMessage, RtnlMessage,
    };
    use netlink_sys::protocols::NETLINK_ROUTE;
    use netlink_sys::{AsyncSocket, AsyncSocketExt, SocketAddr, TokioSocket};
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;
    use tracing::{debug, info};

    /// Blackhole route controller backed by rtnetlink
    pub struct NetlinkRouteController {
        prefixes: Prefixes,
        socket: Mutex<TokioSocket>,
        sequence: AtomicU32,
    }

    impl NetlinkRouteController {
        /// Open an rtnetlink socket
        ///
        /// Must be called from within a tokio runtime. Opening the socket
        /// needs no privileges; changing routes needs CAP_NET_ADMIN and
        /// fails per request otherwise.
        pub fn new(prefixes: Prefixes) -> Result<Self> {
            prefixes.validate()?;

            let mut socket = TokioSocket::new(NETLINK_ROUTE)
                .map_err(|e| Error::route(format!("failed to open netlink socket: {}", e)))?;
            socket
                .socket_mut()
                .bind_auto()
                .map_err(|e| Error::route(format!("failed to bind netlink socket: {}", e)))?;
            socket
                .socket_mut()
                .connect(&SocketAddr::new(0, 0))
                .map_err(|e| Error::route(format!("failed to connect netlink socket: {}", e)))?;

            Ok(Self {
                prefixes,
                socket: Mutex::new(socket),
                sequence: AtomicU32::new(1),
            })
        }

        /// Send one route request and wait for its ACK
        async fn request(&self, message: RtnlMessage, flags: u16, network: IpNet) -> Result<()> {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

            let mut header = NetlinkHeader::default();
            header.flags = flags;
            header.sequence_number = sequence;

            let mut packet = NetlinkMessage::new(header, NetlinkPayload::from(message));
            packet.finalize();

            let mut buf = vec![0u8; packet.header.length as usize];
            packet.serialize(&mut buf[..]);

            let mut socket = self.socket.lock().await;
            socket
                .send(&buf)
                .await
                .map_err(|e| Error::route(format!("netlink send failed: {}", e)))?;

            loop {
                let (reply, _) = socket
                    .recv_from_full()
                    .await
                    .map_err(|e| Error::route(format!("netlink recv failed: {}", e)))?;

                if let Some(outcome) = ack_outcome(&reply, sequence, network)? {
                    return outcome;
                }
            }
        }
    }

    #[async_trait]
    impl RouteController for NetlinkRouteController {
        async fn add_blackhole(&self, address: IpAddr) -> Result<()> {
            let network = self.prefixes.network(address)?;
            debug!(%address, %network, "Adding blackhole route");

            self.request(
                RtnlMessage::NewRoute(blackhole_route(network)),
                NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
                network,
            )
            .await?;

            info!(%address, %network, "Blackhole route added");
            Ok(())
        }

        async fn remove_blackhole(&self, address: IpAddr) -> Result<()> {
            let network = self.prefixes.network(address)?;
            debug!(%address, %network, "Removing blackhole route");

            self.request(
                RtnlMessage::DelRoute(blackhole_route(network)),
                NLM_F_REQUEST | NLM_F_ACK,
                network,
            )
            .await?;

            info!(%address, %network, "Blackhole route removed");
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "netlink"
        }
    }

    /// Route message describing a blackhole for `network` in the main table
    pub(crate) fn blackhole_route(network: IpNet) -> RouteMessage {
        let mut message = RouteMessage::default();

        let (family, destination) = match network {
            IpNet::V4(net) => (libc::AF_INET as u8, net.network().octets().to_vec()),
            IpNet::V6(net) => (libc::AF_INET6 as u8, net.network().octets().to_vec()),
        };

        message.header.address_family = family;
        message.header.destination_prefix_length = network.prefix_len();
        message.header.table = RT_TABLE_MAIN;
        message.header.protocol = RTPROT_STATIC;
        message.header.scope = RT_SCOPE_UNIVERSE;
        message.header.kind = RTN_BLACKHOLE;
        message.nlas.push(Nla::Destination(destination));

        message
    }

    /// Find the ACK for `sequence` in a datagram
    ///
    /// Returns `Ok(None)` when the datagram holds no reply to this request.
    pub(crate) fn ack_outcome(
        datagram: &[u8],
        sequence: u32,
        network: IpNet,
    ) -> Result<Option<Result<()>>> {
        let mut offset = 0;

        while offset < datagram.len() {
            let message = NetlinkMessage::<RtnlMessage>::deserialize(&datagram[offset..])
                .map_err(|e| Error::route(format!("malformed netlink reply: {}", e)))?;

            let length = message.header.length as usize;
            if length == 0 {
                break;
            }
            offset += length;

            if message.header.sequence_number != sequence {
                continue;
            }

            if let NetlinkPayload::Error(err) = message.payload {
                return Ok(Some(match err.code {
                    None => Ok(()),
                    Some(code) => Err(errno_error(-code.get(), network)),
                }));
            }
        }

        Ok(None)
    }

    /// Map a kernel errno to the engine's error classes
    pub(crate) fn errno_error(errno: i32, network: IpNet) -> Error {
        match errno {
            libc::EEXIST => Error::route_exists(network.to_string()),
            libc::ESRCH | libc::ENOENT => Error::route_missing(network.to_string()),
            _ => Error::route(format!(
                "{}: {}",
                network,
                std::io::Error::from_raw_os_error(errno)
            )),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use netlink_packet_core::ErrorMessage;
        use std::num::NonZeroI32;

        fn net(s: &str) -> IpNet {
            s.parse().unwrap()
        }

        fn reply(sequence: u32, code: Option<i32>) -> Vec<u8> {
            let mut header = NetlinkHeader::default();
            header.sequence_number = sequence;

            let mut error = ErrorMessage::default();
            error.code = code.and_then(NonZeroI32::new);

            let mut packet =
                NetlinkMessage::<RtnlMessage>::new(header, NetlinkPayload::Error(error));
            packet.finalize();

            let mut buf = vec![0u8; packet.header.length as usize];
            packet.serialize(&mut buf[..]);
            buf
        }

        #[test]
        fn test_errno_mapping() {
            let network = net("192.0.2.1/32");
            assert!(matches!(errno_error(libc::EEXIST, network), Error::RouteExists(_)));
            assert!(matches!(errno_error(libc::ESRCH, network), Error::RouteMissing(_)));
            assert!(matches!(errno_error(libc::ENOENT, network), Error::RouteMissing(_)));

            let err = errno_error(libc::EPERM, network);
            assert!(matches!(err, Error::Route(_)));
            assert!(err.to_string().contains("192.0.2.1/32"));
        }

        #[test]
        fn test_blackhole_route_v4() {
            let message = blackhole_route(net("198.51.100.0/24"));

            assert_eq!(message.header.address_family, libc::AF_INET as u8);
            assert_eq!(message.header.destination_prefix_length, 24);
            assert_eq!(message.header.kind, RTN_BLACKHOLE);
            assert_eq!(message.header.table, RT_TABLE_MAIN);
            assert_eq!(message.nlas, vec![Nla::Destination(vec![198, 51, 100, 0])]);
        }

        #[test]
        fn test_blackhole_route_v6() {
            let message = blackhole_route(net("2001:db8::/64"));

            assert_eq!(message.header.address_family, libc::AF_INET6 as u8);
            assert_eq!(message.header.destination_prefix_length, 64);

            let mut expected = vec![0u8; 16];
            expected[..4].copy_from_slice(&[0x20, 0x01, 0x0d, 0xb8]);
            assert_eq!(message.nlas, vec![Nla::Destination(expected)]);
        }

        #[test]
        fn test_ack_is_success() {
            let outcome = ack_outcome(&reply(7, None), 7, net("203.0.113.7/32")).unwrap();
            assert!(matches!(outcome, Some(Ok(()))));
        }

        #[test]
        fn test_kernel_errors_are_classified() {
            let network = net("203.0.113.7/32");

            let outcome = ack_outcome(&reply(7, Some(-libc::EEXIST)), 7, network).unwrap();
            assert!(matches!(outcome, Some(Err(Error::RouteExists(_)))));

            let outcome = ack_outcome(&reply(7, Some(-libc::ESRCH)), 7, network).unwrap();
            assert!(matches!(outcome, Some(Err(Error::RouteMissing(_)))));

            let outcome = ack_outcome(&reply(7, Some(-libc::EPERM)), 7, network).unwrap();
            assert!(matches!(outcome, Some(Err(Error::Route(_)))));
        }

        #[test]
        fn test_replies_to_other_requests_are_skipped() {
            let outcome = ack_outcome(&reply(3, Some(-libc::EEXIST)), 7, net("203.0.113.7/32")).unwrap();
            assert!(outcome.is_none());

            let mut datagram = reply(3, Some(-libc::EEXIST));
            datagram.extend(reply(7, None));
            let outcome = ack_outcome(&datagram, 7, net("203.0.113.7/32")).unwrap();
            assert!(matches!(outcome, Some(Ok(()))));
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::*;
    use async_trait::async_trait;
    use blackhole_core::traits::RouteController;
    use std::net::IpAddr;

    /// Placeholder so the workspace builds off Linux; cannot be constructed
    pub struct NetlinkRouteController {
        _private: (),
    }

    impl NetlinkRouteController {
        pub fn new(_prefixes: Prefixes) -> Result<Self> {
            Err(Error::config(
                "Netlink route controller is only supported on Linux",
            ))
        }
    }

    #[async_trait]
    impl RouteController for NetlinkRouteController {
        async fn add_blackhole(&self, _address: IpAddr) -> Result<()> {
            Err(Error::route("netlink is not available on this platform"))
        }

        async fn remove_blackhole(&self, _address: IpAddr) -> Result<()> {
            Err(Error::route("netlink is not available on this platform"))
        }

        fn backend_name(&self) -> &'static str {
            "netlink"
        }
    }
}

#[cfg(all(test, not(target_os = "linux")))]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_platform() {
        assert!(matches!(
            NetlinkRouteController::new(Prefixes::default()),
            Err(Error::Config(_))
        ));
    }
}
