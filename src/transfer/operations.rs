//! Transfer operations
//!
//! Handles data channel setup for FTP passive (PASV/EPSV) and active
//! (PORT/EPRT) modes: argument parsing, address policy and listener binding.

use log::{debug, info, warn};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::ops::RangeInclusive;
use tokio::net::TcpListener;

use crate::error::TransferError;
use crate::transfer::results::{ActiveModeResult, AddressFamily, EpsvRequest, PassiveModeResult};

/// Binds a passive-mode listener on the control connection's local address.
///
/// With a configured range the first free port wins; otherwise the OS picks
/// an ephemeral port.
pub async fn setup_passive_mode(
    local_ip: IpAddr,
    port_range: Option<RangeInclusive<u16>>,
) -> Result<PassiveModeResult, TransferError> {
    let local_ip = local_ip.to_canonical();

    let listener = match port_range {
        None => {
            let addr = SocketAddr::new(local_ip, 0);
            TcpListener::bind(addr)
                .await
                .map_err(|e| TransferError::PortBindingFailed(addr, e))?
        }
        Some(range) => bind_in_range(local_ip, range).await?,
    };

    let data_socket = listener
        .local_addr()
        .map_err(TransferError::Network)?;
    info!("Passive data listener bound on {data_socket}");

    Ok(PassiveModeResult {
        data_socket,
        listener,
    })
}

async fn bind_in_range(
    ip: IpAddr,
    range: RangeInclusive<u16>,
) -> Result<TcpListener, TransferError> {
    for port in range {
        let addr = SocketAddr::new(ip, port);
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!("Data port {port} in use, trying next");
            }
            Err(e) => return Err(TransferError::PortBindingFailed(addr, e)),
        }
    }
    warn!("Passive port range exhausted on {ip}");
    Err(TransferError::NoAvailablePort)
}

/// Parses a PORT argument `h1,h2,h3,h4,p1,p2`.
pub fn parse_port_argument(arg: &str) -> Result<SocketAddr, TransferError> {
    let fields: Vec<u8> = arg
        .trim()
        .split(',')
        .map(|field| field.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| TransferError::InvalidPortCommand("PORT"))?;

    let [h1, h2, h3, h4, p1, p2] = fields[..] else {
        return Err(TransferError::InvalidPortCommand("PORT"));
    };

    let ip = Ipv4Addr::new(h1, h2, h3, h4);
    let port = u16::from(p1) << 8 | u16::from(p2);
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Parses an EPRT argument `<d><proto><d><addr><d><port><d>`.
///
/// The delimiter is whatever printable character the argument starts with.
pub fn parse_eprt_argument(arg: &str) -> Result<SocketAddr, TransferError> {
    const BAD: TransferError = TransferError::InvalidPortCommand("EPRT");

    let arg = arg.trim();
    let delimiter = arg.chars().next().ok_or(BAD)?;
    if !delimiter.is_ascii_graphic() || arg.len() < 2 || !arg.ends_with(delimiter) {
        return Err(BAD);
    }

    let inner = &arg[delimiter.len_utf8()..arg.len() - delimiter.len_utf8()];
    let fields: Vec<&str> = inner.split(delimiter).collect();
    let [proto, addr, port] = fields[..] else {
        return Err(BAD);
    };

    let ip = match AddressFamily::from_protocol(proto) {
        Some(AddressFamily::V4) => IpAddr::V4(addr.parse::<Ipv4Addr>().map_err(|_| BAD)?),
        Some(AddressFamily::V6) => IpAddr::V6(addr.parse::<Ipv6Addr>().map_err(|_| BAD)?),
        None if proto.chars().all(|c| c.is_ascii_digit()) && !proto.is_empty() => {
            return Err(TransferError::UnsupportedProtocol);
        }
        None => return Err(BAD),
    };

    let port = port.parse::<u16>().map_err(|_| BAD)?;
    Ok(SocketAddr::new(ip, port))
}

/// Parses an EPSV argument: none, `ALL`, or a network protocol number.
pub fn parse_epsv_argument(arg: Option<&str>) -> Result<EpsvRequest, TransferError> {
    let Some(arg) = arg.map(str::trim).filter(|a| !a.is_empty()) else {
        return Ok(EpsvRequest::Default);
    };

    if arg.eq_ignore_ascii_case("ALL") {
        return Ok(EpsvRequest::All);
    }
    if !arg.chars().all(|c| c.is_ascii_digit()) {
        return Err(TransferError::InvalidPortCommand("EPSV"));
    }
    AddressFamily::from_protocol(arg)
        .map(EpsvRequest::Family)
        .ok_or(TransferError::UnsupportedProtocol)
}

/// Applies the active-mode address policy to a parsed PORT/EPRT target.
pub fn setup_active_mode(
    target: SocketAddr,
    control_peer: IpAddr,
    allow_privileged: bool,
    allow_foreign: bool,
) -> Result<ActiveModeResult, TransferError> {
    let target = SocketAddr::new(target.ip().to_canonical(), target.port());
    let control_peer = control_peer.to_canonical();

    if target.port() == 0 {
        return Err(TransferError::InvalidPortCommand("PORT"));
    }

    if AddressFamily::of(target.ip()) != AddressFamily::of(control_peer) {
        return Err(TransferError::ProtocolMismatch);
    }

    if !allow_privileged && target.port() <= 1024 {
        warn!("Refused active data connection to privileged port {}", target.port());
        return Err(TransferError::PrivilegedPort(target.port()));
    }

    if !allow_foreign && target.ip() != control_peer {
        warn!("Refused active data connection to {target}; control peer is {control_peer}");
        return Err(TransferError::IpMismatch {
            expected: control_peer.to_string(),
            provided: target.ip().to_string(),
        });
    }

    debug!("Active data target accepted: {target}");
    Ok(ActiveModeResult {
        data_socket: target,
    })
}

/// Text of a 227 reply for an IPv4 passive endpoint.
pub fn format_pasv_reply(ip: Ipv4Addr, port: u16) -> String {
    let [h1, h2, h3, h4] = ip.octets();
    format!(
        "Entering Passive Mode ({h1},{h2},{h3},{h4},{},{}).",
        port >> 8,
        port & 0xff
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn parses_port_octets() {
        assert_eq!(
            parse_port_argument("127,0,0,1,195,80").unwrap(),
            "127.0.0.1:50000".parse().unwrap()
        );
    }

    #[test]
    fn rejects_malformed_port_arguments() {
        for arg in [
            "127,0,0,1,195",
            "127,0,0,1,195,80,1",
            "256,0,0,1,1,1",
            "127,0,0,-1,1,1",
            "127,0,0,1,1,x",
            "",
        ] {
            assert!(
                matches!(parse_port_argument(arg), Err(TransferError::InvalidPortCommand("PORT"))),
                "{arg}"
            );
        }
    }

    #[test]
    fn parses_eprt_for_both_families() {
        assert_eq!(
            parse_eprt_argument("|1|127.0.0.1|50000|").unwrap(),
            "127.0.0.1:50000".parse().unwrap()
        );
        assert_eq!(
            parse_eprt_argument("!2!::1!50000!").unwrap(),
            "[::1]:50000".parse().unwrap()
        );
    }

    #[test]
    fn eprt_errors_are_classified() {
        assert!(matches!(
            parse_eprt_argument("|3|127.0.0.1|50000|"),
            Err(TransferError::UnsupportedProtocol)
        ));
        for arg in ["|1|127.0.0.1|65536|", "|1|::1|50000|", "|1|127.0.0.1|", "1|127.0.0.1|2|"] {
            assert!(
                matches!(parse_eprt_argument(arg), Err(TransferError::InvalidPortCommand("EPRT"))),
                "{arg}"
            );
        }
    }

    #[test]
    fn parses_epsv_arguments() {
        assert_eq!(parse_epsv_argument(None).unwrap(), EpsvRequest::Default);
        assert_eq!(parse_epsv_argument(Some("all")).unwrap(), EpsvRequest::All);
        assert_eq!(
            parse_epsv_argument(Some("2")).unwrap(),
            EpsvRequest::Family(AddressFamily::V6)
        );
        assert!(matches!(
            parse_epsv_argument(Some("3")),
            Err(TransferError::UnsupportedProtocol)
        ));
        assert!(matches!(
            parse_epsv_argument(Some("foo")),
            Err(TransferError::InvalidPortCommand("EPSV"))
        ));
    }

    #[test]
    fn active_policy_checks() {
        let ok = setup_active_mode("127.0.0.1:50000".parse().unwrap(), PEER, false, false);
        assert!(ok.is_ok());

        let privileged = setup_active_mode("127.0.0.1:21".parse().unwrap(), PEER, false, false);
        assert!(matches!(privileged, Err(TransferError::PrivilegedPort(21))));
        assert!(setup_active_mode("127.0.0.1:21".parse().unwrap(), PEER, true, false).is_ok());

        let foreign = setup_active_mode("10.0.0.1:50000".parse().unwrap(), PEER, false, false);
        assert!(matches!(foreign, Err(TransferError::IpMismatch { .. })));
        assert!(setup_active_mode("10.0.0.1:50000".parse().unwrap(), PEER, false, true).is_ok());

        let v6 = setup_active_mode("[::1]:50000".parse().unwrap(), PEER, false, true);
        assert!(matches!(v6, Err(TransferError::ProtocolMismatch)));
    }

    #[test]
    fn mapped_ipv4_peer_counts_as_ipv4() {
        let mapped: IpAddr = "::ffff:127.0.0.1".parse().unwrap();
        assert!(setup_active_mode("127.0.0.1:50000".parse().unwrap(), mapped, false, false).is_ok());
    }

    #[test]
    fn pasv_reply_encodes_port_bytes() {
        assert_eq!(
            format_pasv_reply(Ipv4Addr::new(10, 1, 2, 3), 50000),
            "Entering Passive Mode (10,1,2,3,195,80)."
        );
    }

    #[tokio::test]
    async fn passive_mode_binds_within_range() {
        let result = setup_passive_mode(PEER, None).await.unwrap();
        assert_ne!(result.data_socket.port(), 0);

        let taken = result.data_socket.port();
        let next = setup_passive_mode(PEER, Some(taken..=taken)).await;
        assert!(matches!(next, Err(TransferError::NoAvailablePort)));
    }
}
