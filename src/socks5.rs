//! Hand-rolled SOCKS5 handshake and UDP-ASSOCIATE relay (§4.3, §9 "SOCKS5
//! UDP relay"). No standard async HTTP/proxy client speaks UDP ASSOCIATE,
//! so this talks the wire protocol directly: TCP control handshake, then a
//! UDP datagram wrapped in the SOCKS5 UDP request header.
//!
//! The TCP control connection is kept open for the lifetime of the UDP
//! session, per RFC 1928 §7 and per §4.3 step 3.

use std::net::{IpAddr, SocketAddr};

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xff;
const CMD_UDP_ASSOCIATE: u8 = 0x03;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// A live SOCKS5 UDP-ASSOCIATE session: the TCP control socket (must stay
/// open) plus the local UDP socket bound for the relay.
pub struct Socks5UdpSession {
    _control: TcpStream,
    udp: UdpSocket,
    relay_addr: SocketAddr,
}

impl Socks5UdpSession {
    /// Performs the full handshake: TCP connect, SOCKS5 auth negotiation,
    /// UDP ASSOCIATE, and binds the local relay socket.
    pub async fn establish(
        proxy_host: &str,
        proxy_port: u16,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        let mut control = TcpStream::connect((proxy_host, proxy_port))
            .await
            .with_context(|| format!("connect to proxy {proxy_host}:{proxy_port}"))?;

        negotiate_method(&mut control, user, password).await?;

        // Request an UDP relay; 0.0.0.0:0 lets the proxy pick the source it
        // will accept datagrams from.
        let relay_addr = send_associate(&mut control).await?;

        let bind_addr: SocketAddr = if relay_addr.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };
        let udp = UdpSocket::bind(bind_addr)
            .await
            .context("bind local UDP relay socket")?;
        udp.connect(relay_addr)
            .await
            .context("connect local UDP socket to relay")?;

        Ok(Self {
            _control: control,
            udp,
            relay_addr,
        })
    }

    pub fn relay_addr(&self) -> SocketAddr {
        self.relay_addr
    }

    /// Sends `payload` to `target_host:target_port` through the relay,
    /// wrapped in the SOCKS5 UDP request header (RFC 1928 §7).
    pub async fn send_to(&self, target_host: &str, target_port: u16, payload: &[u8]) -> Result<()> {
        let mut datagram = vec![0x00, 0x00, 0x00];
        encode_address(&mut datagram, target_host, target_port);
        datagram.extend_from_slice(payload);
        self.udp
            .send(&datagram)
            .await
            .context("send UDP datagram to relay")?;
        Ok(())
    }

    /// Reads one datagram and strips the SOCKS5 UDP header, returning the
    /// inner payload bytes.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<Vec<u8>> {
        let n = self.udp.recv(buf).await.context("read from UDP socket")?;
        let datagram = &buf[..n];
        if datagram.len() < 4 {
            return Err(anyhow!("UDP reply datagram too short"));
        }
        let atyp = datagram[3];
        let header_len = match atyp {
            ATYP_IPV4 => 4 + 4 + 2,
            ATYP_IPV6 => 4 + 16 + 2,
            ATYP_DOMAIN => {
                let domain_len = *datagram.get(4).ok_or_else(|| anyhow!("truncated UDP header"))? as usize;
                4 + 1 + domain_len + 2
            }
            other => return Err(anyhow!("unsupported UDP reply ATYP {other}")),
        };
        if datagram.len() < header_len {
            return Err(anyhow!("UDP reply datagram shorter than its own header"));
        }
        Ok(datagram[header_len..].to_vec())
    }
}

async fn negotiate_method(
    control: &mut TcpStream,
    user: Option<&str>,
    password: Option<&str>,
) -> Result<()> {
    let methods: &[u8] = if user.is_some() {
        &[METHOD_NO_AUTH, METHOD_USER_PASS]
    } else {
        &[METHOD_NO_AUTH]
    };
    let mut greeting = vec![SOCKS_VERSION, methods.len() as u8];
    greeting.extend_from_slice(methods);
    control
        .write_all(&greeting)
        .await
        .context("write SOCKS5 greeting")?;

    let mut reply = [0u8; 2];
    control
        .read_exact(&mut reply)
        .await
        .context("read SOCKS5 method selection")?;
    if reply[0] != SOCKS_VERSION {
        return Err(anyhow!("unexpected SOCKS version {}", reply[0]));
    }
    match reply[1] {
        METHOD_NO_AUTH => Ok(()),
        METHOD_USER_PASS => {
            let user = user.unwrap_or("");
            let password = password.unwrap_or("");
            let mut req = vec![0x01, user.len() as u8];
            req.extend_from_slice(user.as_bytes());
            req.push(password.len() as u8);
            req.extend_from_slice(password.as_bytes());
            control
                .write_all(&req)
                .await
                .context("write SOCKS5 auth subnegotiation")?;
            let mut auth_reply = [0u8; 2];
            control
                .read_exact(&mut auth_reply)
                .await
                .context("read SOCKS5 auth reply")?;
            if auth_reply[1] != 0x00 {
                return Err(anyhow!("SOCKS5 authentication rejected"));
            }
            Ok(())
        }
        METHOD_NO_ACCEPTABLE => Err(anyhow!("proxy rejected all SOCKS5 auth methods")),
        other => Err(anyhow!("unsupported SOCKS5 method {other}")),
    }
}

async fn send_associate(control: &mut TcpStream) -> Result<SocketAddr> {
    let mut req = vec![SOCKS_VERSION, CMD_UDP_ASSOCIATE, 0x00, ATYP_IPV4];
    req.extend_from_slice(&[0, 0, 0, 0]);
    req.extend_from_slice(&0u16.to_be_bytes());
    control
        .write_all(&req)
        .await
        .context("write UDP ASSOCIATE request")?;

    let mut head = [0u8; 4];
    control
        .read_exact(&mut head)
        .await
        .context("read UDP ASSOCIATE reply header")?;
    if head[0] != SOCKS_VERSION {
        return Err(anyhow!("unexpected SOCKS version in ASSOCIATE reply"));
    }
    if head[1] != 0x00 {
        return Err(anyhow!("UDP ASSOCIATE rejected, reply code {}", head[1]));
    }
    let ip: IpAddr = match head[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            control.read_exact(&mut octets).await?;
            IpAddr::from(octets)
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            control.read_exact(&mut octets).await?;
            IpAddr::from(octets)
        }
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            control.read_exact(&mut len_buf).await?;
            let mut name = vec![0u8; len_buf[0] as usize];
            control.read_exact(&mut name).await?;
            let name = String::from_utf8_lossy(&name).to_string();
            tokio::net::lookup_host((name.as_str(), 0))
                .await
                .context("resolve ASSOCIATE reply domain")?
                .next()
                .map(|a| a.ip())
                .ok_or_else(|| anyhow!("could not resolve ASSOCIATE reply domain {name}"))?
        }
        other => return Err(anyhow!("unsupported ASSOCIATE reply ATYP {other}")),
    };
    let mut port_buf = [0u8; 2];
    control.read_exact(&mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    // Some proxies reply with 0.0.0.0 meaning "use the address you dialed
    // me on"; fall back to the control connection's peer IP in that case.
    let relay_ip = if ip.is_unspecified() {
        control.peer_addr().map(|a| a.ip()).unwrap_or(ip)
    } else {
        ip
    };
    Ok(SocketAddr::new(relay_ip, port))
}

fn encode_address(buf: &mut Vec<u8>, host: &str, port: u16) {
    if let Ok(ip) = host.parse::<IpAddr>() {
        match ip {
            IpAddr::V4(v4) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&v6.octets());
            }
        }
    } else {
        buf.push(ATYP_DOMAIN);
        buf.push(host.len() as u8);
        buf.extend_from_slice(host.as_bytes());
    }
    buf.extend_from_slice(&port.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_ipv4_address() {
        let mut buf = Vec::new();
        encode_address(&mut buf, "1.2.3.4", 53);
        assert_eq!(buf, vec![ATYP_IPV4, 1, 2, 3, 4, 0, 53]);
    }

    #[test]
    fn encodes_domain_address() {
        let mut buf = Vec::new();
        encode_address(&mut buf, "example.com", 80);
        assert_eq!(buf[0], ATYP_DOMAIN);
        assert_eq!(buf[1] as usize, "example.com".len());
        assert_eq!(&buf[2..2 + 11], b"example.com");
    }
}
