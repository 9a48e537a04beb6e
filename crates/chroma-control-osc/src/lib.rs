//! chroma-control-osc
//!
//! Receives OSC packets over UDP and extracts filter updates.
//!
//! Only the receive side lives here; mapping names to channels is the controller's job.
//!
//! rosc 0.10.x API note:
//! - `rosc::decoder::decode_udp` returns `Result<(&[u8], OscPacket), _>` (nom-style),
//!   where the first tuple element is the *unconsumed remainder* of the buffer.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use rosc::{OscPacket, OscType};

/// Address prefix of filter messages.
pub const FILTER_PREFIX: &str = "/filter/";

/// Non-blocking UDP OSC receiver that extracts filter messages.
///
/// Convention:
/// - Address: "/filter/<name>", e.g. "/filter/red"
/// - Value: first argument, coercible to f32 (Float, Double, Int, Long)
#[derive(Debug)]
pub struct OscParamReceiver {
    sock: UdpSocket,
    buf: [u8; 2048],
}

impl OscParamReceiver {
    /// Bind to an address like "127.0.0.1:9000" and put the socket in non-blocking mode.
    pub fn bind(addr: &str) -> io::Result<Self> {
        let sock = UdpSocket::bind(addr)?;
        sock.set_nonblocking(true)?;
        tracing::info!(addr, "listening for OSC filter messages");
        Ok(Self {
            sock,
            buf: [0u8; 2048],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sock.local_addr()
    }

    /// Return all filter updates available right now, in arrival order.
    ///
    /// This never blocks; it drains the UDP socket until `WouldBlock`.
    pub fn poll(&mut self) -> Vec<(String, f32)> {
        let mut out: Vec<(String, f32)> = Vec::new();

        loop {
            match self.sock.recv_from(&mut self.buf) {
                Ok((n, _from)) => match rosc::decoder::decode_udp(&self.buf[..n]) {
                    Ok((_rest, pkt)) => extract_from_packet(pkt, &mut out),
                    Err(e) => tracing::debug!(error = ?e, "dropping undecodable OSC packet"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "OSC receive failed");
                    break;
                }
            }
        }

        out
    }
}

/// Walk a packet/bundle tree and push parsed filter messages into `out`.
fn extract_from_packet(pkt: OscPacket, out: &mut Vec<(String, f32)>) {
    match pkt {
        OscPacket::Message(m) => {
            if let Some(kv) = parse_param_message(&m.addr, &m.args) {
                out.push(kv);
            }
        }
        OscPacket::Bundle(b) => {
            for p in b.content {
                extract_from_packet(p, out);
            }
        }
    }
}

/// Parse a message into a `(name, value)` pair if it matches the filter convention.
pub fn parse_param_message(addr: &str, args: &[OscType]) -> Option<(String, f32)> {
    let name = addr.strip_prefix(FILTER_PREFIX)?;
    if name.is_empty() || name.contains('/') {
        return None;
    }
    let v = match *args.first()? {
        OscType::Float(x) => x,
        OscType::Double(x) => x as f32,
        OscType::Int(x) => x as f32,
        OscType::Long(x) => x as f32,
        _ => return None,
    };
    Some((name.to_string(), v))
}
