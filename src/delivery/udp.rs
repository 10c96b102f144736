//! `udp://host:port` — batches packets into MTU-sized datagrams.
//!
//! `⌊(1400 - 20 - 8) / 188⌋ = 7` packets per datagram (IPv4 + UDP headers
//! subtracted from a conservative 1400-byte MTU estimate), per spec.md §4.6
//! and §6, and SPEC_FULL.md §11's operational defaults. A trailing partial
//! batch is held until either it fills or [`super::DeliveryMethod::flush`]
//! is called.

use super::{DeliveryMethod, DeliveryMethodHandler};
use crate::error::{EngineError, Result};
use crate::format::ts::types::TS_PACKET_SIZE;
use parking_lot::Mutex;
use std::net::UdpSocket;

pub const PREFIX: &str = "udp://";
/// Conservative MTU estimate packets are batched against.
pub const MTU_BYTES: usize = 1400;
/// Packets per datagram at [`MTU_BYTES`], after subtracting IPv4 (20 bytes)
/// and UDP (8 bytes) headers.
pub const PACKETS_PER_DATAGRAM: usize = (MTU_BYTES - 20 - 8) / TS_PACKET_SIZE;

pub struct UdpHandler;

impl DeliveryMethodHandler for UdpHandler {
    fn can_handle(&self, mrl: &str) -> bool {
        mrl.starts_with(PREFIX)
    }

    fn create(&self, mrl: &str) -> Result<Box<dyn DeliveryMethod>> {
        let target = mrl
            .strip_prefix(PREFIX)
            .ok_or_else(|| EngineError::DeliverySchemeUnknown(mrl.to_string()))?;
        let addr: std::net::SocketAddr = target
            .parse()
            .map_err(|_| EngineError::Config(format!("invalid udp MRL target: {target}")))?;

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;

        Ok(Box::new(UdpOutput {
            mrl: mrl.to_string(),
            socket,
            pending: Mutex::new(Vec::with_capacity(PACKETS_PER_DATAGRAM * TS_PACKET_SIZE)),
        }))
    }
}

struct UdpOutput {
    mrl: String,
    socket: UdpSocket,
    pending: Mutex<Vec<u8>>,
}

impl DeliveryMethod for UdpOutput {
    fn mrl(&self) -> &str {
        &self.mrl
    }

    fn send_packet(&self, packet: &[u8; 188]) -> Result<()> {
        let mut pending = self.pending.lock();
        pending.extend_from_slice(packet);
        if pending.len() >= PACKETS_PER_DATAGRAM * TS_PACKET_SIZE {
            let datagram: Vec<u8> = pending.drain(..PACKETS_PER_DATAGRAM * TS_PACKET_SIZE).collect();
            self.socket.send(&datagram)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            self.socket.send(&pending)?;
            pending.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_exactly_seven_packets_per_datagram() {
        assert_eq!(PACKETS_PER_DATAGRAM, 7);
    }

    #[test]
    fn hundred_packets_batch_as_fourteen_full_and_one_partial() {
        let full_datagrams = 100 / PACKETS_PER_DATAGRAM;
        let remainder = 100 % PACKETS_PER_DATAGRAM;
        assert_eq!(full_datagrams, 14);
        assert_eq!(remainder, 2);
    }
}
