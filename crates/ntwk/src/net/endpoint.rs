use std::io;
use std::net::{SocketAddr, UdpSocket};

use super::config::PeerConfig;
use super::pool::PacketPool;
use super::protocol::{Packet, PacketHeader, PacketType};
use super::stats::NetworkStats;
use crate::peer::PeerError;

/// Non-blocking UDP socket that moves [`Packet`]s through pooled buffers.
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    pool: PacketPool<Vec<u8>>,
    receive_buffer_size: usize,
    send_buffer_size: usize,
    send_sequence: u32,
    stats: NetworkStats,
}

impl NetworkEndpoint {
    pub fn bind(config: &PeerConfig, pool: PacketPool<Vec<u8>>) -> io::Result<Self> {
        let socket = UdpSocket::bind(config.local_endpoint())?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            pool,
            receive_buffer_size: config.receive_buffer_size(),
            send_buffer_size: config.send_buffer_size(),
            send_sequence: 0,
            stats: NetworkStats::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn pool(&self) -> &PacketPool<Vec<u8>> {
        &self.pool
    }

    pub fn create_packet(&mut self, payload: PacketType) -> Packet {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        Packet::new(PacketHeader::new(sequence), payload)
    }

    pub fn send_to(&mut self, payload: PacketType, addr: SocketAddr) -> Result<usize, PeerError> {
        let packet = self.create_packet(payload);
        let mut buffer = self.pool.get_cleared();

        let result = self.write_datagram(&packet, &mut buffer, addr);
        self.pool.recycle(buffer);

        // Data payloads are usually pooled buffers handed over by the caller.
        if let PacketType::Data(bytes) = packet.payload {
            self.pool.recycle(bytes);
        }

        result
    }

    fn write_datagram(
        &mut self,
        packet: &Packet,
        buffer: &mut Vec<u8>,
        addr: SocketAddr,
    ) -> Result<usize, PeerError> {
        packet.serialize_into(buffer)?;

        if buffer.len() > self.send_buffer_size {
            return Err(PeerError::PacketTooLarge {
                size: buffer.len(),
                limit: self.send_buffer_size,
            });
        }

        let bytes = self.socket.send_to(buffer.as_slice(), addr)?;
        self.stats.record_sent(bytes);
        Ok(bytes)
    }

    /// Drains every datagram currently queued on the socket.
    pub fn receive(&mut self) -> Result<Vec<(Packet, SocketAddr)>, PeerError> {
        let mut packets = Vec::new();
        let mut buffer = self.pool.get_cleared();
        buffer.resize(self.receive_buffer_size, 0);

        let result = loop {
            match self.socket.recv_from(&mut buffer) {
                Ok((size, addr)) => match Packet::deserialize(&buffer[..size]) {
                    Ok(packet) if packet.header.is_valid() => {
                        self.stats.record_received(size);
                        packets.push((packet, addr));
                    }
                    Ok(_) | Err(_) => {
                        log::debug!("Dropped malformed datagram from {}", addr);
                        self.stats.record_dropped();
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(packets),
                // Windows reports an ICMP port-unreachable from an earlier send this way.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => break Err(PeerError::Io(e)),
            }
        };

        self.pool.recycle(buffer);
        result
    }
}
