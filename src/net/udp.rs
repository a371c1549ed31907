//! UDP packet transport.
//!
//! For deployments without userspace NIC rings, packetizer output can
//! travel over ordinary sockets. The [`PacketTransport`] trait is the
//! seam: production uses [`UdpTransport`] over a tokio socket, tests use
//! in-memory implementations.

use crate::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// An async sink/source of whole RTP packets
#[async_trait]
pub trait PacketTransport: Send + Sync {
    /// Sends one packet
    async fn send(&self, packet: &[u8]) -> Result<()>;

    /// Receives one packet into `buf`, returning its length
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;
}

/// RTP over a UDP socket
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Binds a socket and fixes the peer address
    pub async fn bind(local: SocketAddr, peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self { socket, peer })
    }
}

#[async_trait]
impl PacketTransport for UdpTransport {
    async fn send(&self, packet: &[u8]) -> Result<()> {
        self.socket.send_to(packet, self.peer).await?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let (len, _) = self.socket.recv_from(buf).await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_loopback() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let a_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

            let a = UdpSocket::bind(a_addr).await.unwrap();
            let a_local = a.local_addr().unwrap();
            drop(a);

            let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), a_local)
                .await
                .unwrap();
            let b_local = b.socket.local_addr().unwrap();

            let a = UdpTransport::bind(a_local, b_local).await.unwrap();

            b.send(b"hello").await.unwrap();
            let mut buf = [0u8; 16];
            let len = a.recv(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], b"hello");
        });
    }
}
