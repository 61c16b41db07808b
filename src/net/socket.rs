//! Boundary I/O: the mixer's UDP socket.
//!
//! A `socket2`-built datagram socket converted to `std::net::UdpSocket`,
//! non-blocking via a short read timeout rather than `O_NONBLOCK`, so the
//! receive thread can still observe the shutdown flag between reads.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

/// Read timeout used to poll the stop flag between blocking reads.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

pub struct MixerSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl MixerSocket {
    pub fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let domain = if local_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&local_addr.into())?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        // Audio traffic is bursty; a larger kernel buffer absorbs jitter
        // before packets are dropped at the socket.
        let _ = socket.set_recv_buffer_size(1024 * 1024);
        let _ = socket.set_send_buffer_size(1024 * 1024);

        let socket: UdpSocket = socket.into();
        let actual_local = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr: actual_local,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    pub fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr)
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            local_addr: self.local_addr,
        })
    }
}
