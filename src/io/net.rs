// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

//! IPv4 stream sockets over the thread-local ring.

use std::fmt;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, RawFd};
use std::ptr;

use io_uring::{opcode, types};
use nix::errno::Errno;
use nix::sys::socket::{socket, AddressFamily, Backlog, SockFlag, SockType, SockaddrIn};

use crate::error::{Error, Result};
use crate::uring;

/// An IPv4 endpoint. Both fields are stored in network byte order, matching
/// the kernel's `sockaddr_in` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Inet4Address {
    pub addr: u32,
    pub port: u16,
}

impl Inet4Address {
    /// Builds an address from host-order parts.
    pub const fn new(addr: u32, port: u16) -> Self {
        Self { addr: addr.to_be(), port: port.to_be() }
    }

    /// Parses a dotted-decimal address. Returns `None` for malformed input.
    pub fn parse(ip: &str, port: u16) -> Option<Self> {
        let ip: std::net::Ipv4Addr = ip.parse().ok()?;
        Some(Self { addr: u32::from(ip).to_be(), port: port.to_be() })
    }

    /// The four address bytes in wire order.
    pub fn octets(&self) -> [u8; 4] {
        self.addr.to_ne_bytes()
    }

    pub fn port_host_order(&self) -> u16 {
        u16::from_be(self.port)
    }

    pub fn is_valid(&self) -> bool {
        self.addr != 0 || self.port != 0
    }

    pub fn to_sockaddr_in(&self) -> libc::sockaddr_in {
        let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
        sa.sin_family = libc::AF_INET as libc::sa_family_t;
        sa.sin_addr.s_addr = self.addr;
        sa.sin_port = self.port;
        sa
    }
}

impl fmt::Display for Inet4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(f, "{}.{}.{}.{}:{}", o[0], o[1], o[2], o[3], self.port_host_order())
    }
}

//-----------------------------------------------------------------------------

const LISTEN_BACKLOG: i32 = 2 * 1024;

/// IPv4 stream socket whose connect/accept/read/write all settle through
/// the ring of the thread that issues them.
pub struct Inet4StreamSocket {
    fd: RawFd,
    pub local_addr: Inet4Address,
    pub remote_addr: Inet4Address,
}

impl Inet4StreamSocket {
    pub fn new() -> Self {
        Self { fd: -1, local_addr: Inet4Address::default(), remote_addr: Inet4Address::default() }
    }

    fn create_socket() -> Result<RawFd> {
        let fd = socket(AddressFamily::Inet, SockType::Stream, SockFlag::empty(), None)
            .map_err(|errno| Error::socket(format!("failed to create socket: {errno}")))?;
        Ok(fd.into_raw_fd())
    }

    pub fn is_valid(&self) -> bool {
        self.fd != -1
    }

    pub fn close(&mut self) {
        if self.is_valid() {
            let _ = nix::unistd::close(self.fd);
            self.fd = -1;
        }
    }

    pub async fn connect(&mut self, remote_addr: Inet4Address) -> Result<()> {
        self.close();
        self.fd = Self::create_socket()?;

        // Held across the await so the kernel reads a live sockaddr.
        let addr = remote_addr.to_sockaddr_in();
        let entry = opcode::Connect::new(
            types::Fd(self.fd),
            ptr::from_ref(&addr).cast::<libc::sockaddr>(),
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
        .build();

        let res = uring::run_res(entry).await?;
        if res < 0 {
            self.close();
            return Err(Error::Connect(Errno::from_raw(-res)));
        }

        self.remote_addr = remote_addr;
        Ok(())
    }

    /// Binds and starts listening. Both are plain syscalls; only the
    /// accepted connections go through the ring.
    pub fn bind(&mut self, local_addr: Inet4Address) -> Result<()> {
        self.close();
        self.fd = Self::create_socket()?;

        let o = local_addr.octets();
        let addr = SockaddrIn::new(o[0], o[1], o[2], o[3], local_addr.port_host_order());

        let bound = nix::sys::socket::bind(self.fd, &addr).and_then(|()| {
            let fd = unsafe { BorrowedFd::borrow_raw(self.fd) };
            nix::sys::socket::listen(&fd, Backlog::new(LISTEN_BACKLOG).unwrap())
        });

        if let Err(errno) = bound {
            self.close();
            return Err(Error::Bind(errno));
        }

        self.local_addr = local_addr;
        Ok(())
    }

    pub async fn accept(&mut self) -> Result<Inet4StreamSocket> {
        let entry = opcode::Accept::new(types::Fd(self.fd), ptr::null_mut(), ptr::null_mut())
            .build();

        let res = uring::run_res(entry).await?;
        if res < 0 {
            return Err(Error::Accept(Errno::from_raw(-res)));
        }

        let mut client = Inet4StreamSocket::new();
        client.fd = res;
        Ok(client)
    }

    /// Reads whatever the kernel has, up to `buf.len()` bytes. Zero means
    /// the peer closed the connection.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let entry = opcode::Recv::new(types::Fd(self.fd), buf.as_mut_ptr(), buf.len() as u32)
            .build();

        let res = uring::run_res(entry).await?;
        if res < 0 {
            return Err(Error::socket(format!("failed to read: {}", Errno::from_raw(-res))));
        }
        Ok(res as usize)
    }

    pub async fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        let entry = opcode::Send::new(types::Fd(self.fd), buf.as_ptr(), buf.len() as u32)
            .build();

        let res = uring::run_res(entry).await?;
        if res < 0 {
            return Err(Error::socket(format!("failed to write: {}", Errno::from_raw(-res))));
        }
        Ok(res as usize)
    }

    /// Reads until `buf` is full, treating a zero-byte read as an
    /// unexpected end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read_some(&mut buf[total..]).await?;
            if n == 0 {
                return Err(Error::socket("unexpectedly read 0 bytes"));
            }
            total += n;
        }
        Ok(total)
    }

    /// Writes all of `buf`, retrying short writes.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.write_some(&buf[total..]).await?;
            if n == 0 {
                return Err(Error::socket("unexpectedly wrote 0 bytes"));
            }
            total += n;
        }
        Ok(total)
    }
}

impl Default for Inet4StreamSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRawFd for Inet4StreamSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Inet4StreamSocket {
    fn drop(&mut self) {
        self.close();
    }
}

//-----------------------------------------------------------------------------
