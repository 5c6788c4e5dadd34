//! Raw `AF_BLUETOOTH`/`SOCK_STREAM`/`BTPROTO_RFCOMM` socket FFI.
//!
//! No `bluer`/BlueZ D-Bus binding — the listening and per-client sockets are
//! opened directly via `libc::socket` with the platform's own `sockaddr_rc`
//! layout (`family: u16, bdaddr: [u8; 6], channel: u8`), stable across Linux
//! kernels (`spec` §9).

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

const AF_BLUETOOTH: libc::c_int = 31;
const BTPROTO_RFCOMM: libc::c_int = 3;
const SOL_RFCOMM: libc::c_int = 18;
pub const BDADDR_ANY: [u8; 6] = [0; 6];

/// Mirrors the kernel's `struct sockaddr_rc`.
#[repr(C)]
#[derive(Clone, Copy)]
struct SockAddrRc {
    rc_family: libc::sa_family_t,
    rc_bdaddr: [u8; 6],
    rc_channel: u8,
}

/// An RFCOMM socket, listening or connected. Closes the descriptor on drop.
pub struct RfcommSocket {
    fd: OwnedFd,
}

impl RfcommSocket {
    /// Open a listening socket bound to `(BDADDR_ANY, channel)` with
    /// `SO_REUSEADDR` and the given backlog (`spec` §4.F).
    pub fn listen(channel: u8, backlog: i32) -> io::Result<Self> {
        let raw = unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_STREAM, BTPROTO_RFCOMM) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let reuse: libc::c_int = 1;
        unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                std::ptr::addr_of!(reuse).cast(),
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }

        let addr = SockAddrRc {
            rc_family: AF_BLUETOOTH as libc::sa_family_t,
            rc_bdaddr: BDADDR_ANY,
            rc_channel: channel,
        };
        let bind_ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::addr_of!(addr).cast(),
                mem::size_of::<SockAddrRc>() as libc::socklen_t,
            )
        };
        if bind_ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let listen_ret = unsafe { libc::listen(fd.as_raw_fd(), backlog) };
        if listen_ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { fd })
    }

    /// Blocking `accept(2)`. Must be called from a thread that may block —
    /// callers run this inside `tokio::task::spawn_blocking`.
    pub fn accept(&self) -> io::Result<(RfcommSocket, String)> {
        let mut addr: SockAddrRc = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<SockAddrRc>() as libc::socklen_t;
        let raw = unsafe {
            libc::accept(
                self.fd.as_raw_fd(),
                std::ptr::addr_of_mut!(addr).cast(),
                &mut len,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        let peer = format_bdaddr(&addr.rc_bdaddr);
        Ok((RfcommSocket { fd }, peer))
    }

    /// Forcibly unblock a thread parked in [`Self::accept`] on this socket,
    /// so the accept loop can observe shutdown without waiting for the next
    /// real connection.
    pub fn shutdown(&self) -> io::Result<()> {
        let ret = unsafe { libc::shutdown(self.fd.as_raw_fd(), libc::SHUT_RDWR) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Force the file descriptor into non-blocking mode so it can be wrapped
    /// by `tokio::io::unix::AsyncFd`.
    pub fn set_nonblocking(&self) -> io::Result<()> {
        let raw = self.fd.as_raw_fd();
        let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let ret = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for RfcommSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn format_bdaddr(bytes: &[u8; 6]) -> String {
    // BD_ADDR is stored little-endian in sockaddr_rc; printed big-endian
    // conventionally (e.g. AA:BB:CC:DD:EE:FF).
    bytes
        .iter()
        .rev()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_bdaddr_big_endian() {
        let addr = [0x06, 0x05, 0x04, 0x03, 0x02, 0x01];
        assert_eq!(format_bdaddr(&addr), "01:02:03:04:05:06");
    }

    #[test]
    fn sockaddr_rc_field_order_matches_kernel() {
        // family, then 6-byte bdaddr, then channel — struct layout may pad
        // the trailing u8 up to the type's alignment, but field order and
        // the 2+6+1 logical layout must match `struct sockaddr_rc`.
        assert!(mem::size_of::<SockAddrRc>() >= mem::size_of::<libc::sa_family_t>() + 6 + 1);
    }
}
