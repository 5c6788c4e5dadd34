//! RFCOMM listening socket, accept loop and per-client message loop
//! (`spec` §4.F).
//!
//! One connection is served at a time — provisioning is rare and serial —
//! but the listening socket's lifetime strictly contains every accepted
//! client socket's lifetime (`spec` §5 ordering guarantee c). The blocking
//! `accept(2)` runs on a `spawn_blocking` thread; once accepted, the client
//! fd is wrapped in [`tokio::io::unix::AsyncFd`] so reads participate in the
//! cooperative scheduler through short non-blocking poll windows rather than
//! a blocking `recv`.

use std::io;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use log::{info, warn};
use tokio::io::unix::AsyncFd;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::protocol::{self, ProtocolContext, ProvisionRequest};
use super::socket::RfcommSocket;

const CHANNEL: u8 = 1;
const LISTEN_BACKLOG: i32 = 5;
const RECV_WINDOW: Duration = Duration::from_millis(100);
const SEND_RETRY_DELAY: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 4096;

const B64: base64::engine::general_purpose::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Outcome of one non-blocking drain of whatever is currently queued on the
/// socket.
enum Drained {
    /// At least one byte was appended to the caller's buffer.
    Data,
    /// The peer performed an orderly shutdown (`recv` returned 0).
    Closed,
    /// A hard socket error.
    Error,
}

pub struct RfcommServer {
    ctx: ProtocolContext,
}

impl RfcommServer {
    pub fn new(ctx: ProtocolContext) -> Self {
        Self { ctx }
    }

    /// Bind the listening socket, retrying once with a forced cleanup if the
    /// channel is already in use (`spec` §4.F).
    async fn bind_with_retry() -> io::Result<RfcommSocket> {
        match RfcommSocket::listen(CHANNEL, LISTEN_BACKLOG) {
            Ok(socket) => Ok(socket),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                warn!("bluetooth: RFCOMM channel {CHANNEL} in use, forcing cleanup and retrying once");
                crate::shell::run("bluetoothctl discoverable off").await;
                crate::shell::run("systemctl restart bluetooth").await;
                crate::shell::run("bluetoothctl power on").await;
                crate::shell::run("bluetoothctl discoverable on").await;
                RfcommSocket::listen(CHANNEL, LISTEN_BACKLOG)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the accept loop until cancelled. A bind failure after the retry is
    /// the one documented non-fatal-to-the-process failure: this task exits
    /// and logs, the rest of the daemon continues (`spec` §7).
    pub async fn run(self, cancel: CancellationToken) {
        let listener = match Self::bind_with_retry().await {
            Ok(l) => Arc::new(l),
            Err(e) => {
                warn!(
                    "bluetooth: RFCOMM listen on channel {CHANNEL} failed permanently: {e}, \
                     disabling the provisioning server"
                );
                return;
            }
        };
        info!("bluetooth: RFCOMM listening on channel {CHANNEL}");

        let shutdown_listener = listener.clone();
        let unblocker = tokio::spawn(async move {
            cancel.cancelled().await;
            shutdown_listener.shutdown().ok();
        });

        loop {
            let accept_listener = listener.clone();
            match tokio::task::spawn_blocking(move || accept_listener.accept()).await {
                Ok(Ok((client, peer))) => {
                    info!("bluetooth: accepted client {peer}");
                    Self::serve_client(client, peer, self.ctx.clone()).await;
                }
                Ok(Err(e)) => {
                    info!("bluetooth: accept loop stopping: {e}");
                    break;
                }
                Err(e) => {
                    warn!("bluetooth: accept task panicked: {e}");
                    break;
                }
            }
        }
        unblocker.abort();
    }

    /// Serve one client to completion: non-blocking reads accumulated into
    /// lines, each line dispatched and answered, until disconnect or error.
    async fn serve_client(socket: RfcommSocket, peer: String, ctx: ProtocolContext) {
        if let Err(e) = socket.set_nonblocking() {
            warn!("bluetooth: failed to set client {peer} non-blocking: {e}");
            return;
        }
        let async_fd = match AsyncFd::new(socket) {
            Ok(a) => a,
            Err(e) => {
                warn!("bluetooth: AsyncFd wrap failed for {peer}: {e}");
                return;
            }
        };

        let mut buf: Vec<u8> = Vec::new();
        let mut last_sent: Option<String> = None;

        'session: loop {
            let window_elapsed = match timeout(RECV_WINDOW, drain_once(&async_fd, &mut buf)).await {
                Ok(Drained::Closed) => {
                    info!("bluetooth: client {peer} closed the connection");
                    break 'session;
                }
                Ok(Drained::Error) => {
                    info!("bluetooth: client {peer} read error, closing");
                    break 'session;
                }
                Ok(Drained::Data) => false,
                Err(_elapsed) => true,
            };

            while let Some(line) = take_line(&mut buf) {
                if line.is_empty() {
                    continue;
                }
                if last_sent.as_deref() == Some(line.as_str()) {
                    // Transport echo, not a new request — drop it (`spec` §9).
                    continue;
                }
                let response = Self::handle_line(&ctx, &line).await;
                if Self::send_line(&async_fd, &response).await {
                    last_sent = Some(response);
                }
            }

            // Idle flush: only once the 100ms window has actually elapsed
            // with an un-terminated remainder still buffered — a message
            // mid-transmission must not be cut short (`spec` §4.F).
            if window_elapsed && !buf.is_empty() {
                let line = String::from_utf8_lossy(&std::mem::take(&mut buf)).to_string();
                if last_sent.as_deref() != Some(line.as_str()) {
                    let response = Self::handle_line(&ctx, &line).await;
                    if Self::send_line(&async_fd, &response).await {
                        last_sent = Some(response);
                    }
                }
            }
        }
    }

    /// Decode (attempt base64; fall back to raw bytes) and dispatch one line.
    async fn handle_line(ctx: &ProtocolContext, raw_line: &str) -> String {
        let decoded = match B64.decode(raw_line.trim()) {
            Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| raw_line.to_string()),
            Err(_) => raw_line.to_string(),
        };

        if protocol::looks_like_json(&decoded) {
            match serde_json::from_str::<ProvisionRequest>(&decoded) {
                Ok(request) => protocol::handle_json(ctx, &request).await,
                Err(e) => {
                    warn!("bluetooth: malformed JSON envelope: {e}");
                    "{\"Success\":false,\"Message\":\"malformed request\"}".to_string()
                }
            }
        } else {
            protocol::handle_debug_command(&ctx.identity, &decoded)
        }
    }

    /// Write `line\n`, retrying once after 500ms if the first attempt could
    /// not be written (full transport buffer, `spec` §4.F). Returns whether
    /// the send is considered to have gone out (for echo-cancellation).
    async fn send_line(async_fd: &AsyncFd<RfcommSocket>, line: &str) -> bool {
        let mut payload = line.as_bytes().to_vec();
        payload.push(b'\n');
        if write_all_nonblocking(async_fd, &payload).await {
            return true;
        }
        sleep(SEND_RETRY_DELAY).await;
        write_all_nonblocking(async_fd, &payload).await
    }
}

/// Wait for readability, then read whatever is currently queued into `buf`
/// in one non-blocking pass.
async fn drain_once(async_fd: &AsyncFd<RfcommSocket>, buf: &mut Vec<u8>) -> Drained {
    loop {
        let mut guard = match async_fd.readable().await {
            Ok(g) => g,
            Err(_) => return Drained::Error,
        };
        let result = guard.try_io(|inner| {
            let fd = inner.get_ref().as_raw_fd();
            let mut chunk = [0u8; READ_CHUNK];
            let n = unsafe { libc::recv(fd, chunk.as_mut_ptr().cast(), chunk.len(), 0) };
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(chunk[..n as usize].to_vec())
            }
        });
        match result {
            Ok(Ok(bytes)) if bytes.is_empty() => return Drained::Closed,
            Ok(Ok(bytes)) => {
                buf.extend_from_slice(&bytes);
                return Drained::Data;
            }
            Ok(Err(_)) => return Drained::Error,
            Err(_would_block) => continue,
        }
    }
}

async fn write_all_nonblocking(async_fd: &AsyncFd<RfcommSocket>, payload: &[u8]) -> bool {
    let mut written = 0usize;
    while written < payload.len() {
        let Ok(mut guard) = async_fd.writable().await else { return false };
        let result = guard.try_io(|inner| {
            let fd = inner.get_ref().as_raw_fd();
            let n = unsafe {
                libc::send(fd, payload[written..].as_ptr().cast(), payload.len() - written, 0)
            };
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        });
        match result {
            Ok(Ok(n)) => written += n,
            Ok(Err(_)) => return false,
            Err(_would_block) => continue,
        }
    }
    true
}

/// Pop one line (up to and including `\n` or `\r\n`) off the front of `buf`,
/// if a terminator is present.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut line_bytes: Vec<u8> = buf.drain(..=pos).collect();
    if line_bytes.last() == Some(&b'\n') {
        line_bytes.pop();
    }
    if line_bytes.last() == Some(&b'\r') {
        line_bytes.pop();
    }
    Some(String::from_utf8_lossy(&line_bytes).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_lf_terminated_line() {
        let mut buf = b"PING\nrest".to_vec();
        assert_eq!(take_line(&mut buf), Some("PING".to_string()));
        assert_eq!(buf, b"rest");
    }

    #[test]
    fn takes_crlf_terminated_line() {
        let mut buf = b"PING\r\nrest".to_vec();
        assert_eq!(take_line(&mut buf), Some("PING".to_string()));
        assert_eq!(buf, b"rest");
    }

    #[test]
    fn no_terminator_yields_none() {
        let mut buf = b"partial".to_vec();
        assert_eq!(take_line(&mut buf), None);
        assert_eq!(buf, b"partial");
    }

    #[test]
    fn base64_decode_attempt_falls_back_to_raw() {
        let raw = "PING";
        let decoded = B64
            .decode(raw)
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .unwrap_or_else(|| raw.to_string());
        assert_eq!(decoded, "PING");
    }

    #[test]
    fn base64_decode_attempt_decodes_wrapped_payload() {
        let wrapped = B64.encode("PING");
        let decoded = B64
            .decode(&wrapped)
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .unwrap_or_else(|| wrapped.clone());
        assert_eq!(decoded, "PING");
    }
}
