// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP client transport.

use std::time::Duration;

use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpStream,
    sync::Mutex,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    codec::tcp::{HEADER_LEN, MAX_PDU_LEN},
    error::{Error, Result},
};

/// TCP keepalive period on client and server connections.
pub(crate) const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

/// Enables keepalive and disables Nagle's algorithm.
pub(crate) fn configure_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let sock = socket2::SockRef::from(stream);
    sock.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(KEEPALIVE_PERIOD))?;
    Ok(())
}

/// A single TCP connection with strict request/response semantics.
///
/// The socket is owned exclusively by the transport. An exclusive lock
/// is held for the duration of each transaction so that at most one
/// request is in flight at any time. The transport does not interpret
/// PDUs and does not retry.
#[derive(Debug)]
pub(crate) struct TcpTransport {
    addr: String,
    timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpTransport {
    pub(crate) fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            stream: Mutex::new(None),
        }
    }

    /// Dials the remote endpoint.
    ///
    /// A no-op while a connection is already held, so concurrent
    /// connects after success are harmless.
    pub(crate) async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        let mut guard = self.stream.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let stream = tokio::select! {
            () = cancel.cancelled() => return Err(Error::ConnectionClosed),
            res = timeout(self.timeout, TcpStream::connect(&self.addr)) => match res {
                Ok(Ok(stream)) => stream,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(Error::Timeout),
            },
        };
        configure_stream(&stream)?;

        *guard = Some(stream);
        debug!(addr = %self.addr, "transport connected");
        Ok(())
    }

    /// Performs one send-then-receive-one-frame transaction.
    ///
    /// Any I/O error, timeout, or cancellation closes the underlying
    /// socket before the error is returned.
    pub(crate) async fn send(&self, frame: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(Error::NotConnected)?;

        let result = tokio::select! {
            () = cancel.cancelled() => Err(Error::ConnectionClosed),
            res = timeout(self.timeout, transact(stream, frame)) => match res {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout),
            },
        };

        if result.is_err() {
            *guard = None;
        }
        result
    }

    /// Closes the connection. Idempotent.
    pub(crate) async fn close(&self) {
        let mut guard = self.stream.lock().await;
        *guard = None;
    }
}

/// Writes the request frame and reads exactly one response frame.
async fn transact(stream: &mut TcpStream, frame: &[u8]) -> Result<Vec<u8>> {
    stream.write_all(frame).await?;

    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;

    let protocol_id = u16::from_be_bytes([header[2], header[3]]);
    if protocol_id != 0 {
        return Err(Error::InvalidFrame(format!(
            "invalid protocol identifier: {protocol_id}"
        )));
    }
    let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
    if length < 2 || length - 1 > MAX_PDU_LEN {
        return Err(Error::InvalidFrame(format!(
            "invalid length field: {length}"
        )));
    }

    let mut response = vec![0u8; HEADER_LEN + length - 1];
    response[..HEADER_LEN].copy_from_slice(&header);
    stream.read_exact(&mut response[HEADER_LEN..]).await?;
    Ok(response)
}
