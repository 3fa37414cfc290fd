// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared plumbing for the TCP integration tests.

#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Once},
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpListener, TcpStream},
};

use modbus_stack::server::{Handler, MemoryHandler, Server, ServerOptions};

static TRACING: Once = Once::new();

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Binds an ephemeral listener and serves the handler on it.
pub async fn spawn_server(handler: Arc<dyn Handler>, options: ServerOptions) -> (Server, SocketAddr) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(handler, options);
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await.unwrap() });
    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(20)).await;
    (server, addr)
}

/// Spawns a server backed by a fresh in-memory handler.
pub async fn spawn_memory_server() -> (Arc<MemoryHandler>, Server, SocketAddr) {
    let handler = Arc::new(MemoryHandler::new());
    let (server, addr) = spawn_server(handler.clone(), ServerOptions::default()).await;
    (handler, server, addr)
}

/// Sends a raw MBAP frame and reads back exactly one response frame,
/// returning the response PDU.
pub async fn raw_request(addr: SocketAddr, tx_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut frame = Vec::with_capacity(7 + pdu.len());
    frame.extend_from_slice(&tx_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    stream.write_all(&frame).await.unwrap();

    let mut header = [0u8; 7];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(u16::from_be_bytes([header[0], header[1]]), tx_id);
    assert_eq!(u16::from_be_bytes([header[2], header[3]]), 0);
    assert_eq!(header[6], unit_id);

    let len = usize::from(u16::from_be_bytes([header[4], header[5]]));
    let mut rsp = vec![0u8; len - 1];
    stream.read_exact(&mut rsp).await.unwrap();
    rsp
}
