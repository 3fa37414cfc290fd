// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client retry and reconnect behavior across a server restart.

mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::net::TcpListener;

use modbus_stack::{
    server::{MemoryHandler, Server, ServerOptions},
    Client, ClientOptions,
};

use crate::common::spawn_memory_server;

#[tokio::test]
async fn request_succeeds_after_server_restart() {
    let handler = Arc::new(MemoryHandler::new());
    handler.set_holding_register(1, 0, 77);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(handler.clone(), ServerOptions::default());
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let client = Client::new(
        addr.to_string(),
        ClientOptions::new()
            .auto_reconnect(true)
            .max_retries(3)
            .reconnect_backoff(Duration::from_millis(100))
            .timeout(Duration::from_secs(10)),
    )
    .unwrap();
    client.connect().await.unwrap();
    assert_eq!(client.read_holding_registers(0, 1).await.unwrap(), [77]);

    // Restart the peer on the same address.
    server.close().await;
    let restarted = tokio::spawn({
        let handler = handler.clone();
        async move {
            loop {
                match TcpListener::bind(addr).await {
                    Ok(listener) => {
                        let server = Server::new(handler, ServerOptions::default());
                        let serving = server.clone();
                        tokio::spawn(async move { serving.serve(listener).await.unwrap() });
                        break server;
                    }
                    Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
                }
            }
        }
    });

    // The first attempt fails against the dead peer, the reconnect loop
    // dials until the restarted server accepts, and the retry succeeds.
    assert_eq!(client.read_holding_registers(0, 1).await.unwrap(), [77]);
    assert!(client.metrics().collect().reconnections >= 1);

    let server = restarted.await.unwrap();
    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn exceptions_are_not_retried() {
    let (_, server, addr) = spawn_memory_server().await;

    let client = Client::new(
        addr.to_string(),
        ClientOptions::new().auto_reconnect(true).max_retries(3),
    )
    .unwrap();
    client.connect().await.unwrap();

    // An unsupported diagnostics sub-function is answered with an
    // exception, which must surface after a single attempt.
    let err = client.diagnostics(0x0001, &[]).await.unwrap_err();
    assert!(err.is_illegal_function());
    assert_eq!(client.metrics().collect().requests_total, 1);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn callbacks_fire_on_connect_and_disconnect() {
    let (_, server, addr) = spawn_memory_server().await;

    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let client = Client::new(addr.to_string(), {
        let connects = connects.clone();
        let disconnects = disconnects.clone();
        ClientOptions::new()
            .timeout(Duration::from_millis(500))
            .on_connect(move || {
                connects.fetch_add(1, Ordering::SeqCst);
            })
            .on_disconnect(move |_| {
                disconnects.fetch_add(1, Ordering::SeqCst);
            })
    })
    .unwrap();

    client.connect().await.unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    // Connect is idempotent while connected.
    client.connect().await.unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    client.read_coils(0, 1).await.unwrap();

    // Take the server down; the next request observes the disconnect.
    server.close().await;
    assert!(client.read_coils(0, 1).await.is_err());
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(client.metrics().collect().active_conns, 0);

    client.close().await;
}

#[tokio::test]
async fn single_attempt_without_auto_reconnect() {
    let (_, server, addr) = spawn_memory_server().await;

    let client = Client::new(addr.to_string(), ClientOptions::default()).unwrap();
    client.connect().await.unwrap();
    client.read_coils(0, 1).await.unwrap();

    server.close().await;
    // Without auto-reconnect the transport failure surfaces directly
    // and no reconnection is attempted.
    assert!(client.read_coils(0, 1).await.is_err());
    let snapshot = client.metrics().collect();
    assert_eq!(snapshot.reconnections, 0);

    client.close().await;
}
