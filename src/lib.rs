// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A pure [Rust](https://www.rust-lang.org)
//! [Modbus](https://en.wikipedia.org/wiki/Modbus) TCP stack
//! based on [tokio](https://tokio.rs).
//!
//! Modbus is based on a [master/slave](https://en.wikipedia.org/wiki/Master/slave_(technology))
//! model. To avoid confusions with the tokio terminology the master is
//! called *client* and the slave is called *server* in this library.
//!
//! ## Features
//!
//! - pure Rust library
//! - async (non-blocking)
//! - Modbus TCP client with automatic reconnection and embedded metrics
//! - Modbus TCP server with a pluggable data-model handler
//! - connection pool with health checks and idle eviction
//! - Open Source (MIT/Apache-2.0)
//!
//! # Examples
//!
//! ## TCP client
//!
//! ```rust,no_run
//! use modbus_stack::{Client, ClientOptions};
//!
//! #[tokio::main]
//! async fn main() -> modbus_stack::Result<()> {
//!     let client = Client::new("192.168.0.222:502", ClientOptions::default())?;
//!     client.connect().await?;
//!
//!     let data = client.read_input_registers(0x1000, 7).await?;
//!     println!("Response is '{data:?}'");
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## TCP server
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use modbus_stack::server::{MemoryHandler, Server, ServerOptions};
//!
//! #[tokio::main]
//! async fn main() -> modbus_stack::Result<()> {
//!     let handler = Arc::new(MemoryHandler::new());
//!     handler.set_holding_register(1, 0x1000, 42);
//!
//!     let server = Server::new(handler, ServerOptions::default());
//!     server.listen_and_serve("0.0.0.0:502").await
//! }
//! ```
//!
//! ## Connection pool
//!
//! ```rust,no_run
//! use modbus_stack::pool::{Pool, PoolOptions};
//!
//! #[tokio::main]
//! async fn main() -> modbus_stack::Result<()> {
//!     let pool = Pool::new("192.168.0.222:502", PoolOptions::new().size(4))?;
//!
//!     let client = pool.get().await?;
//!     let data = client.read_holding_registers(0, 10).await?;
//!     println!("Response is '{data:?}'");
//!     client.close(); // returns the session to the pool
//!
//!     pool.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Protocol-Specification
//!
//! - [MODBUS Application Protocol Specification v1.1b3 (PDF)](http://modbus.org/docs/Modbus_Application_Protocol_V1_1b3.pdf)
//! - [MODBUS Messaging on TCP/IP Implementation Guide v1.0b (PDF)](http://modbus.org/docs/Modbus_Messaging_Implementation_Guide_V1_0b.pdf)

pub mod prelude;

pub mod client;
pub mod pool;
pub mod server;

pub mod error;
pub mod metrics;

mod codec;
mod frame;

pub use crate::{
    client::{Client, ClientOptions, ConnectionState, DEFAULT_PORT, DEFAULT_TIMEOUT},
    error::{Error, Result},
    frame::{
        diag, Address, Exception, ExceptionResponse, FunctionCode, Quantity, Request, Response,
        UnitId, MAX_QUANTITY_COILS, MAX_QUANTITY_READ_REGISTERS, MAX_QUANTITY_WRITE_REGISTERS,
        MAX_SERVER_ID_LEN,
    },
};
