// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types and traits

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
pub use crate::{client, pool, server};

///////////////////////////////////////////////////////////////////
/// Types
///////////////////////////////////////////////////////////////////
pub use crate::{
    Client, ClientOptions, ConnectionState, Error, Exception, ExceptionResponse, FunctionCode,
    Request, Response, Result, UnitId,
};

pub use crate::pool::{Pool, PoolOptions, PooledClient};
pub use crate::server::{MemoryHandler, Server, ServerOptions};

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::server::Handler;
