// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::io;

use thiserror::Error;

use crate::frame::{Exception, ExceptionResponse};

/// Specialized [`Result`](std::result::Result) type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for all client, server, and pool operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration supplied at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An operation was attempted while the client is disconnected.
    #[error("not connected")]
    NotConnected,

    /// The client or its connection has been closed permanently.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error on the underlying TCP transport.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A malformed MBAP frame was received.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The response does not match the request or is malformed.
    ///
    /// This covers transaction ID, unit ID, and function code mismatches
    /// as well as inconsistent byte counts in the response body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The server answered with a _Modbus_ exception response.
    #[error(transparent)]
    Exception(#[from] ExceptionResponse),

    /// The requested quantity is outside the protocol bounds.
    ///
    /// Raised before any I/O takes place.
    #[error("invalid quantity {quantity} (expected 1..={max})")]
    InvalidQuantity { quantity: u16, max: u16 },

    /// The address range wraps beyond the 16 bit address space.
    ///
    /// Raised before any I/O takes place.
    #[error("address range {address}+{quantity} exceeds 65536")]
    InvalidAddress { address: u16, quantity: u16 },

    /// The per-request deadline expired or the operation was cancelled.
    #[error("request timed out")]
    Timeout,

    /// An auto-reconnecting client used up all attempts.
    ///
    /// Wraps the error of the last attempt.
    #[error("max retries exceeded: {0}")]
    RetriesExhausted(#[source] Box<Error>),

    /// The connection pool has been closed.
    #[error("connection pool closed")]
    PoolClosed,
}

impl Error {
    /// Returns the exception code if the error is a _Modbus_ exception
    /// response.
    #[must_use]
    pub fn exception(&self) -> Option<Exception> {
        match self {
            Self::Exception(rsp) => Some(rsp.exception),
            _ => None,
        }
    }

    /// Checks if the error is an exception response with the given code,
    /// regardless of the originating function code.
    #[must_use]
    pub fn is_exception(&self, code: Exception) -> bool {
        self.exception() == Some(code)
    }

    /// Checks if the error is an `IllegalFunction` exception.
    #[must_use]
    pub fn is_illegal_function(&self) -> bool {
        self.is_exception(Exception::IllegalFunction)
    }

    /// Checks if the error is an `IllegalDataAddress` exception.
    #[must_use]
    pub fn is_illegal_data_address(&self) -> bool {
        self.is_exception(Exception::IllegalDataAddress)
    }

    /// Checks if the error is an `IllegalDataValue` exception.
    #[must_use]
    pub fn is_illegal_data_value(&self) -> bool {
        self.is_exception(Exception::IllegalDataValue)
    }

    /// Checks if the error is a `ServerDeviceFailure` exception.
    #[must_use]
    pub fn is_server_device_failure(&self) -> bool {
        self.is_exception(Exception::ServerDeviceFailure)
    }

    /// Whether a failed request may be repeated on a fresh connection.
    ///
    /// Exception responses are answers, not transport failures, and are
    /// never retried. Deadlines and closed connections surface
    /// immediately.
    pub(crate) fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Config(_)
                | Self::ConnectionClosed
                | Self::Exception(_)
                | Self::InvalidQuantity { .. }
                | Self::InvalidAddress { .. }
                | Self::Timeout
                | Self::RetriesExhausted(_)
                | Self::PoolClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::frame::FunctionCode;

    #[test]
    fn exception_code_matching_ignores_function_code() {
        let err: Error = ExceptionResponse::new(
            FunctionCode::ReadHoldingRegisters,
            Exception::IllegalDataAddress,
        )
        .into();
        assert!(err.is_illegal_data_address());
        assert!(!err.is_illegal_data_value());

        let other: Error = ExceptionResponse {
            function: 0x05,
            exception: Exception::IllegalDataAddress,
        }
        .into();
        assert_eq!(err.exception(), other.exception());
    }

    #[test]
    fn retryability_classification() {
        assert!(Error::NotConnected.is_retryable());
        assert!(Error::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "reset")).is_retryable());
        assert!(Error::InvalidResponse("transaction ID mismatch".into()).is_retryable());
        assert!(Error::InvalidFrame("bad length".into()).is_retryable());

        assert!(!Error::Timeout.is_retryable());
        assert!(!Error::ConnectionClosed.is_retryable());
        assert!(!Error::InvalidQuantity {
            quantity: 0,
            max: 2000
        }
        .is_retryable());
        let exception: Error = ExceptionResponse {
            function: 0x03,
            exception: Exception::ServerDeviceBusy,
        }
        .into();
        assert!(!exception.is_retryable());
    }
}
