// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing types.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;

use super::UnitId;

/// A transaction identifier correlating a response with its request.
pub(crate) type TransactionId = u16;

/// The fixed fields of the MBAP header.
///
/// The length field is derived from the PDU while encoding and is
/// validated while decoding, so it is not carried around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) transaction_id: TransactionId,
    pub(crate) unit_id: UnitId,
}

/// A request application data unit as read off a server connection.
///
/// The PDU is kept as raw bytes so that the dispatcher can answer
/// malformed bodies with the proper exception instead of dropping the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: Bytes,
}

/// A response application data unit with an already encoded PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: Bytes,
}

/// Generates transaction identifiers.
///
/// A 32 bit counter truncated to 16 bit on emission; the first value is
/// 1 and wrapping is benign because at most one request is in flight per
/// connection.
#[derive(Debug, Default)]
pub(crate) struct TransactionIdGenerator {
    counter: AtomicU32,
}

impl TransactionIdGenerator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next(&self) -> TransactionId {
        self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1) as TransactionId
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_monotonic() {
        let generator = TransactionIdGenerator::new();
        assert_eq!(generator.next(), 1);
        assert_eq!(generator.next(), 2);
        assert_eq!(generator.next(), 3);
    }

    #[test]
    fn transaction_ids_wrap() {
        let generator = TransactionIdGenerator::new();
        let mut last = generator.next();
        for _ in 0..0x1_0002 {
            let next = generator.next();
            assert_ne!(next, last);
            last = next;
        }
    }
}
