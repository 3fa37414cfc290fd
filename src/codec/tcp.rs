// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP frame codec.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, Result},
    frame::tcp::{Header, RequestAdu, ResponseAdu},
};

/// Size of the MBAP header in bytes.
pub(crate) const HEADER_LEN: usize = 7;

/// Maximum length of a PDU in bytes.
pub(crate) const MAX_PDU_LEN: usize = 253;

/// The protocol identifier is always 0 for Modbus TCP.
const PROTOCOL_ID: u16 = 0x0000;

/// Encodes a complete frame from a header and an already encoded PDU.
///
/// The length field is derived from the PDU length.
pub(crate) fn encode_frame(hdr: Header, pdu: &[u8]) -> Bytes {
    debug_assert!(!pdu.is_empty() && pdu.len() <= MAX_PDU_LEN);
    let mut buf = BytesMut::with_capacity(HEADER_LEN + pdu.len());
    put_frame(hdr, pdu, &mut buf);
    buf.freeze()
}

fn put_frame(hdr: Header, pdu: &[u8], buf: &mut BytesMut) {
    buf.reserve(HEADER_LEN + pdu.len());
    buf.put_u16(hdr.transaction_id);
    buf.put_u16(PROTOCOL_ID);
    buf.put_u16((pdu.len() + 1) as u16);
    buf.put_u8(hdr.unit_id);
    buf.put_slice(pdu);
}

/// Decodes a complete frame from a byte buffer.
pub(crate) fn decode_frame(buf: &[u8]) -> Result<(Header, Bytes)> {
    if buf.len() < HEADER_LEN {
        return Err(Error::InvalidFrame(format!(
            "frame too short: {} bytes",
            buf.len()
        )));
    }

    let protocol_id = BigEndian::read_u16(&buf[2..4]);
    if protocol_id != PROTOCOL_ID {
        return Err(Error::InvalidFrame(format!(
            "invalid protocol identifier: {protocol_id}"
        )));
    }

    let len = usize::from(BigEndian::read_u16(&buf[4..6]));
    if len < 2 || len - 1 > MAX_PDU_LEN {
        return Err(Error::InvalidFrame(format!("invalid length field: {len}")));
    }
    let pdu_len = len - 1;
    if buf.len() < HEADER_LEN + pdu_len {
        return Err(Error::InvalidFrame("truncated frame".into()));
    }

    let header = Header {
        transaction_id: BigEndian::read_u16(&buf[0..2]),
        unit_id: buf[6],
    };
    let pdu = Bytes::copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + pdu_len]);
    Ok((header, pdu))
}

/// Frame codec for the server side of a connection.
///
/// Decodes request ADUs with the PDU left as raw bytes and encodes
/// already serialized response ADUs.
#[derive(Debug, Default)]
pub(crate) struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = usize::from(BigEndian::read_u16(&buf[4..6]));
        if len < 2 || len - 1 > MAX_PDU_LEN {
            return Err(Error::InvalidFrame(format!("invalid length field: {len}")));
        }
        let pdu_len = len - 1;
        if buf.len() < HEADER_LEN + pdu_len {
            return Ok(None);
        }

        let header_data = buf.split_to(HEADER_LEN);

        let protocol_id = BigEndian::read_u16(&header_data[2..4]);
        if protocol_id != PROTOCOL_ID {
            return Err(Error::InvalidFrame(format!(
                "invalid protocol identifier: {protocol_id}"
            )));
        }

        let hdr = Header {
            transaction_id: BigEndian::read_u16(&header_data[0..2]),
            unit_id: header_data[6],
        };
        let pdu = buf.split_to(pdu_len).freeze();

        Ok(Some(RequestAdu { hdr, pdu }))
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        put_frame(hdr, &pdu, buf);
        Ok(())
    }
}
