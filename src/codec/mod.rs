// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PDU encoding and decoding.
//!
//! Pure byte transformations without any I/O. Requests are validated
//! against the protocol bounds before they are turned into bytes, so
//! out-of-range quantities and overflowing address ranges never reach
//! the wire.

pub(crate) mod tcp;

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt as _};
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    error::{Error, Result},
    frame::*,
};

#[allow(clippy::cast_possible_truncation)]
fn u16_len(len: usize) -> u16 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u16::MAX.into());
    len as u16
}

#[allow(clippy::cast_possible_truncation)]
fn u8_len(len: usize) -> u8 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u8::MAX.into());
    len as u8
}

pub(crate) fn bool_to_coil(state: bool) -> u16 {
    if state {
        COIL_ON
    } else {
        COIL_OFF
    }
}

pub(crate) fn pack_coils(coils: &[Coil]) -> Vec<u8> {
    let packed_size = coils.len() / 8 + usize::from(coils.len() % 8 > 0);
    let mut res = vec![0; packed_size];
    for (i, b) in coils.iter().enumerate() {
        let v = u8::from(*b);
        res[i / 8] |= v << (i % 8);
    }
    res
}

pub(crate) fn unpack_coils(bytes: &[u8], count: u16) -> Vec<Coil> {
    let mut res = Vec::with_capacity(count.into());
    for i in 0..count.into() {
        res.push((bytes[i / 8] >> (i % 8)) & 0b1 > 0);
    }
    res
}

fn check_quantity(address: Address, quantity: Quantity, max: Quantity) -> Result<()> {
    if quantity < 1 || quantity > max {
        return Err(Error::InvalidQuantity { quantity, max });
    }
    if u32::from(address) + u32::from(quantity) > 65536 {
        return Err(Error::InvalidAddress { address, quantity });
    }
    Ok(())
}

/// Validates the protocol bounds of a request.
///
/// Performed before encoding so that invalid input is rejected without
/// any I/O.
fn validate_request(req: &Request<'_>) -> Result<()> {
    use Request::*;

    match *req {
        ReadCoils(address, quantity) | ReadDiscreteInputs(address, quantity) => {
            check_quantity(address, quantity, MAX_QUANTITY_COILS)
        }
        ReadHoldingRegisters(address, quantity) | ReadInputRegisters(address, quantity) => {
            check_quantity(address, quantity, MAX_QUANTITY_READ_REGISTERS)
        }
        WriteMultipleCoils(address, ref coils) => {
            let quantity = u16::try_from(coils.len()).unwrap_or(u16::MAX);
            check_quantity(address, quantity, MAX_QUANTITY_COILS)
        }
        WriteMultipleRegisters(address, ref words) => {
            let quantity = u16::try_from(words.len()).unwrap_or(u16::MAX);
            check_quantity(address, quantity, MAX_QUANTITY_WRITE_REGISTERS)
        }
        Diagnostics(_, ref data) => {
            // The sub-function and data must fit into a single PDU.
            let max = u16_len(tcp::MAX_PDU_LEN - 3);
            if data.len() > usize::from(max) {
                return Err(Error::InvalidQuantity {
                    quantity: u16::try_from(data.len()).unwrap_or(u16::MAX),
                    max,
                });
            }
            Ok(())
        }
        WriteSingleCoil(_, _)
        | WriteSingleRegister(_, _)
        | ReadExceptionStatus
        | GetCommEventCounter
        | ReportServerId => Ok(()),
    }
}

fn request_pdu_len(req: &Request<'_>) -> usize {
    use Request::*;

    match *req {
        ReadCoils(_, _)
        | ReadDiscreteInputs(_, _)
        | ReadHoldingRegisters(_, _)
        | ReadInputRegisters(_, _)
        | WriteSingleCoil(_, _)
        | WriteSingleRegister(_, _) => 5,
        ReadExceptionStatus | GetCommEventCounter | ReportServerId => 1,
        Diagnostics(_, ref data) => 3 + data.len(),
        WriteMultipleCoils(_, ref coils) => 6 + (coils.len() + 7) / 8,
        WriteMultipleRegisters(_, ref words) => 6 + words.len() * 2,
    }
}

impl<'a> TryFrom<Request<'a>> for Bytes {
    type Error = Error;

    fn try_from(req: Request<'a>) -> Result<Bytes> {
        use Request::*;

        validate_request(&req)?;
        let mut data = BytesMut::with_capacity(request_pdu_len(&req));
        data.put_u8(req.function_code().value());
        match req {
            ReadCoils(address, quantity)
            | ReadDiscreteInputs(address, quantity)
            | ReadHoldingRegisters(address, quantity)
            | ReadInputRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            ReadExceptionStatus | GetCommEventCounter | ReportServerId => {}
            Diagnostics(sub_function, bytes) => {
                data.put_u16(sub_function);
                data.put_slice(&bytes);
            }
            WriteMultipleCoils(address, coils) => {
                data.put_u16(address);
                data.put_u16(u16_len(coils.len()));
                let packed_coils = pack_coils(&coils);
                data.put_u8(u8_len(packed_coils.len()));
                for b in packed_coils {
                    data.put_u8(b);
                }
            }
            WriteMultipleRegisters(address, words) => {
                data.put_u16(address);
                data.put_u16(u16_len(words.len()));
                data.put_u8(u8_len(words.len() * 2));
                for w in &*words {
                    data.put_u16(*w);
                }
            }
        }
        Ok(data.freeze())
    }
}

impl From<Response> for Bytes {
    fn from(rsp: Response) -> Bytes {
        use Response::*;

        let mut data = BytesMut::new();
        data.put_u8(rsp.function_code().value());
        match rsp {
            ReadCoils(coils) | ReadDiscreteInputs(coils) => {
                let packed_coils = pack_coils(&coils);
                data.put_u8(u8_len(packed_coils.len()));
                for b in packed_coils {
                    data.put_u8(b);
                }
            }
            ReadHoldingRegisters(registers) | ReadInputRegisters(registers) => {
                data.put_u8(u8_len(registers.len() * 2));
                for r in registers {
                    data.put_u16(r);
                }
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            ReadExceptionStatus(status) => {
                data.put_u8(status);
            }
            Diagnostics(sub_function, bytes) => {
                data.put_u16(sub_function);
                data.put_slice(&bytes);
            }
            GetCommEventCounter(status, event_count) => {
                data.put_u16(status);
                data.put_u16(event_count);
            }
            WriteMultipleCoils(address, quantity) | WriteMultipleRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            ReportServerId(bytes) => {
                debug_assert!(bytes.len() <= MAX_SERVER_ID_LEN);
                data.put_u8(u8_len(bytes.len()));
                data.put_slice(&bytes);
            }
        }
        data.freeze()
    }
}

impl From<ExceptionResponse> for Bytes {
    fn from(ex: ExceptionResponse) -> Bytes {
        let mut data = BytesMut::with_capacity(2);
        debug_assert!(ex.function < 0x80);
        data.put_u8(ex.function | 0x80);
        data.put_u8(ex.exception.into());
        data.freeze()
    }
}

impl From<ResponsePdu> for Bytes {
    fn from(pdu: ResponsePdu) -> Bytes {
        pdu.0.map_or_else(Into::into, Into::into)
    }
}

fn short_response() -> Error {
    Error::InvalidResponse("response too short".into())
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        use crate::frame::Response::*;

        let mut rdr = Cursor::new(&bytes);
        let fn_code = rdr.read_u8().map_err(|_| short_response())?;

        // An exception response sets the high bit of the function code
        // and must be recognized before any function-specific parsing.
        if fn_code & 0x80 != 0 {
            let exception = rdr.read_u8().map_err(|_| short_response())?;
            return Ok(ExceptionResponse {
                function: fn_code & 0x7F,
                exception: exception.into(),
            }
            .into());
        }

        let rsp = match fn_code {
            0x01 | 0x02 => {
                let byte_count = rdr.read_u8().map_err(|_| short_response())?;
                if bytes.len() < 2 + usize::from(byte_count) {
                    return Err(short_response());
                }
                let packed = &bytes[2..2 + usize::from(byte_count)];
                let coils = unpack_coils(packed, u16::from(byte_count) * 8);
                if fn_code == 0x01 {
                    ReadCoils(coils)
                } else {
                    ReadDiscreteInputs(coils)
                }
            }
            0x03 | 0x04 => {
                let byte_count = rdr.read_u8().map_err(|_| short_response())?;
                if byte_count % 2 != 0 {
                    return Err(Error::InvalidResponse(format!(
                        "odd byte count: {byte_count}"
                    )));
                }
                if bytes.len() < 2 + usize::from(byte_count) {
                    return Err(short_response());
                }
                let quantity = usize::from(byte_count) / 2;
                let mut registers = Vec::with_capacity(quantity);
                for _ in 0..quantity {
                    registers.push(
                        rdr.read_u16::<BigEndian>()
                            .map_err(|_| short_response())?,
                    );
                }
                if fn_code == 0x03 {
                    ReadHoldingRegisters(registers)
                } else {
                    ReadInputRegisters(registers)
                }
            }
            0x05 => {
                let address = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_| short_response())?;
                let value = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_| short_response())?;
                let state = match value {
                    COIL_ON => true,
                    COIL_OFF => false,
                    _ => {
                        return Err(Error::InvalidResponse(format!(
                            "invalid coil value: 0x{value:04X}"
                        )))
                    }
                };
                WriteSingleCoil(address, state)
            }
            0x06 => {
                let address = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_| short_response())?;
                let word = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_| short_response())?;
                WriteSingleRegister(address, word)
            }
            0x07 => {
                let status = rdr.read_u8().map_err(|_| short_response())?;
                ReadExceptionStatus(status)
            }
            0x08 => {
                let sub_function = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_| short_response())?;
                Diagnostics(sub_function, bytes.slice(3..))
            }
            0x0B => {
                let status = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_| short_response())?;
                let event_count = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_| short_response())?;
                GetCommEventCounter(status, event_count)
            }
            0x0F | 0x10 => {
                let address = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_| short_response())?;
                let quantity = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_| short_response())?;
                if fn_code == 0x0F {
                    WriteMultipleCoils(address, quantity)
                } else {
                    WriteMultipleRegisters(address, quantity)
                }
            }
            0x11 => {
                let byte_count = rdr.read_u8().map_err(|_| short_response())?;
                if bytes.len() < 2 + usize::from(byte_count) {
                    return Err(short_response());
                }
                ReportServerId(bytes.slice(2..2 + usize::from(byte_count)))
            }
            fn_code => {
                return Err(Error::InvalidResponse(format!(
                    "unknown function code: 0x{fn_code:02X}"
                )))
            }
        };
        Ok(rsp.into())
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    #[test]
    fn convert_bool_to_coil() {
        assert_eq!(bool_to_coil(true), 0xFF00);
        assert_eq!(bool_to_coil(false), 0x0000);
    }

    #[test]
    fn convert_booleans_to_bytes() {
        assert_eq!(pack_coils(&[]), &[]);
        assert_eq!(pack_coils(&[true]), &[0b_1]);
        assert_eq!(pack_coils(&[false]), &[0b_0]);
        assert_eq!(pack_coils(&[true, false]), &[0b_01]);
        assert_eq!(pack_coils(&[false, true]), &[0b_10]);
        assert_eq!(pack_coils(&[true, true]), &[0b_11]);
        assert_eq!(pack_coils(&[true; 8]), &[0b_1111_1111]);
        assert_eq!(pack_coils(&[true; 9]), &[255, 1]);
        assert_eq!(pack_coils(&[false; 8]), &[0]);
        assert_eq!(pack_coils(&[false; 9]), &[0, 0]);
    }

    #[test]
    fn pack_unpack_round_trip() {
        let bits = [
            true, false, true, false, false, false, true, true, //
            false, true, false,
        ];
        let packed = pack_coils(&bits);
        assert_eq!(unpack_coils(&packed, u16_len(bits.len())), bits);
    }

    #[test]
    fn encode_read_coils_request() {
        let pdu: Bytes = Request::ReadCoils(0x0000, 8).try_into().unwrap();
        assert_eq!(&pdu[..], &[0x01, 0x00, 0x00, 0x00, 0x08]);
    }

    #[test]
    fn encode_read_holding_registers_request() {
        let pdu: Bytes = Request::ReadHoldingRegisters(0x0000, 3).try_into().unwrap();
        assert_eq!(&pdu[..], &[0x03, 0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn encode_write_single_coil_request() {
        let pdu: Bytes = Request::WriteSingleCoil(0x0005, true).try_into().unwrap();
        assert_eq!(&pdu[..], &[0x05, 0x00, 0x05, 0xFF, 0x00]);

        let pdu: Bytes = Request::WriteSingleCoil(0x0005, false).try_into().unwrap();
        assert_eq!(&pdu[..], &[0x05, 0x00, 0x05, 0x00, 0x00]);
    }

    #[test]
    fn encode_write_multiple_coils_request() {
        let coils = [true, false, true, true];
        let pdu: Bytes = Request::WriteMultipleCoils(0x0010, Cow::Borrowed(&coils))
            .try_into()
            .unwrap();
        assert_eq!(&pdu[..], &[0x0F, 0x00, 0x10, 0x00, 0x04, 0x01, 0b_1101]);
    }

    #[test]
    fn encode_write_multiple_registers_request() {
        let words = [0x1234, 0xABCD];
        let pdu: Bytes = Request::WriteMultipleRegisters(0x0002, Cow::Borrowed(&words))
            .try_into()
            .unwrap();
        assert_eq!(
            &pdu[..],
            &[0x10, 0x00, 0x02, 0x00, 0x02, 0x04, 0x12, 0x34, 0xAB, 0xCD]
        );
    }

    #[test]
    fn encode_one_byte_requests() {
        let pdu: Bytes = Request::ReadExceptionStatus.try_into().unwrap();
        assert_eq!(&pdu[..], &[0x07]);
        let pdu: Bytes = Request::GetCommEventCounter.try_into().unwrap();
        assert_eq!(&pdu[..], &[0x0B]);
        let pdu: Bytes = Request::ReportServerId.try_into().unwrap();
        assert_eq!(&pdu[..], &[0x11]);
    }

    #[test]
    fn encode_diagnostics_request() {
        let pdu: Bytes = Request::Diagnostics(0x0000, Cow::Borrowed(&[0xA5, 0x37][..]))
            .try_into()
            .unwrap();
        assert_eq!(&pdu[..], &[0x08, 0x00, 0x00, 0xA5, 0x37]);
    }

    #[test]
    fn reject_invalid_quantities() {
        assert!(matches!(
            Bytes::try_from(Request::ReadCoils(0, 0)),
            Err(Error::InvalidQuantity {
                quantity: 0,
                max: 2000
            })
        ));
        assert!(matches!(
            Bytes::try_from(Request::ReadCoils(0, 2001)),
            Err(Error::InvalidQuantity { .. })
        ));
        assert!(matches!(
            Bytes::try_from(Request::ReadHoldingRegisters(0, 126)),
            Err(Error::InvalidQuantity { .. })
        ));
        let words = vec![0u16; 124];
        assert!(matches!(
            Bytes::try_from(Request::WriteMultipleRegisters(0, Cow::Owned(words))),
            Err(Error::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn reject_address_overflow() {
        assert!(matches!(
            Bytes::try_from(Request::ReadHoldingRegisters(65535, 2)),
            Err(Error::InvalidAddress {
                address: 65535,
                quantity: 2
            })
        ));
        assert!(Bytes::try_from(Request::ReadHoldingRegisters(65535, 1)).is_ok());
    }

    #[test]
    fn decode_read_coils_response() {
        let pdu = Bytes::from_static(&[0x01, 0x01, 0x05]);
        let ResponsePdu(rsp) = pdu.try_into().unwrap();
        let Response::ReadCoils(coils) = rsp.unwrap() else {
            panic!("unexpected response");
        };
        assert_eq!(
            coils,
            [true, false, true, false, false, false, false, false]
        );
    }

    #[test]
    fn decode_read_holding_registers_response() {
        let pdu = Bytes::from_static(&[0x03, 0x06, 0x04, 0xD2, 0x16, 0x2E, 0x23, 0x34]);
        let ResponsePdu(rsp) = pdu.try_into().unwrap();
        let Response::ReadHoldingRegisters(words) = rsp.unwrap() else {
            panic!("unexpected response");
        };
        assert_eq!(words, [1234, 5678, 9012]);
    }

    #[test]
    fn decode_exception_response() {
        let pdu = Bytes::from_static(&[0x83, 0x02]);
        let ResponsePdu(rsp) = pdu.try_into().unwrap();
        let err = rsp.unwrap_err();
        assert_eq!(err.function, 0x03);
        assert_eq!(err.exception, Exception::IllegalDataAddress);
    }

    #[test]
    fn decode_exception_response_with_unknown_code() {
        let pdu = Bytes::from_static(&[0x85, 0x7F]);
        let ResponsePdu(rsp) = pdu.try_into().unwrap();
        let err = rsp.unwrap_err();
        assert_eq!(err.function, 0x05);
        assert_eq!(err.exception, Exception::Custom(0x7F));
    }

    #[test]
    fn decode_write_single_coil_response() {
        let pdu = Bytes::from_static(&[0x05, 0x00, 0x05, 0xFF, 0x00]);
        let ResponsePdu(rsp) = pdu.try_into().unwrap();
        assert_eq!(rsp.unwrap(), Response::WriteSingleCoil(0x0005, true));

        let pdu = Bytes::from_static(&[0x05, 0x00, 0x05, 0x12, 0x34]);
        assert!(ResponsePdu::try_from(pdu).is_err());
    }

    #[test]
    fn decode_get_comm_event_counter_response() {
        let pdu = Bytes::from_static(&[0x0B, 0xFF, 0xFF, 0x00, 0x2A]);
        let ResponsePdu(rsp) = pdu.try_into().unwrap();
        assert_eq!(rsp.unwrap(), Response::GetCommEventCounter(0xFFFF, 42));
    }

    #[test]
    fn decode_report_server_id_response() {
        let pdu = Bytes::from_static(&[0x11, 0x03, 0x41, 0x42, 0x43]);
        let ResponsePdu(rsp) = pdu.try_into().unwrap();
        let Response::ReportServerId(data) = rsp.unwrap() else {
            panic!("unexpected response");
        };
        assert_eq!(&data[..], b"ABC");
    }

    #[test]
    fn decode_truncated_response() {
        assert!(ResponsePdu::try_from(Bytes::from_static(&[0x03, 0x06, 0x04])).is_err());
        assert!(ResponsePdu::try_from(Bytes::from_static(&[0x03])).is_err());
    }

    #[test]
    fn response_round_trip() {
        let responses = [
            Response::ReadCoils(vec![true, false, true, false, false, false, false, false]),
            Response::ReadHoldingRegisters(vec![1234, 5678, 9012]),
            Response::WriteSingleCoil(5, true),
            Response::WriteSingleRegister(0x0010, 0xBEEF),
            Response::ReadExceptionStatus(0x55),
            Response::GetCommEventCounter(0xFFFF, 7),
            Response::WriteMultipleCoils(0x0010, 4),
            Response::WriteMultipleRegisters(0x0002, 2),
            Response::ReportServerId(Bytes::from_static(b"server")),
        ];
        for rsp in responses {
            let bytes: Bytes = rsp.clone().into();
            let ResponsePdu(decoded) = bytes.try_into().unwrap();
            assert_eq!(decoded.unwrap(), rsp);
        }
    }
}
