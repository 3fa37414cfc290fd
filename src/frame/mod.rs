// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol frame types.

pub(crate) mod tcp;

use std::{borrow::Cow, error, fmt};

use bytes::Bytes;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
pub type Address = u16;

/// A single byte selecting a logical Modbus device behind a TCP endpoint.
///
/// Values 1-247 address single devices. This stack treats 0 as a valid,
/// non-broadcast unit: requests addressed to unit 0 are answered like
/// any other and the identifier is echoed in the response. The reserved
/// range 248-255 is accepted and passed through unchanged.
pub type UnitId = u8;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub(crate) type Coil = bool;

/// Modbus uses 16 bit for its data items.
///
/// Transmitted using a big-endian representation.
pub(crate) type Word = u16;

/// Number of items to process.
pub type Quantity = u16;

/// Maximum number of coils or discrete inputs per read/write request.
pub const MAX_QUANTITY_COILS: Quantity = 2000;

/// Maximum number of registers per read request.
pub const MAX_QUANTITY_READ_REGISTERS: Quantity = 125;

/// Maximum number of registers per write request.
pub const MAX_QUANTITY_WRITE_REGISTERS: Quantity = 123;

/// Maximum payload of a `ReportServerID` response.
///
/// Limited by the one-byte count field together with the PDU size cap.
pub const MAX_SERVER_ID_LEN: usize = 251;

/// Wire value of a coil that is `ON` in a single-coil write.
pub(crate) const COIL_ON: u16 = 0xFF00;

/// Wire value of a coil that is `OFF` in a single-coil write.
pub(crate) const COIL_OFF: u16 = 0x0000;

/// Diagnostic sub-function codes (function code 0x08).
pub mod diag {
    pub const RETURN_QUERY_DATA: u16 = 0x00;
    pub const RESTART_COMMUNICATIONS: u16 = 0x01;
    pub const RETURN_DIAGNOSTIC_REGISTER: u16 = 0x02;
    pub const CHANGE_ASCII_INPUT_DELIMITER: u16 = 0x03;
    pub const FORCE_LISTEN_ONLY_MODE: u16 = 0x04;
    pub const CLEAR_COUNTERS_AND_DIAGNOSTIC_REGISTER: u16 = 0x0A;
    pub const RETURN_BUS_MESSAGE_COUNT: u16 = 0x0B;
    pub const RETURN_BUS_COMMUNICATION_ERROR_COUNT: u16 = 0x0C;
    pub const RETURN_BUS_EXCEPTION_ERROR_COUNT: u16 = 0x0D;
    pub const RETURN_SERVER_MESSAGE_COUNT: u16 = 0x0E;
    pub const RETURN_SERVER_NO_RESPONSE_COUNT: u16 = 0x0F;
    pub const RETURN_SERVER_NAK_COUNT: u16 = 0x10;
    pub const RETURN_SERVER_BUSY_COUNT: u16 = 0x11;
    pub const RETURN_BUS_CHARACTER_OVERRUN_COUNT: u16 = 0x12;
    pub const CLEAR_OVERRUN_COUNTER_AND_FLAG: u16 = 0x14;
}

/// A Modbus function code.
///
/// Only the standard public function codes supported by this crate are
/// represented. An exception response sets the high bit of the function
/// code on the wire, i.e. response FC = request FC | 0x80.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    ReadExceptionStatus = 0x07,
    Diagnostics = 0x08,
    GetCommEventCounter = 0x0B,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
    ReportServerId = 0x11,
}

impl FunctionCode {
    /// Creates a function code from its wire value.
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x07 => Some(Self::ReadExceptionStatus),
            0x08 => Some(Self::Diagnostics),
            0x0B => Some(Self::GetCommEventCounter),
            0x0F => Some(Self::WriteMultipleCoils),
            0x10 => Some(Self::WriteMultipleRegisters),
            0x11 => Some(Self::ReportServerId),
            _ => None,
        }
    }

    /// Returns the wire value of the function code.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }
}

impl From<FunctionCode> for u8 {
    fn from(from: FunctionCode) -> Self {
        from.value()
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadCoils => "ReadCoils",
            Self::ReadDiscreteInputs => "ReadDiscreteInputs",
            Self::ReadHoldingRegisters => "ReadHoldingRegisters",
            Self::ReadInputRegisters => "ReadInputRegisters",
            Self::WriteSingleCoil => "WriteSingleCoil",
            Self::WriteSingleRegister => "WriteSingleRegister",
            Self::ReadExceptionStatus => "ReadExceptionStatus",
            Self::Diagnostics => "Diagnostics",
            Self::GetCommEventCounter => "GetCommEventCounter",
            Self::WriteMultipleCoils => "WriteMultipleCoils",
            Self::WriteMultipleRegisters => "WriteMultipleRegisters",
            Self::ReportServerId => "ReportServerId",
        };
        f.write_str(name)
    }
}

/// A request represents a message from the client (master) to the
/// server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// Read multiple coils (0x01): start address, quantity.
    ReadCoils(Address, Quantity),

    /// Read multiple discrete inputs (0x02): start address, quantity.
    ReadDiscreteInputs(Address, Quantity),

    /// Read multiple holding registers (0x03): start address, quantity.
    ReadHoldingRegisters(Address, Quantity),

    /// Read multiple input registers (0x04): start address, quantity.
    ReadInputRegisters(Address, Quantity),

    /// Write a single coil (0x05): address, value.
    WriteSingleCoil(Address, Coil),

    /// Write a single holding register (0x06): address, value.
    WriteSingleRegister(Address, Word),

    /// Read the exception status byte (0x07).
    ReadExceptionStatus,

    /// Perform a diagnostic operation (0x08): sub-function, data.
    Diagnostics(u16, Cow<'a, [u8]>),

    /// Get the communication event counter (0x0B).
    GetCommEventCounter,

    /// Write multiple coils (0x0F): start address, values.
    WriteMultipleCoils(Address, Cow<'a, [Coil]>),

    /// Write multiple holding registers (0x10): start address, values.
    WriteMultipleRegisters(Address, Cow<'a, [Word]>),

    /// Request the server identification (0x11).
    ReportServerId,
}

impl Request<'_> {
    /// Returns the function code of the request.
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Request::*;

        match self {
            ReadCoils(_, _) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_, _) => FunctionCode::ReadDiscreteInputs,
            ReadHoldingRegisters(_, _) => FunctionCode::ReadHoldingRegisters,
            ReadInputRegisters(_, _) => FunctionCode::ReadInputRegisters,
            WriteSingleCoil(_, _) => FunctionCode::WriteSingleCoil,
            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            ReadExceptionStatus => FunctionCode::ReadExceptionStatus,
            Diagnostics(_, _) => FunctionCode::Diagnostics,
            GetCommEventCounter => FunctionCode::GetCommEventCounter,
            WriteMultipleCoils(_, _) => FunctionCode::WriteMultipleCoils,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,
            ReportServerId => FunctionCode::ReportServerId,
        }
    }

    /// Converts the request into an owned instance with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> Request<'static> {
        use Request::*;

        match self {
            ReadCoils(addr, qty) => ReadCoils(addr, qty),
            ReadDiscreteInputs(addr, qty) => ReadDiscreteInputs(addr, qty),
            ReadHoldingRegisters(addr, qty) => ReadHoldingRegisters(addr, qty),
            ReadInputRegisters(addr, qty) => ReadInputRegisters(addr, qty),
            WriteSingleCoil(addr, coil) => WriteSingleCoil(addr, coil),
            WriteSingleRegister(addr, word) => WriteSingleRegister(addr, word),
            ReadExceptionStatus => ReadExceptionStatus,
            Diagnostics(sub, data) => Diagnostics(sub, Cow::Owned(data.into_owned())),
            GetCommEventCounter => GetCommEventCounter,
            WriteMultipleCoils(addr, coils) => {
                WriteMultipleCoils(addr, Cow::Owned(coils.into_owned()))
            }
            WriteMultipleRegisters(addr, words) => {
                WriteMultipleRegisters(addr, Cow::Owned(words.into_owned()))
            }
            ReportServerId => ReportServerId,
        }
    }
}

/// The data of a successful request.
///
/// `ReadCoils`/`ReadDiscreteInputs`: the decoded vector always contains
/// whole bytes, i.e. a multiple of 8 coils. Only the first bits that have
/// actually been requested are defined; the caller truncates to the
/// requested quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Response to a `ReadCoils` request: the coil values that have been
    /// read.
    ReadCoils(Vec<Coil>),

    /// Response to a `ReadDiscreteInputs` request: the input values that
    /// have been read.
    ReadDiscreteInputs(Vec<Coil>),

    /// Response to a `ReadHoldingRegisters` request: the register values
    /// that have been read.
    ReadHoldingRegisters(Vec<Word>),

    /// Response to a `ReadInputRegisters` request: the register values
    /// that have been read.
    ReadInputRegisters(Vec<Word>),

    /// Response to a `WriteSingleCoil` request: the echoed address and
    /// value.
    WriteSingleCoil(Address, Coil),

    /// Response to a `WriteSingleRegister` request: the echoed address
    /// and value.
    WriteSingleRegister(Address, Word),

    /// Response to a `ReadExceptionStatus` request: the status byte.
    ReadExceptionStatus(u8),

    /// Response to a `Diagnostics` request: the echoed sub-function and
    /// the response data.
    Diagnostics(u16, Bytes),

    /// Response to a `GetCommEventCounter` request: status word and
    /// event count.
    GetCommEventCounter(u16, u16),

    /// Response to a `WriteMultipleCoils` request: start address and
    /// quantity written.
    WriteMultipleCoils(Address, Quantity),

    /// Response to a `WriteMultipleRegisters` request: start address and
    /// quantity written.
    WriteMultipleRegisters(Address, Quantity),

    /// Response to a `ReportServerId` request: the server identification
    /// bytes.
    ReportServerId(Bytes),
}

impl Response {
    /// Returns the function code of the response.
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Response::*;

        match self {
            ReadCoils(_) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            WriteSingleCoil(_, _) => FunctionCode::WriteSingleCoil,
            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            ReadExceptionStatus(_) => FunctionCode::ReadExceptionStatus,
            Diagnostics(_, _) => FunctionCode::Diagnostics,
            GetCommEventCounter(_, _) => FunctionCode::GetCommEventCounter,
            WriteMultipleCoils(_, _) => FunctionCode::WriteMultipleCoils,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,
            ReportServerId(_) => FunctionCode::ReportServerId,
        }
    }
}

/// A server (slave) exception.
///
/// Codes outside the canonical set are preserved verbatim as `Custom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetDevice,
    Custom(u8),
}

impl Exception {
    pub(crate) fn description(&self) -> &str {
        use Exception::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
            Custom(_) => "Unknown exception",
        }
    }
}

impl From<u8> for Exception {
    fn from(code: u8) -> Self {
        use Exception::*;

        match code {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            code => Custom(code),
        }
    }
}

impl From<Exception> for u8 {
    fn from(from: Exception) -> Self {
        use Exception::*;

        match from {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            ServerDeviceFailure => 0x04,
            Acknowledge => 0x05,
            ServerDeviceBusy => 0x06,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetDevice => 0x0B,
            Custom(code) => code,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Self::Custom(code) = self {
            write!(f, "Unknown exception (0x{code:02X})")
        } else {
            f.write_str(self.description())
        }
    }
}

impl error::Error for Exception {}

/// A server (slave) exception response.
///
/// `function` is the function code of the request that was refused,
/// without the high bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: u8,
    pub exception: Exception,
}

impl ExceptionResponse {
    /// Creates an exception response for the given function code.
    #[must_use]
    pub fn new(function: FunctionCode, exception: Exception) -> Self {
        Self {
            function: function.value(),
            exception,
        }
    }
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponsePdu(pub(crate) Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_code_round_trip() {
        for value in [
            0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x0B, 0x0F, 0x10, 0x11,
        ] {
            let fc = FunctionCode::new(value).unwrap();
            assert_eq!(fc.value(), value);
        }
        assert_eq!(FunctionCode::new(0x00), None);
        assert_eq!(FunctionCode::new(0x16), None);
        assert_eq!(FunctionCode::new(0x80), None);
    }

    #[test]
    fn exception_codes_round_trip() {
        for code in [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x08, 0x0A, 0x0B] {
            assert_eq!(u8::from(Exception::from(code)), code);
        }
        // Unknown codes are preserved, not normalized.
        assert_eq!(Exception::from(0x7F), Exception::Custom(0x7F));
        assert_eq!(u8::from(Exception::Custom(0x7F)), 0x7F);
    }

    #[test]
    fn format_exception_response() {
        let rsp =
            ExceptionResponse::new(FunctionCode::ReadDiscreteInputs, Exception::IllegalDataValue);
        assert_eq!(format!("{rsp}"), "Modbus function 2: Illegal data value");
    }

    #[test]
    fn request_function_codes() {
        assert_eq!(
            Request::ReadCoils(0, 8).function_code(),
            FunctionCode::ReadCoils
        );
        assert_eq!(
            Request::Diagnostics(0, Cow::Borrowed(&[])).function_code(),
            FunctionCode::Diagnostics
        );
        assert_eq!(
            Request::ReportServerId.function_code(),
            FunctionCode::ReportServerId
        );
    }
}
