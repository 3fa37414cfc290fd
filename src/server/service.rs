// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request dispatch and the data-model handler contract.

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use tracing::error;

use crate::{
    codec::unpack_coils,
    error::{Error, Result},
    frame::{
        Address, Exception, ExceptionResponse, FunctionCode, Quantity, Response, ResponsePdu,
        UnitId, COIL_OFF, COIL_ON, MAX_QUANTITY_COILS, MAX_QUANTITY_READ_REGISTERS,
        MAX_QUANTITY_WRITE_REGISTERS, MAX_SERVER_ID_LEN,
    },
};

/// The data-model behind a Modbus server.
///
/// One method per supported function code, each receiving the unit ID
/// from the MBAP header. The handler is shared across all connection
/// workers without any serialization by the dispatch layer, so
/// implementations must be safe for concurrent use.
///
/// Returning [`Error::Exception`] produces the corresponding exception
/// response on the wire; any other error is translated into a
/// `ServerDeviceFailure` exception.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Read `quantity` coils starting at `addr` (0x01).
    async fn read_coils(&self, unit_id: UnitId, addr: Address, quantity: Quantity)
        -> Result<Vec<bool>>;

    /// Read `quantity` discrete inputs starting at `addr` (0x02).
    async fn read_discrete_inputs(
        &self,
        unit_id: UnitId,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<bool>>;

    /// Read `quantity` holding registers starting at `addr` (0x03).
    async fn read_holding_registers(
        &self,
        unit_id: UnitId,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<u16>>;

    /// Read `quantity` input registers starting at `addr` (0x04).
    async fn read_input_registers(
        &self,
        unit_id: UnitId,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<u16>>;

    /// Write a single coil (0x05).
    async fn write_single_coil(&self, unit_id: UnitId, addr: Address, value: bool) -> Result<()>;

    /// Write a single holding register (0x06).
    async fn write_single_register(&self, unit_id: UnitId, addr: Address, value: u16)
        -> Result<()>;

    /// Write multiple coils (0x0F).
    async fn write_multiple_coils(
        &self,
        unit_id: UnitId,
        addr: Address,
        values: &[bool],
    ) -> Result<()>;

    /// Write multiple holding registers (0x10).
    async fn write_multiple_registers(
        &self,
        unit_id: UnitId,
        addr: Address,
        values: &[u16],
    ) -> Result<()>;

    /// Read the exception status byte (0x07).
    async fn read_exception_status(&self, unit_id: UnitId) -> Result<u8>;

    /// Perform a diagnostic operation (0x08).
    async fn diagnostics(&self, unit_id: UnitId, sub_function: u16, data: &[u8])
        -> Result<Vec<u8>>;

    /// Get the communication event counter (0x0B): (status, event count).
    async fn get_comm_event_counter(&self, unit_id: UnitId) -> Result<(u16, u16)>;

    /// Report the server identification (0x11).
    async fn report_server_id(&self, unit_id: UnitId) -> Result<Vec<u8>>;
}

fn exception(function: u8, exception: Exception) -> ResponsePdu {
    ResponsePdu(Err(ExceptionResponse {
        function,
        exception,
    }))
}

/// Dispatches one raw request PDU to the handler and encodes the
/// response PDU.
///
/// Every outcome is a PDU: malformed bodies and out-of-range arguments
/// are answered with the proper exception instead of dropping the
/// connection.
pub(crate) async fn dispatch(handler: &dyn Handler, unit_id: UnitId, pdu: &[u8]) -> Bytes {
    let Some(&fc_raw) = pdu.first() else {
        return exception(0, Exception::IllegalFunction).into();
    };
    let Some(function) = FunctionCode::new(fc_raw) else {
        return exception(fc_raw, Exception::IllegalFunction).into();
    };

    let rsp = match execute(handler, unit_id, function, pdu).await {
        Ok(rsp) => rsp,
        Err(Error::Exception(err)) => exception(fc_raw, err.exception),
        Err(err) => {
            error!(func = %function, error = %err, "handler error");
            exception(fc_raw, Exception::ServerDeviceFailure)
        }
    };
    rsp.into()
}

/// Validates the PDU body, invokes the handler, and builds the typed
/// response.
///
/// Validation failures yield an exception response directly; only
/// handler failures are propagated as errors.
async fn execute(
    handler: &dyn Handler,
    unit_id: UnitId,
    function: FunctionCode,
    pdu: &[u8],
) -> Result<ResponsePdu> {
    use FunctionCode::*;

    let fc = function.value();
    let rsp = match function {
        ReadCoils | ReadDiscreteInputs => {
            if pdu.len() < 5 {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            let addr = BigEndian::read_u16(&pdu[1..3]);
            let quantity = BigEndian::read_u16(&pdu[3..5]);
            if quantity < 1 || quantity > MAX_QUANTITY_COILS {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            if u32::from(addr) + u32::from(quantity) > 65536 {
                return Ok(exception(fc, Exception::IllegalDataAddress));
            }
            let values = if function == ReadCoils {
                handler.read_coils(unit_id, addr, quantity).await?
            } else {
                handler.read_discrete_inputs(unit_id, addr, quantity).await?
            };
            if values.len() != usize::from(quantity) {
                return Ok(exception(fc, Exception::ServerDeviceFailure));
            }
            if function == ReadCoils {
                Response::ReadCoils(values)
            } else {
                Response::ReadDiscreteInputs(values)
            }
        }
        ReadHoldingRegisters | ReadInputRegisters => {
            if pdu.len() < 5 {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            let addr = BigEndian::read_u16(&pdu[1..3]);
            let quantity = BigEndian::read_u16(&pdu[3..5]);
            if quantity < 1 || quantity > MAX_QUANTITY_READ_REGISTERS {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            if u32::from(addr) + u32::from(quantity) > 65536 {
                return Ok(exception(fc, Exception::IllegalDataAddress));
            }
            let values = if function == ReadHoldingRegisters {
                handler.read_holding_registers(unit_id, addr, quantity).await?
            } else {
                handler.read_input_registers(unit_id, addr, quantity).await?
            };
            if values.len() != usize::from(quantity) {
                return Ok(exception(fc, Exception::ServerDeviceFailure));
            }
            if function == ReadHoldingRegisters {
                Response::ReadHoldingRegisters(values)
            } else {
                Response::ReadInputRegisters(values)
            }
        }
        WriteSingleCoil => {
            if pdu.len() < 5 {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            let addr = BigEndian::read_u16(&pdu[1..3]);
            let value = match BigEndian::read_u16(&pdu[3..5]) {
                COIL_ON => true,
                COIL_OFF => false,
                _ => return Ok(exception(fc, Exception::IllegalDataValue)),
            };
            handler.write_single_coil(unit_id, addr, value).await?;
            // The response echoes the request body verbatim.
            Response::WriteSingleCoil(addr, value)
        }
        WriteSingleRegister => {
            if pdu.len() < 5 {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            let addr = BigEndian::read_u16(&pdu[1..3]);
            let value = BigEndian::read_u16(&pdu[3..5]);
            handler.write_single_register(unit_id, addr, value).await?;
            Response::WriteSingleRegister(addr, value)
        }
        WriteMultipleCoils => {
            if pdu.len() < 6 {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            let addr = BigEndian::read_u16(&pdu[1..3]);
            let quantity = BigEndian::read_u16(&pdu[3..5]);
            let byte_count = usize::from(pdu[5]);
            if quantity < 1 || quantity > MAX_QUANTITY_COILS {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            if u32::from(addr) + u32::from(quantity) > 65536 {
                return Ok(exception(fc, Exception::IllegalDataAddress));
            }
            let expected = (usize::from(quantity) + 7) / 8;
            if byte_count != expected || pdu.len() < 6 + byte_count {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            let values = unpack_coils(&pdu[6..6 + byte_count], quantity);
            handler.write_multiple_coils(unit_id, addr, &values).await?;
            Response::WriteMultipleCoils(addr, quantity)
        }
        WriteMultipleRegisters => {
            if pdu.len() < 6 {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            let addr = BigEndian::read_u16(&pdu[1..3]);
            let quantity = BigEndian::read_u16(&pdu[3..5]);
            let byte_count = usize::from(pdu[5]);
            if quantity < 1 || quantity > MAX_QUANTITY_WRITE_REGISTERS {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            if u32::from(addr) + u32::from(quantity) > 65536 {
                return Ok(exception(fc, Exception::IllegalDataAddress));
            }
            let expected = usize::from(quantity) * 2;
            if byte_count != expected || pdu.len() < 6 + byte_count {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            let mut values = Vec::with_capacity(quantity.into());
            for i in 0..usize::from(quantity) {
                values.push(BigEndian::read_u16(&pdu[6 + i * 2..8 + i * 2]));
            }
            handler
                .write_multiple_registers(unit_id, addr, &values)
                .await?;
            Response::WriteMultipleRegisters(addr, quantity)
        }
        ReadExceptionStatus => {
            let status = handler.read_exception_status(unit_id).await?;
            Response::ReadExceptionStatus(status)
        }
        Diagnostics => {
            if pdu.len() < 3 {
                return Ok(exception(fc, Exception::IllegalDataValue));
            }
            let sub_function = BigEndian::read_u16(&pdu[1..3]);
            let data = handler
                .diagnostics(unit_id, sub_function, &pdu[3..])
                .await?;
            Response::Diagnostics(sub_function, data.into())
        }
        GetCommEventCounter => {
            let (status, event_count) = handler.get_comm_event_counter(unit_id).await?;
            Response::GetCommEventCounter(status, event_count)
        }
        ReportServerId => {
            let mut data = handler.report_server_id(unit_id).await?;
            // The byte count field is a single byte.
            data.truncate(MAX_SERVER_ID_LEN);
            Response::ReportServerId(data.into())
        }
    };
    Ok(rsp.into())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::server::MemoryHandler;

    async fn roundtrip(handler: &MemoryHandler, pdu: &[u8]) -> Vec<u8> {
        dispatch(handler, 1, pdu).await.to_vec()
    }

    #[tokio::test]
    async fn read_coils_dispatch() {
        let handler = MemoryHandler::new();
        handler.set_coil(1, 0, true);
        handler.set_coil(1, 2, true);

        let rsp = roundtrip(&handler, &[0x01, 0x00, 0x00, 0x00, 0x08]).await;
        assert_eq!(rsp, [0x01, 0x01, 0x05]);
    }

    #[tokio::test]
    async fn unknown_function_code_yields_illegal_function() {
        let handler = MemoryHandler::new();
        let rsp = roundtrip(&handler, &[0x2B, 0x00]).await;
        assert_eq!(rsp, [0xAB, 0x01]);
    }

    #[tokio::test]
    async fn empty_pdu_yields_illegal_function() {
        let handler = MemoryHandler::new();
        let rsp = roundtrip(&handler, &[]).await;
        assert_eq!(rsp, [0x80, 0x01]);
    }

    #[tokio::test]
    async fn quantity_bounds_are_enforced() {
        let handler = MemoryHandler::new();
        // 2001 coils
        let rsp = roundtrip(&handler, &[0x01, 0x00, 0x00, 0x07, 0xD1]).await;
        assert_eq!(rsp, [0x81, 0x03]);
        // zero registers
        let rsp = roundtrip(&handler, &[0x03, 0x00, 0x00, 0x00, 0x00]).await;
        assert_eq!(rsp, [0x83, 0x03]);
    }

    #[tokio::test]
    async fn address_overflow_yields_illegal_data_address() {
        let handler = MemoryHandler::new();
        let rsp = roundtrip(&handler, &[0x03, 0xFF, 0xFF, 0x00, 0x02]).await;
        assert_eq!(rsp, [0x83, 0x02]);
    }

    #[tokio::test]
    async fn invalid_coil_value_yields_illegal_data_value() {
        let handler = MemoryHandler::new();
        let rsp = roundtrip(&handler, &[0x05, 0x00, 0x05, 0x12, 0x34]).await;
        assert_eq!(rsp, [0x85, 0x03]);
    }

    #[tokio::test]
    async fn write_single_coil_echoes_request_body() {
        let handler = MemoryHandler::new();
        let request = [0x05, 0x00, 0x05, 0xFF, 0x00];
        let rsp = roundtrip(&handler, &request).await;
        assert_eq!(rsp, request);
        assert_eq!(
            handler.read_coils(1, 5, 1).await.unwrap(),
            vec![true]
        );
    }

    #[tokio::test]
    async fn write_multiple_coils_byte_count_mismatch() {
        let handler = MemoryHandler::new();
        // 4 coils but a byte count of 2
        let rsp = roundtrip(&handler, &[0x0F, 0x00, 0x00, 0x00, 0x04, 0x02, 0x0F, 0x00]).await;
        assert_eq!(rsp, [0x8F, 0x03]);
    }

    #[tokio::test]
    async fn diagnostics_echoes_query_data() {
        let handler = MemoryHandler::new();
        let rsp = roundtrip(&handler, &[0x08, 0x00, 0x00, 0xA5, 0x37]).await;
        assert_eq!(rsp, [0x08, 0x00, 0x00, 0xA5, 0x37]);
    }

    #[tokio::test]
    async fn unsupported_diagnostics_sub_function() {
        let handler = MemoryHandler::new();
        let rsp = roundtrip(&handler, &[0x08, 0x00, 0x01]).await;
        assert_eq!(rsp, [0x88, 0x01]);
    }

    #[tokio::test]
    async fn report_server_id_is_truncated() {
        let handler = MemoryHandler::new();
        handler.set_server_id(vec![0x55; 300]);
        let rsp = roundtrip(&handler, &[0x11]).await;
        assert_eq!(rsp.len(), 2 + MAX_SERVER_ID_LEN);
        assert_eq!(rsp[0], 0x11);
        assert_eq!(usize::from(rsp[1]), MAX_SERVER_ID_LEN);
    }

    #[tokio::test]
    async fn handler_count_mismatch_yields_server_device_failure() {
        struct BrokenHandler;

        #[async_trait]
        impl Handler for BrokenHandler {
            async fn read_coils(&self, _: UnitId, _: Address, _: Quantity) -> Result<Vec<bool>> {
                Ok(vec![true]) // wrong count
            }
            async fn read_discrete_inputs(
                &self,
                _: UnitId,
                _: Address,
                _: Quantity,
            ) -> Result<Vec<bool>> {
                Ok(Vec::new())
            }
            async fn read_holding_registers(
                &self,
                _: UnitId,
                _: Address,
                _: Quantity,
            ) -> Result<Vec<u16>> {
                Ok(Vec::new())
            }
            async fn read_input_registers(
                &self,
                _: UnitId,
                _: Address,
                _: Quantity,
            ) -> Result<Vec<u16>> {
                Ok(Vec::new())
            }
            async fn write_single_coil(&self, _: UnitId, _: Address, _: bool) -> Result<()> {
                Ok(())
            }
            async fn write_single_register(&self, _: UnitId, _: Address, _: u16) -> Result<()> {
                Ok(())
            }
            async fn write_multiple_coils(&self, _: UnitId, _: Address, _: &[bool]) -> Result<()> {
                Ok(())
            }
            async fn write_multiple_registers(
                &self,
                _: UnitId,
                _: Address,
                _: &[u16],
            ) -> Result<()> {
                Ok(())
            }
            async fn read_exception_status(&self, _: UnitId) -> Result<u8> {
                Err(Error::Config("boom".into()))
            }
            async fn diagnostics(&self, _: UnitId, _: u16, _: &[u8]) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }
            async fn get_comm_event_counter(&self, _: UnitId) -> Result<(u16, u16)> {
                Ok((0, 0))
            }
            async fn report_server_id(&self, _: UnitId) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }
        }

        let handler: Arc<dyn Handler> = Arc::new(BrokenHandler);
        let rsp = dispatch(handler.as_ref(), 1, &[0x01, 0x00, 0x00, 0x00, 0x08]).await;
        assert_eq!(&rsp[..], &[0x81, 0x04]);

        // Non-exception handler errors also map to ServerDeviceFailure.
        let rsp = dispatch(handler.as_ref(), 1, &[0x07]).await;
        assert_eq!(&rsp[..], &[0x87, 0x04]);
    }
}
