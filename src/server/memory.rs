// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory reference handler.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU16, Ordering},
        RwLock,
    },
};

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    frame::{diag, Address, Exception, ExceptionResponse, FunctionCode, Quantity, UnitId},
};

use super::Handler;

const BANK_SIZE: usize = 65536;

#[derive(Debug)]
struct UnitBank {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl UnitBank {
    fn new() -> Self {
        Self {
            coils: vec![false; BANK_SIZE],
            discrete_inputs: vec![false; BANK_SIZE],
            holding_registers: vec![0; BANK_SIZE],
            input_registers: vec![0; BANK_SIZE],
        }
    }
}

/// A thread-safe in-memory [`Handler`] for tests and device simulation.
///
/// Data banks of 65536 entries are allocated lazily per unit ID on
/// first access; initialization is idempotent under concurrency.
#[derive(Debug)]
pub struct MemoryHandler {
    banks: RwLock<HashMap<UnitId, UnitBank>>,
    server_id: RwLock<Vec<u8>>,
    event_counter: AtomicU16,
}

impl Default for MemoryHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHandler {
    /// Creates an empty handler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            banks: RwLock::new(HashMap::new()),
            server_id: RwLock::new(b"Modbus Server".to_vec()),
            event_counter: AtomicU16::new(0),
        }
    }

    fn with_bank<T>(&self, unit_id: UnitId, f: impl FnOnce(&UnitBank) -> T) -> T {
        {
            let banks = self.banks.read().expect("bank lock");
            if let Some(bank) = banks.get(&unit_id) {
                return f(bank);
            }
        }
        let mut banks = self.banks.write().expect("bank lock");
        f(banks.entry(unit_id).or_insert_with(UnitBank::new))
    }

    fn with_bank_mut<T>(&self, unit_id: UnitId, f: impl FnOnce(&mut UnitBank) -> T) -> T {
        let mut banks = self.banks.write().expect("bank lock");
        f(banks.entry(unit_id).or_insert_with(UnitBank::new))
    }

    /// Sets the identification returned by `ReportServerID`.
    pub fn set_server_id(&self, id: Vec<u8>) {
        *self.server_id.write().expect("server id lock") = id;
    }

    /// Sets a coil value directly.
    pub fn set_coil(&self, unit_id: UnitId, addr: Address, value: bool) {
        self.with_bank_mut(unit_id, |bank| bank.coils[usize::from(addr)] = value);
    }

    /// Sets a discrete input value directly.
    pub fn set_discrete_input(&self, unit_id: UnitId, addr: Address, value: bool) {
        self.with_bank_mut(unit_id, |bank| {
            bank.discrete_inputs[usize::from(addr)] = value;
        });
    }

    /// Sets a holding register value directly.
    pub fn set_holding_register(&self, unit_id: UnitId, addr: Address, value: u16) {
        self.with_bank_mut(unit_id, |bank| {
            bank.holding_registers[usize::from(addr)] = value;
        });
    }

    /// Sets an input register value directly.
    pub fn set_input_register(&self, unit_id: UnitId, addr: Address, value: u16) {
        self.with_bank_mut(unit_id, |bank| {
            bank.input_registers[usize::from(addr)] = value;
        });
    }
}

// Quantities are validated by the dispatch layer before the handler is
// invoked; this is a local consistency guard.
fn out_of_range(addr: Address, quantity: usize) -> bool {
    usize::from(addr) + quantity > BANK_SIZE
}

fn illegal_data_address(function: FunctionCode) -> Error {
    ExceptionResponse::new(function, Exception::IllegalDataAddress).into()
}

#[async_trait]
impl Handler for MemoryHandler {
    async fn read_coils(
        &self,
        unit_id: UnitId,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<bool>> {
        if out_of_range(addr, quantity.into()) {
            return Err(illegal_data_address(FunctionCode::ReadCoils));
        }
        Ok(self.with_bank(unit_id, |bank| {
            bank.coils[usize::from(addr)..usize::from(addr) + usize::from(quantity)].to_vec()
        }))
    }

    async fn read_discrete_inputs(
        &self,
        unit_id: UnitId,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<bool>> {
        if out_of_range(addr, quantity.into()) {
            return Err(illegal_data_address(FunctionCode::ReadDiscreteInputs));
        }
        Ok(self.with_bank(unit_id, |bank| {
            bank.discrete_inputs[usize::from(addr)..usize::from(addr) + usize::from(quantity)]
                .to_vec()
        }))
    }

    async fn read_holding_registers(
        &self,
        unit_id: UnitId,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<u16>> {
        if out_of_range(addr, quantity.into()) {
            return Err(illegal_data_address(FunctionCode::ReadHoldingRegisters));
        }
        Ok(self.with_bank(unit_id, |bank| {
            bank.holding_registers[usize::from(addr)..usize::from(addr) + usize::from(quantity)]
                .to_vec()
        }))
    }

    async fn read_input_registers(
        &self,
        unit_id: UnitId,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<u16>> {
        if out_of_range(addr, quantity.into()) {
            return Err(illegal_data_address(FunctionCode::ReadInputRegisters));
        }
        Ok(self.with_bank(unit_id, |bank| {
            bank.input_registers[usize::from(addr)..usize::from(addr) + usize::from(quantity)]
                .to_vec()
        }))
    }

    async fn write_single_coil(&self, unit_id: UnitId, addr: Address, value: bool) -> Result<()> {
        self.with_bank_mut(unit_id, |bank| {
            bank.coils[usize::from(addr)] = value;
        });
        self.event_counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn write_single_register(
        &self,
        unit_id: UnitId,
        addr: Address,
        value: u16,
    ) -> Result<()> {
        self.with_bank_mut(unit_id, |bank| {
            bank.holding_registers[usize::from(addr)] = value;
        });
        self.event_counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn write_multiple_coils(
        &self,
        unit_id: UnitId,
        addr: Address,
        values: &[bool],
    ) -> Result<()> {
        if out_of_range(addr, values.len()) {
            return Err(illegal_data_address(FunctionCode::WriteMultipleCoils));
        }
        self.with_bank_mut(unit_id, |bank| {
            bank.coils[usize::from(addr)..usize::from(addr) + values.len()]
                .copy_from_slice(values);
        });
        self.event_counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn write_multiple_registers(
        &self,
        unit_id: UnitId,
        addr: Address,
        values: &[u16],
    ) -> Result<()> {
        if out_of_range(addr, values.len()) {
            return Err(illegal_data_address(FunctionCode::WriteMultipleRegisters));
        }
        self.with_bank_mut(unit_id, |bank| {
            bank.holding_registers[usize::from(addr)..usize::from(addr) + values.len()]
                .copy_from_slice(values);
        });
        self.event_counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn read_exception_status(&self, _unit_id: UnitId) -> Result<u8> {
        Ok(0)
    }

    async fn diagnostics(
        &self,
        _unit_id: UnitId,
        sub_function: u16,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        match sub_function {
            diag::RETURN_QUERY_DATA => Ok(data.to_vec()),
            _ => Err(ExceptionResponse::new(
                FunctionCode::Diagnostics,
                Exception::IllegalFunction,
            )
            .into()),
        }
    }

    async fn get_comm_event_counter(&self, _unit_id: UnitId) -> Result<(u16, u16)> {
        Ok((0xFFFF, self.event_counter.load(Ordering::Relaxed)))
    }

    async fn report_server_id(&self, _unit_id: UnitId) -> Result<Vec<u8>> {
        Ok(self.server_id.read().expect("server id lock").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn banks_are_lazily_initialized_per_unit() {
        let handler = MemoryHandler::new();
        handler.set_holding_register(1, 0, 1234);
        handler.set_holding_register(2, 0, 5678);

        assert_eq!(
            handler.read_holding_registers(1, 0, 1).await.unwrap(),
            vec![1234]
        );
        assert_eq!(
            handler.read_holding_registers(2, 0, 1).await.unwrap(),
            vec![5678]
        );
        // Unit 3 has never been written and reads zeros.
        assert_eq!(
            handler.read_holding_registers(3, 0, 2).await.unwrap(),
            vec![0, 0]
        );
    }

    #[tokio::test]
    async fn writes_are_visible_to_reads() {
        let handler = MemoryHandler::new();
        handler
            .write_multiple_registers(1, 10, &[1, 2, 3])
            .await
            .unwrap();
        assert_eq!(
            handler.read_holding_registers(1, 10, 3).await.unwrap(),
            vec![1, 2, 3]
        );

        handler
            .write_multiple_coils(1, 0, &[true, false, true])
            .await
            .unwrap();
        assert_eq!(
            handler.read_coils(1, 0, 3).await.unwrap(),
            vec![true, false, true]
        );
    }

    #[tokio::test]
    async fn event_counter_tracks_writes() {
        let handler = MemoryHandler::new();
        handler.write_single_coil(1, 0, true).await.unwrap();
        handler.write_single_register(1, 0, 42).await.unwrap();
        let (status, events) = handler.get_comm_event_counter(1).await.unwrap();
        assert_eq!(status, 0xFFFF);
        assert_eq!(events, 2);
    }

    #[tokio::test]
    async fn diagnostics_other_sub_functions_are_rejected() {
        let handler = MemoryHandler::new();
        assert_eq!(
            handler
                .diagnostics(1, diag::RETURN_QUERY_DATA, &[1, 2])
                .await
                .unwrap(),
            vec![1, 2]
        );
        let err = handler
            .diagnostics(1, diag::RETURN_BUS_MESSAGE_COUNT, &[])
            .await
            .unwrap_err();
        assert!(err.is_illegal_function());
    }

    #[tokio::test]
    async fn concurrent_initialization_is_race_free() {
        use std::sync::Arc;

        let handler = Arc::new(MemoryHandler::new());
        let mut tasks = Vec::new();
        for i in 0..8u16 {
            let handler = Arc::clone(&handler);
            tasks.push(tokio::spawn(async move {
                handler.write_single_register(1, i, i).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        for i in 0..8u16 {
            assert_eq!(
                handler.read_holding_registers(1, i, 1).await.unwrap(),
                vec![i]
            );
        }
    }
}
