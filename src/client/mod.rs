// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP client.

pub(crate) mod tcp;

use std::{
    borrow::Cow,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    codec,
    error::{Error, Result},
    frame::{
        tcp::{Header, TransactionIdGenerator},
        Address, FunctionCode, Quantity, Request, Response, ResponsePdu, UnitId,
    },
    metrics::{FunctionMetrics, Metrics},
};

use self::tcp::TcpTransport;

/// The default Modbus TCP port.
pub const DEFAULT_PORT: u16 = 502;

/// The default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// State of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Callback invoked after each successful connect.
pub type OnConnect = Arc<dyn Fn() + Send + Sync>;

/// Callback invoked once per observed disconnect with the triggering
/// error.
pub type OnDisconnect = Arc<dyn Fn(&Error) + Send + Sync>;

/// Configuration of a [`Client`].
#[derive(Clone)]
pub struct ClientOptions {
    pub(crate) unit_id: UnitId,
    pub(crate) timeout: Duration,
    pub(crate) auto_reconnect: bool,
    pub(crate) reconnect_backoff: Duration,
    pub(crate) max_reconnect_time: Duration,
    pub(crate) max_retries: u32,
    pub(crate) on_connect: Option<OnConnect>,
    pub(crate) on_disconnect: Option<OnDisconnect>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            unit_id: 1,
            timeout: DEFAULT_TIMEOUT,
            auto_reconnect: false,
            reconnect_backoff: Duration::from_secs(1),
            max_reconnect_time: Duration::from_secs(30),
            max_retries: 3,
            on_connect: None,
            on_disconnect: None,
        }
    }
}

impl ClientOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default unit ID used by calls without an explicit
    /// override. Default: 1.
    #[must_use]
    pub fn unit_id(mut self, unit_id: UnitId) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// Sets the per-request deadline. Default: 5 s.
    ///
    /// The deadline covers the transport round-trip as well as any
    /// reconnect attempts and backoff sleeps of the request.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables retry and reconnect on transport failure.
    /// Default: disabled.
    #[must_use]
    pub fn auto_reconnect(mut self, enable: bool) -> Self {
        self.auto_reconnect = enable;
        self
    }

    /// Sets the initial delay between reconnect attempts. Default: 1 s.
    #[must_use]
    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Sets the upper cap for the exponential reconnect backoff.
    /// Default: 30 s.
    #[must_use]
    pub fn max_reconnect_time(mut self, max: Duration) -> Self {
        self.max_reconnect_time = max;
        self
    }

    /// Sets the number of attempts per request when auto-reconnect is
    /// enabled. Without auto-reconnect exactly one attempt is made.
    /// Default: 3.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Installs a callback invoked exactly once per successful connect.
    ///
    /// The callback runs on the connecting task and must not block.
    #[must_use]
    pub fn on_connect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Installs a callback invoked exactly once per observed disconnect.
    ///
    /// The callback runs on the task that observed the disconnect and
    /// must not block.
    #[must_use]
    pub fn on_disconnect(mut self, callback: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("unit_id", &self.unit_id)
            .field("timeout", &self.timeout)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("reconnect_backoff", &self.reconnect_backoff)
            .field("max_reconnect_time", &self.max_reconnect_time)
            .field("max_retries", &self.max_retries)
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

/// A Modbus TCP client session.
///
/// The client is thread-safe: all operations take `&self` and may be
/// invoked concurrently. The transport serializes transactions, so at
/// most one request is on the wire at any time and concurrent senders
/// observe FIFO order with respect to lock acquisition.
#[derive(Debug)]
pub struct Client {
    addr: String,
    opts: ClientOptions,
    transport: TcpTransport,
    tx_id: TransactionIdGenerator,
    unit_id: AtomicU8,
    state: AtomicU8,
    closed: AtomicBool,
    cancel: CancellationToken,
    metrics: Metrics,
}

impl Client {
    /// Creates a new client for the given address.
    ///
    /// The client starts disconnected; call [`connect`](Self::connect)
    /// before issuing requests.
    pub fn new(addr: impl Into<String>, options: ClientOptions) -> Result<Self> {
        let addr = addr.into();
        if addr.is_empty() {
            return Err(Error::Config("address cannot be empty".into()));
        }
        let transport = TcpTransport::new(addr.clone(), options.timeout);
        Ok(Self {
            addr,
            unit_id: AtomicU8::new(options.unit_id),
            opts: options,
            transport,
            tx_id: TransactionIdGenerator::new(),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            metrics: Metrics::new(),
        })
    }

    /// Establishes the connection to the server.
    ///
    /// A no-op while already connected. On failure the state returns to
    /// [`ConnectionState::Disconnected`].
    pub async fn connect(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.swap_state(ConnectionState::Connecting);

        debug!(addr = %self.addr, "connecting");
        if let Err(err) = self.transport.connect(&self.cancel).await {
            self.swap_state(ConnectionState::Disconnected);
            return Err(err);
        }

        let prev = self.swap_state(ConnectionState::Connected);
        if prev != ConnectionState::Connected {
            self.metrics.active_conns.add(1);
        }
        info!(addr = %self.addr, "connected");

        if let Some(callback) = &self.opts.on_connect {
            callback();
        }
        Ok(())
    }

    /// Closes the client permanently.
    ///
    /// Idempotent and terminal: a closed client cannot be reopened.
    /// Aborts an in-progress reconnect loop and cancels pending I/O.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let prev = self.swap_state(ConnectionState::Disconnected);
        if prev == ConnectionState::Connected {
            self.metrics.active_conns.add(-1);
        }
        debug!(addr = %self.addr, "closing connection");
        self.transport.close().await;
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns `true` if the client is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the server address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.addr
    }

    /// Returns the default unit ID.
    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.unit_id.load(Ordering::SeqCst)
    }

    /// Sets the default unit ID for subsequent requests.
    pub fn set_unit_id(&self, unit_id: UnitId) {
        self.unit_id.store(unit_id, Ordering::SeqCst);
    }

    /// Returns the embedded metrics.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn swap_state(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.state.swap(state as u8, Ordering::SeqCst))
    }

    /// Marks the session as disconnected after an observed failure.
    async fn handle_disconnect(&self, err: &Error) {
        let prev = self.swap_state(ConnectionState::Disconnected);
        self.transport.close().await;
        if prev == ConnectionState::Connected {
            self.metrics.active_conns.add(-1);
            warn!(addr = %self.addr, error = %err, "disconnected");
            if let Some(callback) = &self.opts.on_disconnect {
                callback(err);
            }
        }
    }

    /// Reconnects with exponential backoff until success, close, or
    /// cancellation.
    ///
    /// The per-request deadline of the caller bounds the loop.
    async fn reconnect(&self) -> Result<()> {
        let mut backoff = self.opts.reconnect_backoff;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::ConnectionClosed);
            }

            info!(
                addr = %self.addr,
                backoff_ms = backoff.as_millis() as u64,
                "attempting reconnection"
            );
            self.metrics.reconnections.inc();

            match self.connect().await {
                Ok(()) => {
                    info!(addr = %self.addr, "reconnected");
                    return Ok(());
                }
                Err(Error::ConnectionClosed) => return Err(Error::ConnectionClosed),
                Err(err) => {
                    warn!(addr = %self.addr, error = %err, "reconnection attempt failed");
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => return Err(Error::ConnectionClosed),
                () = sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.opts.max_reconnect_time);
        }
    }

    /// Encodes and sends a request, bounded by the per-request deadline.
    async fn send_request(&self, unit_id: UnitId, request: Request<'_>) -> Result<Response> {
        let function = request.function_code();
        let pdu: bytes::Bytes = request.try_into()?;

        match timeout(self.opts.timeout, self.send_pdu(unit_id, function, &pdu)).await {
            Ok(result) => result,
            Err(_) => {
                let err = Error::Timeout;
                self.metrics.requests_errors.inc();
                self.metrics.for_function(function).errors.inc();
                self.handle_disconnect(&err).await;
                Err(err)
            }
        }
    }

    /// The retry loop around a single transaction.
    async fn send_pdu(
        &self,
        unit_id: UnitId,
        function: FunctionCode,
        pdu: &[u8],
    ) -> Result<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        let fn_metrics = self.metrics.for_function(function);
        let attempts = if self.opts.auto_reconnect {
            self.opts.max_retries.max(1)
        } else {
            1
        };

        let mut last_err = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                debug!(attempt = attempt + 1, max = attempts, "retrying request");
                match self.reconnect().await {
                    Ok(()) => {}
                    Err(err @ Error::ConnectionClosed) => return Err(err),
                    Err(err) => {
                        last_err = Some(err);
                        continue;
                    }
                }
            }

            match self.transact(unit_id, function, pdu, &fn_metrics).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if matches!(
                        err,
                        Error::Transport(_) | Error::InvalidFrame(_) | Error::InvalidResponse(_)
                    ) {
                        self.handle_disconnect(&err).await;
                    }
                    if !self.opts.auto_reconnect || !err.is_retryable() {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(Error::RetriesExhausted(Box::new(
            last_err.unwrap_or(Error::NotConnected),
        )))
    }

    /// One transaction: build frame, round-trip, validate, decode.
    async fn transact(
        &self,
        unit_id: UnitId,
        function: FunctionCode,
        pdu: &[u8],
        fn_metrics: &FunctionMetrics,
    ) -> Result<Response> {
        if self.state() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        let start = Instant::now();
        self.metrics.requests_total.inc();
        fn_metrics.requests.inc();

        let record_error = |err: Error| {
            self.metrics.requests_errors.inc();
            fn_metrics.errors.inc();
            err
        };

        let transaction_id = self.tx_id.next();
        let frame = codec::tcp::encode_frame(
            Header {
                transaction_id,
                unit_id,
            },
            pdu,
        );

        debug!(
            tx_id = transaction_id,
            unit_id,
            func = %function,
            "sending request"
        );

        let raw = self
            .transport
            .send(&frame, &self.cancel)
            .await
            .map_err(record_error)?;

        let (hdr, rsp_pdu) = codec::tcp::decode_frame(&raw).map_err(record_error)?;
        if hdr.transaction_id != transaction_id {
            return Err(record_error(Error::InvalidResponse(format!(
                "transaction ID mismatch (expected {transaction_id}, got {})",
                hdr.transaction_id
            ))));
        }
        if hdr.unit_id != unit_id {
            return Err(record_error(Error::InvalidResponse(format!(
                "unit ID mismatch (expected {unit_id}, got {})",
                hdr.unit_id
            ))));
        }

        let ResponsePdu(result) = rsp_pdu.try_into().map_err(record_error)?;
        let response = match result {
            Ok(response) => response,
            Err(exception) => return Err(record_error(exception.into())),
        };
        if response.function_code() != function {
            return Err(record_error(Error::InvalidResponse(format!(
                "function code mismatch (expected {:02X}, got {:02X})",
                function.value(),
                response.function_code().value()
            ))));
        }

        let elapsed = start.elapsed();
        self.metrics.requests_success.inc();
        self.metrics.latency.observe(elapsed);
        fn_metrics.latency.observe(elapsed);

        debug!(
            tx_id = transaction_id,
            duration_ms = elapsed.as_millis() as u64,
            "received response"
        );
        Ok(response)
    }

    /// Read multiple coils (0x01) from the default unit.
    pub async fn read_coils(&self, addr: Address, quantity: Quantity) -> Result<Vec<bool>> {
        self.read_coils_unit(self.unit_id(), addr, quantity).await
    }

    /// Read multiple coils (0x01) from an explicit unit.
    pub async fn read_coils_unit(
        &self,
        unit_id: UnitId,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<bool>> {
        let rsp = self
            .send_request(unit_id, Request::ReadCoils(addr, quantity))
            .await?;
        match rsp {
            Response::ReadCoils(coils) => take_bits(coils, quantity),
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }

    /// Read multiple discrete inputs (0x02) from the default unit.
    pub async fn read_discrete_inputs(
        &self,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<bool>> {
        self.read_discrete_inputs_unit(self.unit_id(), addr, quantity)
            .await
    }

    /// Read multiple discrete inputs (0x02) from an explicit unit.
    pub async fn read_discrete_inputs_unit(
        &self,
        unit_id: UnitId,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<bool>> {
        let rsp = self
            .send_request(unit_id, Request::ReadDiscreteInputs(addr, quantity))
            .await?;
        match rsp {
            Response::ReadDiscreteInputs(inputs) => take_bits(inputs, quantity),
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }

    /// Read multiple holding registers (0x03) from the default unit.
    pub async fn read_holding_registers(
        &self,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<u16>> {
        self.read_holding_registers_unit(self.unit_id(), addr, quantity)
            .await
    }

    /// Read multiple holding registers (0x03) from an explicit unit.
    pub async fn read_holding_registers_unit(
        &self,
        unit_id: UnitId,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<u16>> {
        let rsp = self
            .send_request(unit_id, Request::ReadHoldingRegisters(addr, quantity))
            .await?;
        match rsp {
            Response::ReadHoldingRegisters(words) => check_word_count(words, quantity),
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }

    /// Read multiple input registers (0x04) from the default unit.
    pub async fn read_input_registers(
        &self,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<u16>> {
        self.read_input_registers_unit(self.unit_id(), addr, quantity)
            .await
    }

    /// Read multiple input registers (0x04) from an explicit unit.
    pub async fn read_input_registers_unit(
        &self,
        unit_id: UnitId,
        addr: Address,
        quantity: Quantity,
    ) -> Result<Vec<u16>> {
        let rsp = self
            .send_request(unit_id, Request::ReadInputRegisters(addr, quantity))
            .await?;
        match rsp {
            Response::ReadInputRegisters(words) => check_word_count(words, quantity),
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }

    /// Write a single coil (0x05) on the default unit.
    pub async fn write_single_coil(&self, addr: Address, value: bool) -> Result<()> {
        self.write_single_coil_unit(self.unit_id(), addr, value)
            .await
    }

    /// Write a single coil (0x05) on an explicit unit.
    pub async fn write_single_coil_unit(
        &self,
        unit_id: UnitId,
        addr: Address,
        value: bool,
    ) -> Result<()> {
        let rsp = self
            .send_request(unit_id, Request::WriteSingleCoil(addr, value))
            .await?;
        match rsp {
            Response::WriteSingleCoil(rsp_addr, rsp_value) => {
                check_write_echo(rsp_addr == addr && rsp_value == value)
            }
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }

    /// Write a single holding register (0x06) on the default unit.
    pub async fn write_single_register(&self, addr: Address, value: u16) -> Result<()> {
        self.write_single_register_unit(self.unit_id(), addr, value)
            .await
    }

    /// Write a single holding register (0x06) on an explicit unit.
    pub async fn write_single_register_unit(
        &self,
        unit_id: UnitId,
        addr: Address,
        value: u16,
    ) -> Result<()> {
        let rsp = self
            .send_request(unit_id, Request::WriteSingleRegister(addr, value))
            .await?;
        match rsp {
            Response::WriteSingleRegister(rsp_addr, rsp_value) => {
                check_write_echo(rsp_addr == addr && rsp_value == value)
            }
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }

    /// Write multiple coils (0x0F) on the default unit.
    pub async fn write_multiple_coils(&self, addr: Address, values: &[bool]) -> Result<()> {
        self.write_multiple_coils_unit(self.unit_id(), addr, values)
            .await
    }

    /// Write multiple coils (0x0F) on an explicit unit.
    pub async fn write_multiple_coils_unit(
        &self,
        unit_id: UnitId,
        addr: Address,
        values: &[bool],
    ) -> Result<()> {
        let quantity = values.len();
        let rsp = self
            .send_request(
                unit_id,
                Request::WriteMultipleCoils(addr, Cow::Borrowed(values)),
            )
            .await?;
        match rsp {
            Response::WriteMultipleCoils(rsp_addr, rsp_quantity) => {
                check_write_echo(rsp_addr == addr && usize::from(rsp_quantity) == quantity)
            }
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }

    /// Write multiple holding registers (0x10) on the default unit.
    pub async fn write_multiple_registers(&self, addr: Address, values: &[u16]) -> Result<()> {
        self.write_multiple_registers_unit(self.unit_id(), addr, values)
            .await
    }

    /// Write multiple holding registers (0x10) on an explicit unit.
    pub async fn write_multiple_registers_unit(
        &self,
        unit_id: UnitId,
        addr: Address,
        values: &[u16],
    ) -> Result<()> {
        let quantity = values.len();
        let rsp = self
            .send_request(
                unit_id,
                Request::WriteMultipleRegisters(addr, Cow::Borrowed(values)),
            )
            .await?;
        match rsp {
            Response::WriteMultipleRegisters(rsp_addr, rsp_quantity) => {
                check_write_echo(rsp_addr == addr && usize::from(rsp_quantity) == quantity)
            }
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }

    /// Read the exception status byte (0x07) of the default unit.
    pub async fn read_exception_status(&self) -> Result<u8> {
        self.read_exception_status_unit(self.unit_id()).await
    }

    /// Read the exception status byte (0x07) of an explicit unit.
    pub async fn read_exception_status_unit(&self, unit_id: UnitId) -> Result<u8> {
        let rsp = self
            .send_request(unit_id, Request::ReadExceptionStatus)
            .await?;
        match rsp {
            Response::ReadExceptionStatus(status) => Ok(status),
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }

    /// Perform a diagnostic operation (0x08) on the default unit.
    pub async fn diagnostics(&self, sub_function: u16, data: &[u8]) -> Result<Vec<u8>> {
        self.diagnostics_unit(self.unit_id(), sub_function, data)
            .await
    }

    /// Perform a diagnostic operation (0x08) on an explicit unit.
    pub async fn diagnostics_unit(
        &self,
        unit_id: UnitId,
        sub_function: u16,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let rsp = self
            .send_request(
                unit_id,
                Request::Diagnostics(sub_function, Cow::Borrowed(data)),
            )
            .await?;
        match rsp {
            Response::Diagnostics(_, data) => Ok(data.to_vec()),
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }

    /// Get the communication event counter (0x0B) of the default unit.
    pub async fn get_comm_event_counter(&self) -> Result<(u16, u16)> {
        self.get_comm_event_counter_unit(self.unit_id()).await
    }

    /// Get the communication event counter (0x0B) of an explicit unit.
    pub async fn get_comm_event_counter_unit(&self, unit_id: UnitId) -> Result<(u16, u16)> {
        let rsp = self
            .send_request(unit_id, Request::GetCommEventCounter)
            .await?;
        match rsp {
            Response::GetCommEventCounter(status, event_count) => Ok((status, event_count)),
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }

    /// Request the server identification (0x11) of the default unit.
    pub async fn report_server_id(&self) -> Result<Vec<u8>> {
        self.report_server_id_unit(self.unit_id()).await
    }

    /// Request the server identification (0x11) of an explicit unit.
    pub async fn report_server_id_unit(&self, unit_id: UnitId) -> Result<Vec<u8>> {
        let rsp = self.send_request(unit_id, Request::ReportServerId).await?;
        match rsp {
            Response::ReportServerId(data) => Ok(data.to_vec()),
            _ => unreachable!("send_request rejects mismatching responses"),
        }
    }
}

/// Verifies the byte count of a bit response and truncates the unpacked
/// bits to the requested quantity.
fn take_bits(mut bits: Vec<bool>, quantity: Quantity) -> Result<Vec<bool>> {
    let expected = (usize::from(quantity) + 7) / 8 * 8;
    if bits.len() != expected {
        return Err(Error::InvalidResponse(format!(
            "invalid byte count (expected {} bits, got {})",
            expected,
            bits.len()
        )));
    }
    bits.truncate(quantity.into());
    Ok(bits)
}

/// Verifies the register count of a word response.
fn check_word_count(words: Vec<u16>, quantity: Quantity) -> Result<Vec<u16>> {
    if words.len() != usize::from(quantity) {
        return Err(Error::InvalidResponse(format!(
            "invalid byte count (expected {} registers, got {})",
            quantity,
            words.len()
        )));
    }
    Ok(words)
}

fn check_write_echo(matches: bool) -> Result<()> {
    if matches {
        Ok(())
    } else {
        Err(Error::InvalidResponse("write echo mismatch".into()))
    }
}
