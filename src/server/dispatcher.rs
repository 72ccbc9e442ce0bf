//! Request validation and execution against the register store.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{
    frame::*,
    store::{register_number, RegisterStore, StoreError, Table},
};

use super::{
    fault::{FaultInjector, FaultPolicy, FaultPolicyError, SimulatedFault},
    Service,
};

/// Unit ids that every Modbus TCP device accepts besides its own.
const BROADCAST_UNIT_IDS: [UnitId; 2] = [0x00, 0xFF];

/// Serves Modbus requests from a shared [`RegisterStore`].
///
/// Cloning is cheap; all clones share the store and the fault policy.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<RegisterStore>,
    faults: Arc<FaultInjector>,
    unit_id: Option<UnitId>,
    max_read_quantity: Quantity,
}

impl Dispatcher {
    pub fn new(store: Arc<RegisterStore>) -> Self {
        Self {
            store,
            faults: Arc::new(FaultInjector::default()),
            unit_id: None,
            max_read_quantity: MAX_READ_QUANTITY,
        }
    }

    /// Only answer requests for `unit_id` (and the broadcast ids 0 / 255).
    #[must_use]
    pub fn with_unit_id(mut self, unit_id: UnitId) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    /// Lower the per-request read limit; values above 125 are capped.
    #[must_use]
    pub fn with_max_read_quantity(mut self, max: Quantity) -> Self {
        self.max_read_quantity = max.clamp(1, MAX_READ_QUANTITY);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<RegisterStore> {
        &self.store
    }

    /// Enables fault injection for every connection served by this
    /// dispatcher and its clones.
    pub fn set_fault_policy(
        &self,
        error_rate: f64,
        delay_seconds: f64,
    ) -> Result<(), FaultPolicyError> {
        self.faults.set(FaultPolicy::new(error_rate, delay_seconds)?);
        Ok(())
    }

    pub fn clear_fault_policy(&self) {
        self.faults.clear();
    }

    #[must_use]
    pub fn fault_policy(&self) -> Option<FaultPolicy> {
        self.faults.policy()
    }

    fn serves_unit(&self, unit_id: UnitId) -> bool {
        match self.unit_id {
            Some(own) => unit_id == own || BROADCAST_UNIT_IDS.contains(&unit_id),
            None => true,
        }
    }

    /// Validates and executes one request. The header is echoed on every
    /// branch.
    pub fn handle(&self, req: RequestAdu<'_>) -> ResponseAdu {
        let hdr = req.hdr;
        let request = req.pdu.0;
        let function = request.function_code();

        if !self.serves_unit(hdr.unit_id) {
            log::warn!(
                "Request for unit {} ignored, serving unit {:?}",
                hdr.unit_id,
                self.unit_id
            );
            return ResponseAdu::exception(hdr, function, ExceptionCode::GatewayTargetDevice);
        }

        match self.execute(request) {
            Ok(rsp) => ResponseAdu {
                hdr,
                pdu: rsp.into(),
            },
            Err(exception) => {
                log::warn!(
                    "Exception {exception:?} for function {function} (transaction {})",
                    hdr.transaction_id
                );
                ResponseAdu::exception(hdr, function, exception)
            }
        }
    }

    fn execute(&self, request: Request<'_>) -> Result<Response, ExceptionCode> {
        match request {
            Request::ReadHoldingRegisters(addr, qty) => self
                .read(Table::Holding, addr, qty)
                .map(Response::ReadHoldingRegisters),
            Request::ReadInputRegisters(addr, qty) => self
                .read(Table::Input, addr, qty)
                .map(Response::ReadInputRegisters),
            Request::WriteSingleRegister(addr, word) => {
                self.write(addr, &[word])?;
                Ok(Response::WriteSingleRegister(addr, word))
            }
            Request::WriteMultipleRegisters(addr, words) => {
                if words.is_empty() || words.len() > usize::from(MAX_WRITE_QUANTITY) {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                self.write(addr, &words)?;
                Ok(Response::WriteMultipleRegisters(addr, words.len() as Quantity))
            }
            Request::Custom(code, _) => {
                log::warn!("Unsupported function code 0x{code:02X}");
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }

    fn read(&self, table: Table, addr: Address, qty: Quantity) -> Result<Vec<Word>, ExceptionCode> {
        // 数量为 0 按地址越界处理，超过上限按非法数据值处理
        if qty > self.max_read_quantity {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let values = self.store.read(table, addr, qty).map_err(store_exception)?;
        log::debug!(
            "Read {qty} {table} registers from {} (address {addr}): {values:?}",
            register_number(table, addr)
        );
        Ok(values)
    }

    fn write(&self, addr: Address, words: &[Word]) -> Result<(), ExceptionCode> {
        self.store
            .write(Table::Holding, addr, words)
            .map_err(store_exception)?;
        log::debug!(
            "Wrote {} holding registers at {} (address {addr}): {words:?}",
            words.len(),
            register_number(Table::Holding, addr)
        );
        Ok(())
    }
}

fn store_exception(err: StoreError) -> ExceptionCode {
    match err {
        StoreError::OutOfRange { .. } => ExceptionCode::IllegalDataAddress,
        StoreError::Generator { .. } | StoreError::InvalidCapacity(_) => {
            log::error!("Register store failure: {err}");
            ExceptionCode::ServerDeviceFailure
        }
    }
}

impl Service for Dispatcher {
    type Request = RequestAdu<'static>;
    type Response = ResponseAdu;
    type Exception = SimulatedFault;
    type Future = Pin<Box<dyn Future<Output = Result<ResponseAdu, SimulatedFault>> + Send>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let (delay, fail) = self.faults.plan();
        let dispatcher = self.clone();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                log::warn!("Injecting fault for transaction {}", req.hdr.transaction_id);
                return Err(SimulatedFault { hdr: req.hdr });
            }
            Ok(dispatcher.handle(req))
        })
    }
}
