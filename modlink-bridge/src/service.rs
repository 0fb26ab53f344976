//! Modbus TCP request handling on top of a [`SlaveContext`].

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio_modbus::prelude::*;
use tracing::{debug, error};

use crate::context::{ContextError, FunctionCode, SlaveContext};

/// Per-connection service dispatching requests to the shared slave context.
pub struct BridgeService {
    context: Arc<SlaveContext>,
    peer: SocketAddr,
}

impl BridgeService {
    pub fn new(context: Arc<SlaveContext>, peer: SocketAddr) -> Self {
        Self { context, peer }
    }
}

impl tokio_modbus::server::Service for BridgeService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Exception>> + Send>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let context = Arc::clone(&self.context);
        let peer = self.peer;

        Box::pin(async move {
            debug!(%peer, request = ?req, "Received request");

            match dispatch(&context, req).await {
                Ok(response) => {
                    debug!(%peer, response = ?response, "Sending response");
                    Ok(response)
                }
                Err(e) => {
                    let code = e.exception_code();
                    error!(%peer, error = %e, exception = ?code, "Request failed");
                    Err(code)
                }
            }
        })
    }
}

/// Function, then quantity, then address range.
fn check(
    context: &SlaveContext,
    function: FunctionCode,
    address: u16,
    count: u16,
) -> Result<(), ContextError> {
    if !context.supports(function) {
        return Err(ContextError::IllegalFunction(format!(
            "function 0x{:02X} is not served in {} mode",
            function.code(),
            context.mode()
        )));
    }

    if count == 0 || count > function.max_quantity() {
        return Err(ContextError::IllegalValue(format!(
            "quantity {} outside 1..={} for function 0x{:02X}",
            count,
            function.max_quantity(),
            function.code()
        )));
    }

    if !context.validate(function, address, count) {
        return Err(ContextError::IllegalAddress { address, count });
    }
    Ok(())
}

async fn read(
    context: &SlaveContext,
    function: FunctionCode,
    address: u16,
    count: u16,
) -> Result<Vec<u16>, ContextError> {
    check(context, function, address, count)?;
    context.get_values(function, address, count).await
}

async fn write(
    context: &SlaveContext,
    function: FunctionCode,
    address: u16,
    values: &[u16],
) -> Result<(), ContextError> {
    let count = u16::try_from(values.len())
        .map_err(|_| ContextError::IllegalValue(format!("{} values", values.len())))?;
    check(context, function, address, count)?;
    context.set_values(function, address, values).await
}

fn to_coils(values: Vec<u16>) -> Vec<bool> {
    values.into_iter().map(|v| v != 0).collect()
}

/// Execute a single request against the context.
pub async fn dispatch(
    context: &SlaveContext,
    request: Request<'static>,
) -> Result<Response, ContextError> {
    match request {
        Request::ReadCoils(address, count) => {
            read(context, FunctionCode::ReadCoils, address, count)
                .await
                .map(|values| Response::ReadCoils(to_coils(values)))
        }
        Request::ReadDiscreteInputs(address, count) => {
            read(context, FunctionCode::ReadDiscreteInputs, address, count)
                .await
                .map(|values| Response::ReadDiscreteInputs(to_coils(values)))
        }
        Request::ReadHoldingRegisters(address, count) => {
            read(context, FunctionCode::ReadHoldingRegisters, address, count)
                .await
                .map(Response::ReadHoldingRegisters)
        }
        Request::ReadInputRegisters(address, count) => {
            read(context, FunctionCode::ReadInputRegisters, address, count)
                .await
                .map(Response::ReadInputRegisters)
        }
        Request::WriteSingleCoil(address, coil) => {
            write(context, FunctionCode::WriteSingleCoil, address, &[u16::from(coil)])
                .await
                .map(|_| Response::WriteSingleCoil(address, coil))
        }
        Request::WriteMultipleCoils(address, coils) => {
            let values: Vec<u16> = coils.iter().map(|c| u16::from(*c)).collect();
            write(context, FunctionCode::WriteMultipleCoils, address, &values)
                .await
                .map(|_| Response::WriteMultipleCoils(address, values.len() as u16))
        }
        Request::WriteSingleRegister(address, value) => {
            write(context, FunctionCode::WriteSingleRegister, address, &[value])
                .await
                .map(|_| Response::WriteSingleRegister(address, value))
        }
        Request::WriteMultipleRegisters(address, values) => {
            write(context, FunctionCode::WriteMultipleRegisters, address, &values)
                .await
                .map(|_| Response::WriteMultipleRegisters(address, values.len() as u16))
        }
        other => Err(ContextError::IllegalFunction(format!("{:?}", other))),
    }
}
