//! Minimal asynchronous Modbus TCP client for exercising the simulator.

pub mod tcp;

use async_trait::async_trait;
use std::{borrow::Cow, fmt::Debug};

use crate::frame::*;
use crate::Error;

#[async_trait]
pub trait Client: Send + Debug {
    /// Invokes a _Modbus_ function. Exception responses are returned as
    /// [`Error::Exception`].
    async fn call(&mut self, request: Request<'_>) -> Result<Response, Error>;
}

#[async_trait]
pub trait Reader: Client {
    async fn read_holding_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error>;

    async fn read_input_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error>;
}

#[async_trait]
pub trait Writer: Client {
    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<(), Error>;

    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word])
        -> Result<(), Error>;
}

/// Asynchronous Modbus client context with generic transport
#[derive(Debug)]
pub struct Context<T: Client> {
    client: T,
}

impl<T: Client> Context<T> {
    pub fn new(client: T) -> Self {
        Self { client }
    }

    pub fn into_inner(self) -> T {
        self.client
    }
}

fn unexpected(expected: FunctionCode, rsp: &Response) -> Error {
    crate::frame::ProtocolError::FunctionMismatch {
        expected,
        actual: rsp.function_code(),
    }
    .into()
}

#[async_trait]
impl<T: Client> Client for Context<T> {
    async fn call(&mut self, request: Request<'_>) -> Result<Response, Error> {
        self.client.call(request).await
    }
}

#[async_trait]
impl<T: Client> Reader for Context<T> {
    async fn read_holding_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error> {
        match self
            .client
            .call(Request::ReadHoldingRegisters(addr, cnt))
            .await?
        {
            Response::ReadHoldingRegisters(words) => Ok(words),
            rsp => Err(unexpected(FunctionCode::ReadHoldingRegisters, &rsp)),
        }
    }

    async fn read_input_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error> {
        match self
            .client
            .call(Request::ReadInputRegisters(addr, cnt))
            .await?
        {
            Response::ReadInputRegisters(words) => Ok(words),
            rsp => Err(unexpected(FunctionCode::ReadInputRegisters, &rsp)),
        }
    }
}

#[async_trait]
impl<T: Client> Writer for Context<T> {
    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<(), Error> {
        match self
            .client
            .call(Request::WriteSingleRegister(addr, word))
            .await?
        {
            Response::WriteSingleRegister(..) => Ok(()),
            rsp => Err(unexpected(FunctionCode::WriteSingleRegister, &rsp)),
        }
    }

    async fn write_multiple_registers(
        &mut self,
        addr: Address,
        words: &[Word],
    ) -> Result<(), Error> {
        match self
            .client
            .call(Request::WriteMultipleRegisters(addr, Cow::Borrowed(words)))
            .await?
        {
            Response::WriteMultipleRegisters(..) => Ok(()),
            rsp => Err(unexpected(FunctionCode::WriteMultipleRegisters, &rsp)),
        }
    }
}
