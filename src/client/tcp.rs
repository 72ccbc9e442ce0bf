use std::{io, net::SocketAddr};

use async_trait::async_trait;
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::{
    codec::tcp::ClientCodec,
    frame::{Header, ProtocolError, RequestAdu, TransactionId, UnitId},
    Error,
};

use super::{Client, Context, Request, Response};

/// Connects to a Modbus TCP device and addresses requests to `unit_id`.
pub async fn connect(socket_addr: SocketAddr, unit_id: UnitId) -> io::Result<Context<TcpClient>> {
    let stream = TcpStream::connect(socket_addr).await?;
    log::debug!("Connected to {socket_addr}");
    Ok(Context::new(TcpClient::new(stream, unit_id)))
}

#[derive(Debug)]
pub struct TcpClient {
    framed: Framed<TcpStream, ClientCodec>,
    unit_id: UnitId,
    transaction_id: TransactionId,
}

impl TcpClient {
    pub fn new(stream: TcpStream, unit_id: UnitId) -> Self {
        Self {
            framed: Framed::new(stream, ClientCodec),
            unit_id,
            transaction_id: 0,
        }
    }

    fn next_header(&mut self) -> Header {
        // 事务号递增，溢出后回绕
        self.transaction_id = self.transaction_id.wrapping_add(1);
        Header {
            transaction_id: self.transaction_id,
            unit_id: self.unit_id,
        }
    }
}

#[async_trait]
impl Client for TcpClient {
    async fn call(&mut self, request: Request<'_>) -> Result<Response, Error> {
        let hdr = self.next_header();
        let function = request.function_code();
        log::debug!("Sending request {hdr:?}: {request:?}");

        self.framed
            .send(RequestAdu {
                hdr,
                pdu: request.into(),
            })
            .await?;

        let rsp = self
            .framed
            .next()
            .await
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))??;

        if rsp.hdr != hdr {
            return Err(ProtocolError::HeaderMismatch {
                expected: hdr,
                actual: rsp.hdr,
            }
            .into());
        }

        let rsp = rsp.pdu.0?;
        if rsp.function_code() != function {
            return Err(ProtocolError::FunctionMismatch {
                expected: function,
                actual: rsp.function_code(),
            }
            .into());
        }
        Ok(rsp)
    }
}
