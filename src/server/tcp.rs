use std::{future::Future, io, net::SocketAddr};

use futures_util::{FutureExt as _, SinkExt as _, StreamExt as _};
use socket2::{Domain, Socket, Type};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};
use tokio_util::codec::Framed;

use crate::{
    codec::tcp::ServerCodec,
    frame::{RequestAdu, ResponseAdu},
};

use super::Service;

/// Server termination status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminated {
    /// Server finished normally
    Finished,
    /// Server was aborted by signal
    Aborted,
}

/// Accept unencrypted TCP connections.
pub fn accept_tcp_connection<S, NewService>(
    stream: TcpStream,
    socket_addr: SocketAddr,
    new_service: NewService,
) -> io::Result<Option<(S, TcpStream)>>
where
    S: Service<Request = RequestAdu<'static>, Response = ResponseAdu> + Send + Sync + 'static,
    S::Exception: Send,
    NewService: Fn(SocketAddr) -> io::Result<Option<S>>,
{
    let service = new_service(socket_addr)?;
    Ok(service.map(|service| (service, stream)))
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self { listener }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Listens for incoming connections and starts a Modbus TCP server task
    /// for each connection.
    ///
    /// `OnConnected` is responsible for creating both the service and the
    /// transport layer for the underlying TCP stream. If `OnConnected` returns
    /// with `Err` then listening stops and [`Self::serve()`] returns with an error.
    /// If `OnConnected` returns `Ok(None)` then the connection is rejected
    /// but [`Self::serve()`] continues listening for new connections.
    pub async fn serve<S, T, F, OnConnected, OnProcessError>(
        &self,
        on_connected: &OnConnected,
        on_process_error: OnProcessError,
    ) -> io::Result<()>
    where
        S: Service<Request = RequestAdu<'static>, Response = ResponseAdu> + Send + Sync + 'static,
        S::Exception: Send + std::fmt::Debug,
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        OnConnected: Fn(TcpStream, SocketAddr) -> F,
        F: Future<Output = io::Result<Option<(S, T)>>>,
        OnProcessError: FnOnce(io::Error) + Clone + Send + 'static,
    {
        loop {
            let (stream, socket_addr) = self.listener.accept().await?;
            log::info!("Client connected: {socket_addr}");

            let Some((service, transport)) = on_connected(stream, socket_addr).await? else {
                log::debug!("No service for connection from {socket_addr}");
                continue;
            };
            let on_process_error = on_process_error.clone();

            let framed = Framed::new(transport, ServerCodec);

            tokio::spawn(async move {
                if let Err(err) = process(framed, service).await {
                    on_process_error(err);
                }
                log::info!("Client disconnected: {socket_addr}");
            });
        }
    }

    /// Start an abortable Modbus TCP server task.
    ///
    /// Warning: Request processing is not scoped and could be aborted at any internal await point!
    /// See also: <https://rust-lang.github.io/wg-async/vision/roadmap/scopes.html#cancellation>
    pub async fn serve_until<S, T, F, X, OnConnected, OnProcessError>(
        self,
        on_connected: &OnConnected,
        on_process_error: OnProcessError,
        abort_signal: X,
    ) -> io::Result<Terminated>
    where
        S: Service<Request = RequestAdu<'static>, Response = ResponseAdu> + Send + Sync + 'static,
        S::Exception: Send + std::fmt::Debug,
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        X: Future<Output = ()> + Sync + Send + Unpin + 'static,
        OnConnected: Fn(TcpStream, SocketAddr) -> F,
        F: Future<Output = io::Result<Option<(S, T)>>>,
        OnProcessError: FnOnce(io::Error) + Clone + Send + 'static,
    {
        let abort_signal = abort_signal.fuse();
        tokio::select! {
            res = self.serve(on_connected, on_process_error) => {
                res.map(|()| Terminated::Finished)
            },
            () = abort_signal => {
                Ok(Terminated::Aborted)
            }
        }
    }
}

/// The request-response loop spawned by [`Server::serve`] for each client.
///
/// Requests on one connection are answered strictly in arrival order. A
/// service exception closes the connection without a response.
async fn process<S, T>(mut framed: Framed<T, ServerCodec>, service: S) -> io::Result<()>
where
    S: Service<Request = RequestAdu<'static>, Response = ResponseAdu> + Send + Sync + 'static,
    S::Exception: Send + std::fmt::Debug,
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let Some(request) = framed.next().await.transpose().inspect_err(|err| {
            log::debug!("Failed to receive and decode request: {err}");
        })?
        else {
            log::debug!("TCP socket has been closed");
            break;
        };

        let hdr = request.hdr;
        let fc = request.pdu.0.function_code();

        match service.call(request).await {
            Ok(response) => {
                framed.send(response).await.inspect_err(|err| {
                    log::debug!("Failed to send response (function = {fc}): {err}");
                })?;
            }
            Err(exc) => {
                log::warn!("Dropping connection after function {fc} ({hdr:?}): {exc:?}");
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    format!("{exc:?}"),
                ));
            }
        }
    }

    Ok(())
}

/// Start TCP listener - configure and open TCP socket
pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let listener = match addr {
        SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
        SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
    };
    configure_tcp(&listener)?;
    listener.set_nonblocking(true)?;
    listener.bind(&addr.into())?;
    listener.listen(1024)?;
    TcpListener::from_std(listener.into())
}

#[cfg(unix)]
fn configure_tcp(tcp: &Socket) -> io::Result<()> {
    // 允许进程重启后立即复用端口
    tcp.set_reuse_address(true)
}

#[cfg(not(unix))]
fn configure_tcp(_tcp: &Socket) -> io::Result<()> {
    Ok(())
}
