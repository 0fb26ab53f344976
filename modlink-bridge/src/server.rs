//! Modbus TCP server exposing a [`SlaveContext`].

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_modbus::server::tcp::{Server, accept_tcp_connection};
use tracing::{info, warn};

use crate::context::SlaveContext;
use crate::service::BridgeService;

/// A bound Modbus TCP server.
///
/// Every accepted connection gets its own [`BridgeService`]; all of them
/// share one slave context.
pub struct BridgeServer {
    listener: TcpListener,
    context: Arc<SlaveContext>,
}

impl BridgeServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, context: Arc<SlaveContext>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, context })
    }

    /// Address the server is actually listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections forever.
    pub async fn serve(self) -> io::Result<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Serve connections until `shutdown` resolves.
    ///
    /// A failing connection only ends that connection.
    pub async fn serve_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = self.listener.local_addr()?;
        let context = self.context;
        let mode = context.mode();

        info!(address = %local_addr, mode, "Modbus TCP server listening");

        let server = Server::new(self.listener);
        let on_connected = |stream: TcpStream, socket_addr: SocketAddr| {
            let context = Arc::clone(&context);
            async move {
                info!(peer = %socket_addr, "Client connected");
                accept_tcp_connection(stream, socket_addr, move |peer| {
                    Ok(Some(BridgeService::new(Arc::clone(&context), peer)))
                })
            }
        };
        let on_process_error = |err: io::Error| {
            warn!(error = %err, "Connection terminated with error");
        };

        tokio::select! {
            result = server.serve(&on_connected, on_process_error) => result,
            _ = shutdown => {
                info!(address = %local_addr, "Modbus TCP server shutting down");
                Ok(())
            }
        }
    }
}
