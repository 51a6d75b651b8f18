use std::collections::HashMap;
use std::sync::Arc;

use mrpc_common::codec::{lookup_codec, Body, Codec, CodecWriter};
use mrpc_common::transport::{BoxedConnection, Connection};
use mrpc_common::{Header, MrpcError, Preamble, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

use crate::service::{Argv, MethodType, RpcService, Service};

/// mrpc server dispatching calls to registered services.
///
/// Services are registered up front through `&mut Server`; the server is then
/// shared as `Arc<Server>` and the dispatch table is never modified again.
///
/// Each connection is served by one task that reads requests in order and
/// hands each one to its own dispatch task. Responses from concurrent
/// dispatch tasks are serialized by a per-connection send lock, so they may be
/// written in any order but never interleave.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use mrpc_server::{Methods, RpcService, Server};
///
/// struct Echo;
///
/// impl Echo {
///     fn say(&self, text: String, reply: &mut String) -> Result<(), String> {
///         *reply = text;
///         Ok(())
///     }
/// }
///
/// impl RpcService for Echo {
///     fn register_methods(methods: &mut Methods<Self>) {
///         methods.method("Say", Self::say);
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut server = Server::new();
/// server.register(Echo)?;
///
/// Arc::new(server).serve("127.0.0.1:9000").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Server {
    services: HashMap<String, Arc<Service>>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `rcvr` under the name of its type.
    ///
    /// # Errors
    ///
    /// - `InvalidServiceName` if the type name does not start with an uppercase letter
    /// - `DuplicateService` if a service with the same name is already registered
    pub fn register<S: RpcService>(&mut self, rcvr: S) -> Result<()> {
        let service = Service::new(rcvr)?;
        if self.services.contains_key(service.name()) {
            return Err(MrpcError::DuplicateService(service.name().to_string()));
        }
        self.services
            .insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Resolves `"Service.Method"` to its method.
    ///
    /// The name is split on the last `.`.
    pub fn find(&self, service_method: &str) -> Result<Arc<MethodType>> {
        let (service_name, method_name) = service_method
            .rsplit_once('.')
            .ok_or_else(|| MrpcError::IllFormedRequest(service_method.to_string()))?;

        let service = self
            .services
            .get(service_name)
            .ok_or_else(|| MrpcError::ServiceNotFound(service_name.to_string()))?;

        service
            .method(method_name)
            .cloned()
            .ok_or_else(|| MrpcError::MethodNotFound {
                service: service_name.to_string(),
                method: method_name.to_string(),
            })
    }

    /// Number of times `"Service.Method"` has been invoked, if it exists.
    pub fn num_calls(&self, service_method: &str) -> Option<u64> {
        self.find(service_method).ok().map(|m| m.num_calls())
    }

    pub fn service(&self, name: &str) -> Option<&Arc<Service>> {
        self.services.get(name)
    }

    /// Binds `bind_addr` and serves connections until the task is dropped.
    pub async fn serve(self: Arc<Self>, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| MrpcError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        match listener.local_addr() {
            Ok(addr) => tracing::info!("rpc server listening on {}", addr),
            Err(_) => tracing::info!("rpc server listening on {}", bind_addr),
        }

        self.accept(listener).await;
        Ok(())
    }

    /// Accepts connections from `listener`, serving each on its own task.
    ///
    /// Accept errors are logged and the loop carries on; this only returns if
    /// the surrounding task is dropped.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("rpc server: listener accept error: {}", e);
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%peer_addr, "rpc server: set_nodelay failed: {}", e);
            }
            tracing::info!("rpc server: connection established from {}", peer_addr);

            let server = self.clone();
            tokio::spawn(async move {
                server.serve_conn(stream).await;
                tracing::debug!(%peer_addr, "rpc server: connection closed");
            });
        }
    }

    /// Serves a single connection until the peer disconnects.
    ///
    /// Reads the preamble first. A wrong magic number or an unknown codec type
    /// closes the connection without any response.
    pub async fn serve_conn(&self, conn: impl Connection) {
        let mut conn: BoxedConnection = Box::new(conn);

        let preamble = match Preamble::read_from(&mut conn).await {
            Ok(preamble) => preamble,
            Err(e) => {
                tracing::warn!("rpc server: read preamble error: {}", e);
                let _ = conn.shutdown().await;
                return;
            }
        };

        if let Err(e) = preamble.validate() {
            tracing::warn!("rpc server: {}", e);
            let _ = conn.shutdown().await;
            return;
        }

        let Some(new_codec) = lookup_codec(preamble.codec_type) else {
            tracing::warn!("rpc server: invalid codec type {}", preamble.codec_type);
            let _ = conn.shutdown().await;
            return;
        };

        self.serve_codec(new_codec(conn)).await;
    }

    /// Serves requests arriving on `codec` until the stream ends or faults.
    ///
    /// Every request is dispatched on its own task. Once reading stops, the
    /// tasks already dispatched are awaited before the connection is closed.
    pub async fn serve_codec(&self, codec: Codec) {
        let format = codec.format();
        let (mut reader, writer) = codec.split();
        let sending = Arc::new(Mutex::new(writer));
        let tracker = TaskTracker::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(e) if e.is_eof() => break,
                Err(e) => {
                    tracing::warn!("rpc server: read request header error: {}", e);
                    break;
                }
            };

            tracing::debug!(
                seq = header.seq,
                service_method = %header.service_method,
                "rpc server: received request"
            );

            let method = match self.find(&header.service_method) {
                Ok(method) => method,
                Err(e) => {
                    // The body still has to be consumed to reach the next header
                    if let Err(e) = reader.discard_body().await {
                        tracing::warn!("rpc server: read request body error: {}", e);
                        break;
                    }
                    let sending = sending.clone();
                    tracker.spawn(async move {
                        write_response(&sending, &header.with_error(e.to_string()), &()).await;
                    });
                    continue;
                }
            };

            let body = match reader.read_raw_body().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!("rpc server: read request body error: {}", e);
                    break;
                }
            };

            let argv = match method.decode_argv(format, &body) {
                Ok(argv) => argv,
                Err(e) => {
                    let error = format!("rpc server: read request body error: {}", e);
                    let sending = sending.clone();
                    tracker.spawn(async move {
                        write_response(&sending, &header.with_error(error), &()).await;
                    });
                    continue;
                }
            };

            tracker.spawn(handle_request(sending.clone(), header, method, argv));
        }

        tracker.close();
        tracker.wait().await;

        if let Err(e) = sending.lock().await.close().await {
            tracing::debug!("rpc server: close error: {}", e);
        };
    }
}

/// Invokes the method and writes its reply, or its error, back.
async fn handle_request(sending: Arc<Mutex<CodecWriter>>, header: Header, method: Arc<MethodType>, argv: Argv) {
    let invoked = tokio::task::spawn_blocking(move || method.call(argv)).await;

    let empty = || -> Box<dyn Body> { Box::new(()) };
    let (header, reply) = match invoked {
        Ok(Ok(reply)) => (header, reply),
        Ok(Err(error)) => (header.with_error(error), empty()),
        Err(e) => {
            tracing::error!(
                seq = header.seq,
                service_method = %header.service_method,
                "rpc server: method failed: {}",
                e
            );
            let error = if e.is_panic() {
                format!("rpc server: method {} panicked", header.service_method)
            } else {
                format!("rpc server: method {} was cancelled", header.service_method)
            };
            (header.with_error(error), empty())
        }
    };

    write_response(&sending, &header, reply.as_ref()).await;
}

/// Writes one response under the send lock.
async fn write_response(sending: &Mutex<CodecWriter>, header: &Header, body: &dyn Body) {
    let mut writer = sending.lock().await;
    match writer.write(header, body).await {
        Ok(()) => tracing::debug!(
            seq = header.seq,
            error = %header.error,
            "rpc server: sent response"
        ),
        Err(e) => tracing::warn!("rpc server: write response error: {}", e),
    }
}
