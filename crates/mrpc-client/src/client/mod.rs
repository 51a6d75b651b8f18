use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mrpc_common::codec::{lookup_codec, Body, Codec, CodecReader, CodecType, CodecWriter, Format};
use mrpc_common::transport::{self, BoxedConnection, Connection};
use mrpc_common::{Header, MrpcError, Preamble, Result, Seq};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::call::{self, Call, Completion, Notify, Settle, Settlement, Waiter};
use crate::config::ClientConfig;

/// mrpc client multiplexing concurrent calls over a single connection.
///
/// Every call gets a sequence number and waits in a pending table until the
/// response carrying that number arrives. Responses may come back in any
/// order. One background task reads responses for the lifetime of the
/// connection; when the connection fails, every pending call settles with
/// [`MrpcError::Shutdown`] and the client stays unavailable.
///
/// Cloning is cheap and all clones share the connection. The connection is
/// closed by [`close`](Self::close) or when the last clone is dropped.
///
/// # Example
///
/// ```no_run
/// use mrpc_client::Client;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::dial("tcp", "127.0.0.1:9000").await?;
///
/// let sum: i64 = client.call("Arith.Add", &(1, 2)).await?;
/// assert_eq!(sum, 3);
///
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
    _cancel_on_drop: Arc<DropGuard>,
}

struct ClientInner {
    codec_type: CodecType,
    format: Format,
    /// Send lock. Always taken before `state`.
    sending: tokio::sync::Mutex<CodecWriter>,
    state: Mutex<ClientState>,
    cancel: CancellationToken,
}

struct ClientState {
    seq: Seq,
    pending: HashMap<Seq, Box<dyn Settle>>,
    /// Set by the user through `close`.
    closing: bool,
    /// Set once the connection has failed.
    shutdown: bool,
}

impl Client {
    /// Creates a client over an established connection.
    ///
    /// Sends the preamble announcing `codec_type` and starts the receive
    /// loop. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `InvalidCodec` if no codec is registered under `codec_type`
    /// - any I/O error while writing the preamble; the connection is closed
    pub async fn new(conn: impl Connection, codec_type: CodecType) -> Result<Self> {
        let new_codec = lookup_codec(codec_type).ok_or_else(|| {
            tracing::error!(codec_type, "rpc client: invalid codec type");
            MrpcError::InvalidCodec(codec_type)
        })?;

        let mut conn: BoxedConnection = Box::new(conn);
        if let Err(e) = Preamble::new(codec_type).write_to(&mut conn).await {
            tracing::warn!("rpc client: failed to send preamble: {}", e);
            let _ = conn.shutdown().await;
            return Err(e);
        }

        Ok(Self::with_codec(new_codec(conn)))
    }

    /// Creates a client over a codec whose preamble was already exchanged.
    pub fn with_codec(codec: Codec) -> Self {
        let codec_type = codec.codec_type();
        let format = codec.format();
        let (reader, writer) = codec.split();
        let cancel = CancellationToken::new();

        let inner = Arc::new(ClientInner {
            codec_type,
            format,
            sending: tokio::sync::Mutex::new(writer),
            state: Mutex::new(ClientState {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            cancel: cancel.clone(),
        });

        tokio::spawn(receive_loop(inner.clone(), reader));

        Self {
            inner,
            _cancel_on_drop: Arc::new(cancel.drop_guard()),
        }
    }

    /// Connects to `address` on `network` using the binary codec.
    pub async fn dial(network: &str, address: &str) -> Result<Self> {
        Self::dial_with_config(network, address, ClientConfig::default()).await
    }

    /// Connects to `address` on `network` with custom settings.
    ///
    /// # Arguments
    ///
    /// * `network` - `"tcp"` or `"unix"`
    /// * `address` - The address of the server
    /// * `config` - Codec and connect timeout
    pub async fn dial_with_config(network: &str, address: &str, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let conn = transport::connect(network, address, config.connect_timeout).await?;
        tracing::debug!(network, address, codec_type = config.codec_type, "rpc client: connected");
        Self::new(conn, config.codec_type).await
    }

    pub fn codec_type(&self) -> CodecType {
        self.inner.codec_type
    }

    /// Issues a call without waiting for its response.
    ///
    /// The returned [`Call`] resolves once the response arrives or the
    /// connection fails. If the client is closing or shut down, it resolves
    /// immediately with [`MrpcError::Shutdown`] and nothing is written.
    pub async fn go_call<A, R>(&self, service_method: &str, args: &A) -> Call<R>
    where
        A: Serialize + Send + Sync,
        R: DeserializeOwned + Send + 'static,
    {
        let (call, notify) = call::once(service_method);
        let seq = self.send(service_method, args, notify).await;
        call.assign(seq)
    }

    /// Issues a call whose completion is delivered on `done`.
    ///
    /// Several calls can share one channel. Delivery never waits: if `done`
    /// is full when the call settles, the completion is dropped with a
    /// warning, so size the channel for the calls in flight.
    ///
    /// # Returns
    ///
    /// The sequence number of the call, or `0` if it was never sent
    pub async fn go_call_with<A, R>(
        &self,
        service_method: &str,
        args: &A,
        done: mpsc::Sender<Completion<R>>,
    ) -> Seq
    where
        A: Serialize + Send + Sync,
        R: DeserializeOwned + Send + 'static,
    {
        self.send(service_method, args, Notify::Channel(done)).await
    }

    /// Calls `service_method` and waits for the reply.
    ///
    /// There is no deadline: a peer that stays connected but never answers
    /// blocks the caller. See [`call_timeout`](Self::call_timeout).
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + Send + Sync,
        R: DeserializeOwned + Send + 'static,
    {
        self.go_call(service_method, args).await.await
    }

    /// Like [`call`](Self::call), but gives up waiting for the response after
    /// `timeout`.
    ///
    /// On expiry the call is dropped from the pending table; a response that
    /// arrives later is read and discarded. The request itself is always
    /// written completely, the deadline only covers the wait for the reply.
    pub async fn call_timeout<A, R>(&self, service_method: &str, args: &A, timeout: Duration) -> Result<R>
    where
        A: Serialize + Send + Sync,
        R: DeserializeOwned + Send + 'static,
    {
        let call: Call<R> = self.go_call(service_method, args).await;
        let seq = call.seq();

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                self.inner.remove_call(seq);
                tracing::debug!(seq, service_method, "rpc client: call timed out");
                Err(MrpcError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Closes the connection.
    ///
    /// Calls still pending settle with [`MrpcError::Shutdown`].
    ///
    /// # Errors
    ///
    /// `AlreadyClosed` if the client was already closed or shut down.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            if state.closing || state.shutdown {
                return Err(MrpcError::AlreadyClosed);
            }
            state.closing = true;
        }

        // Writes in flight give up on cancellation and release the send lock
        self.inner.cancel.cancel();
        self.inner.sending.lock().await.close().await
    }

    /// Whether new calls can still be issued.
    pub fn is_available(&self) -> bool {
        let state = self.inner.state();
        !state.closing && !state.shutdown
    }

    async fn send<R>(&self, service_method: &str, args: &dyn Body, notify: Notify<R>) -> Seq
    where
        R: DeserializeOwned + Send + 'static,
    {
        let seq = match self.inner.register_call(service_method, notify) {
            Ok(seq) => seq,
            Err(waiter) => {
                Box::new(waiter).settle(Settlement::Error(MrpcError::Shutdown));
                return 0;
            }
        };

        let header = Header::request(seq, service_method);
        let body = match args.encode_with(self.inner.format) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(seq, service_method, "rpc client: failed to encode request: {}", e);
                self.inner.fail_call(seq, e);
                return seq;
            }
        };

        tracing::debug!(seq, service_method, "rpc client: sending request");

        // Own task: dropping this future must not cut a message short.
        let inner = self.inner.clone();
        let writing = tokio::spawn(async move {
            if let Err(e) = inner.write_request(&header, &body).await {
                inner.fail_call(header.seq, e);
            }
        });
        let _ = writing.await;

        seq
    }
}

impl ClientInner {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assigns the next sequence number and records the call as pending.
    /// Hands the waiter back if the client no longer accepts calls.
    fn register_call<R>(&self, service_method: &str, notify: Notify<R>) -> std::result::Result<Seq, Waiter<R>>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let mut state = self.state();
        if state.closing || state.shutdown {
            return Err(Waiter::new(0, service_method, notify));
        }

        let seq = state.seq;
        state.seq += 1;
        state
            .pending
            .insert(seq, Box::new(Waiter::new(seq, service_method, notify)));
        Ok(seq)
    }

    fn remove_call(&self, seq: Seq) -> Option<Box<dyn Settle>> {
        self.state().pending.remove(&seq)
    }

    /// Writes one request under the send lock, unless the client shuts down
    /// first. An interrupted write aborts the connection.
    async fn write_request(&self, header: &Header, body: &[u8]) -> Result<()> {
        let mut writer = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(MrpcError::Shutdown),
            writer = self.sending.lock() => writer,
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                writer.abort().await;
                Err(MrpcError::Shutdown)
            }
            result = writer.write_encoded(header, body) => result,
        }
    }

    /// Settles a call that could not be sent and shuts the client down.
    /// The receive loop then settles every other pending call.
    fn fail_call(&self, seq: Seq, err: MrpcError) {
        // The receive loop may already have settled it
        if let Some(call) = self.remove_call(seq) {
            call.settle(Settlement::Error(err));
        }
        self.state().shutdown = true;
        self.cancel.cancel();
    }

    /// Marks the client shut down and settles every pending call.
    async fn terminate_calls(&self, err: MrpcError) {
        let mut writer = self.sending.lock().await;
        let (closing, pending) = {
            let mut state = self.state();
            state.shutdown = true;
            (state.closing, std::mem::take(&mut state.pending))
        };

        if closing {
            tracing::debug!("rpc client: closed");
        } else if err.is_eof() {
            tracing::debug!("rpc client: connection closed by server");
        } else if matches!(err, MrpcError::Shutdown) {
            tracing::debug!("rpc client: shut down");
        } else {
            tracing::warn!("rpc client: protocol error: {}", err);
        }

        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "rpc client: terminating pending calls");
        }
        for (_, call) in pending {
            call.settle(Settlement::Error(MrpcError::Shutdown));
        }

        let _ = writer.close().await;
    }
}

async fn until_cancelled<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(MrpcError::Shutdown),
        result = fut => result,
    }
}

async fn receive_loop(inner: Arc<ClientInner>, mut reader: CodecReader) {
    let cancel = inner.cancel.clone();

    let err = loop {
        let header = match until_cancelled(&cancel, reader.read_header()).await {
            Ok(header) => header,
            Err(e) => break e,
        };

        let Some(call) = inner.remove_call(header.seq) else {
            // Removed by a failed send or an expired deadline.
            tracing::debug!(seq = header.seq, "rpc client: discarding response for unknown call");
            if let Err(e) = until_cancelled(&cancel, reader.discard_body()).await {
                break e;
            }
            continue;
        };

        if header.is_error() {
            let discarded = until_cancelled(&cancel, reader.discard_body()).await;
            call.settle(Settlement::Error(MrpcError::Call(header.error)));
            if let Err(e) = discarded {
                break e;
            }
            continue;
        }

        match until_cancelled(&cancel, reader.read_raw_body()).await {
            Ok(body) => {
                tracing::debug!(seq = header.seq, "rpc client: received response");
                call.settle(Settlement::Reply {
                    format: inner.format,
                    body: &body,
                });
            }
            Err(e) => {
                call.settle(Settlement::Error(MrpcError::Connection(format!(
                    "reading body: {}",
                    e
                ))));
                break e;
            }
        }
    };

    // Unblocks writes stuck on a peer that stopped reading
    cancel.cancel();
    inner.terminate_calls(err).await;
}

#[cfg(test)]
mod tests;
