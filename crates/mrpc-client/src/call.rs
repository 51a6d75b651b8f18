//! In-flight call records and their completion signals.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use mrpc_common::codec::Format;
use mrpc_common::{MrpcError, Result, Seq};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

/// Handle to a call issued with [`Client::go_call`](crate::Client::go_call).
///
/// Awaiting it yields the decoded reply or the error the call settled with.
/// Dropping it abandons the result; the response is still read off the
/// connection when it arrives.
pub struct Call<R> {
    seq: Seq,
    service_method: String,
    done: oneshot::Receiver<Result<R>>,
}

impl<R> Call<R> {
    /// Sequence number assigned to the call, or `0` if the client was
    /// already shut down and the call was never sent.
    pub fn seq(&self) -> Seq {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    pub(crate) fn assign(mut self, seq: Seq) -> Self {
        self.seq = seq;
        self
    }
}

impl<R> Future for Call<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.done)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(MrpcError::Shutdown)))
    }
}

/// A settled call, delivered on a caller-supplied channel by
/// [`Client::go_call_with`](crate::Client::go_call_with).
#[derive(Debug)]
pub struct Completion<R> {
    pub seq: Seq,
    pub service_method: String,
    pub result: Result<R>,
}

/// How a call ends.
pub(crate) enum Settlement<'a> {
    /// A successful response; the body is decoded into the reply type.
    Reply { format: Format, body: &'a [u8] },
    Error(MrpcError),
}

/// A pending call with its reply type erased, as stored in the pending table.
pub(crate) trait Settle: Send {
    /// Decodes the outcome and signals the caller. Consumes the call, so it
    /// can only be settled once.
    fn settle(self: Box<Self>, settlement: Settlement<'_>);
}

pub(crate) enum Notify<R> {
    Once(oneshot::Sender<Result<R>>),
    Channel(mpsc::Sender<Completion<R>>),
}

pub(crate) struct Waiter<R> {
    pub(crate) seq: Seq,
    pub(crate) service_method: String,
    pub(crate) notify: Notify<R>,
}

impl<R> Waiter<R> {
    pub(crate) fn new(seq: Seq, service_method: &str, notify: Notify<R>) -> Self {
        Self {
            seq,
            service_method: service_method.to_string(),
            notify,
        }
    }
}

impl<R: DeserializeOwned + Send + 'static> Settle for Waiter<R> {
    fn settle(self: Box<Self>, settlement: Settlement<'_>) {
        let Waiter {
            seq,
            service_method,
            notify,
        } = *self;

        let result = match settlement {
            Settlement::Reply { format, body } => format.decode::<R>(body),
            Settlement::Error(e) => Err(e),
        };

        match notify {
            // A dropped receiver means the caller stopped waiting.
            Notify::Once(tx) => {
                let _ = tx.send(result);
            }
            Notify::Channel(tx) => {
                let completion = Completion {
                    seq,
                    service_method,
                    result,
                };
                match tx.try_send(completion) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(completion)) => {
                        tracing::warn!(
                            seq = completion.seq,
                            service_method = %completion.service_method,
                            "rpc: discarding completion, channel is full"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }
    }
}

/// Builds an unsent call together with the sender that settles it.
pub(crate) fn once<R>(service_method: &str) -> (Call<R>, Notify<R>) {
    let (tx, rx) = oneshot::channel();
    let call = Call {
        seq: 0,
        service_method: service_method.to_string(),
        done: rx,
    };
    (call, Notify::Once(tx))
}
