//! The raft network interface.

use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::RaftMsg;
use crate::entry::AppData;
use crate::error::RaftError;
use crate::messages::RaftMessage;
use crate::MemberId;

/// Sends messages to other cluster members.
///
/// Delivery is best effort: messages may be dropped, delayed or reordered, and the raft machine
/// tolerates all of it. An error is logged and the message is dropped.
#[async_trait]
pub trait Outbound<D>: Send + Sync + 'static
where D: AppData
{
    /// Send `message` to member `to`.
    ///
    /// With `block` the call returns once the message is handed to the transport, otherwise it
    /// may return as soon as the message is queued.
    async fn send(&self, to: MemberId, message: RaftMessage<D>, block: bool) -> Result<()>;
}

/// Receives messages from other cluster members.
pub trait Inbound<D>: Send + Sync + 'static
where D: AppData
{
    /// Deliver every received message to `handler`.
    fn register_handler(&self, handler: InboundHandler<D>);
}

/// Feeds received messages into a running raft member.
#[derive(Debug)]
pub struct InboundHandler<D: AppData> {
    tx_api: mpsc::UnboundedSender<RaftMsg<D>>,
}

impl<D: AppData> Clone for InboundHandler<D> {
    fn clone(&self) -> Self {
        Self {
            tx_api: self.tx_api.clone(),
        }
    }
}

impl<D: AppData> InboundHandler<D> {
    pub(crate) fn new(tx_api: mpsc::UnboundedSender<RaftMsg<D>>) -> Self {
        Self { tx_api }
    }

    /// Enqueue a message for the raft task. Fails only if the member is shut down.
    pub fn handle(&self, message: RaftMessage<D>) -> Result<(), RaftError> {
        self.tx_api
            .send(RaftMsg::Message {
                message,
                enqueued_at: Instant::now(),
            })
            .map_err(|_| RaftError::ShuttingDown)
    }
}
