//! Push channel driven from the test
//!
//! Each `open_connection` queues one connection the listener will get on
//! its next `connect`. Dropping the sender ends that connection. With no
//! queued connection, `connect` is refused.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dqr_sync::error::{Error, Result};
use dqr_sync::remote::{ChangeFeed, ChangeSignal, ChangeStream};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type SignalSender = mpsc::UnboundedSender<Result<ChangeSignal>>;

#[derive(Default)]
pub struct ChannelFeed {
    queued: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<ChangeSignal>>>>,
    attempts: AtomicUsize,
}

impl ChannelFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open_connection(&self) -> SignalSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queued.lock().unwrap().push_back(rx);
        tx
    }

    /// Connect attempts so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeFeed for ChannelFeed {
    async fn connect(&self) -> Result<ChangeStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let rx = self.queued.lock().unwrap().pop_front();
        match rx {
            Some(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            None => Err(Error::Remote("connection refused".to_string())),
        }
    }
}
