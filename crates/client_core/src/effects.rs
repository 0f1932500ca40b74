//! One-shot UI effects flowing from the sign-in orchestrator to the screen.

use futures::stream::{self, Stream};
use tokio::sync::{mpsc, watch};
use tracing::debug;

pub const EFFECT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEffect {
    ShowSnackbar(String),
    ShowProgress(bool),
    NavigateToNoteList,
    NavigateToRegister,
}

/// Creates a connected sender/receiver pair. Effects buffer until the receiver reads them.
pub fn effect_channel() -> (EffectSender, EffectReceiver) {
    let (tx, rx) = mpsc::channel(EFFECT_CHANNEL_CAPACITY);
    let (closed_tx, closed_rx) = watch::channel(false);
    (
        EffectSender {
            tx,
            closed: closed_tx,
        },
        EffectReceiver {
            rx,
            closed: closed_rx,
        },
    )
}

pub struct EffectSender {
    tx: mpsc::Sender<UiEffect>,
    closed: watch::Sender<bool>,
}

impl EffectSender {
    /// Queues `effect`, waiting for buffer space. Returns `false` once the channel is closed,
    /// including when it closes while this call is still waiting.
    pub async fn send(&self, effect: UiEffect) -> bool {
        if self.is_closed() {
            debug!(?effect, "dropping effect after close");
            return false;
        }
        let mut closed = self.closed.subscribe();
        tokio::select! {
            biased;
            () = wait_closed(&mut closed) => {
                debug!("effect channel closed while waiting for buffer space");
                false
            }
            sent = self.tx.send(effect) => match sent {
                Ok(()) => true,
                Err(mpsc::error::SendError(effect)) => {
                    debug!(?effect, "effect receiver gone");
                    false
                }
            },
        }
    }

    /// Discards everything still buffered and wakes the receiver with end-of-stream.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        self.close_requested() || self.tx.is_closed()
    }

    /// True only after [`close`](Self::close), not when the receiver was merely dropped.
    pub fn close_requested(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Drop for EffectSender {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct EffectReceiver {
    rx: mpsc::Receiver<UiEffect>,
    closed: watch::Receiver<bool>,
}

impl EffectReceiver {
    /// Next effect in emission order, or `None` once the owning screen has been torn down.
    pub async fn recv(&mut self) -> Option<UiEffect> {
        if *self.closed.borrow() {
            self.rx.close();
            return None;
        }
        let effect = tokio::select! {
            biased;
            () = wait_closed(&mut self.closed) => None,
            effect = self.rx.recv() => effect,
        };
        if effect.is_none() || *self.closed.borrow() {
            self.rx.close();
            return None;
        }
        effect
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<UiEffect> {
        if *self.closed.borrow() {
            self.rx.close();
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> impl Stream<Item = UiEffect> + Send + 'static {
        stream::unfold(self, |mut receiver| async move {
            let effect = receiver.recv().await?;
            Some((effect, receiver))
        })
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}
