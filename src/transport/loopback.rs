/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{RecvError, SendError, Transport};
use crate::message::Message;

/// An in-memory [`Transport`] backed by a pair of `tokio::sync::mpsc`
/// channels. Used by `Connection::loopback()` (spec.md §6) and by this
/// crate's own test suite to exercise the end-to-end scenarios in spec.md
/// §8 without a real socket.
///
/// The write half is wrapped in `Mutex<Option<..>>` (not just a plain
/// `Clone`able sender) so [`Self::shutdown`] can drop it: a real transport's
/// shutdown eventually surfaces as EOF on the peer's read half, and dropping
/// the sender is what reproduces that here. The read half is wrapped in its
/// own `Mutex` purely to get `&self` access; since only the dispatcher ever
/// calls `recv`, that mutex is never contended.
pub struct LoopbackTransport {
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    incoming: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl LoopbackTransport {
    /// Builds a connected pair: messages sent on one end arrive on the other.
    pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (
            LoopbackTransport { outgoing: Mutex::new(Some(tx_a)), incoming: Mutex::new(rx_b) },
            LoopbackTransport { outgoing: Mutex::new(Some(tx_b)), incoming: Mutex::new(rx_a) },
        )
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn recv(&self) -> Result<Message, RecvError> {
        self.incoming.lock().await.recv().await.ok_or(RecvError::Eof)
    }

    async fn send(&self, message: &Message) -> Result<(), SendError> {
        match self.outgoing.lock().await.as_ref() {
            Some(tx) => tx
                .send(message.clone())
                .map_err(|_| SendError::Io("peer end of loopback transport was dropped".to_string())),
            None => Err(SendError::Io("loopback transport was shut down".to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), String> {
        self.outgoing.lock().await.take();
        self.incoming.lock().await.close();
        Ok(())
    }
}
