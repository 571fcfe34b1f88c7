/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
*******************************************************************************/

mod loopback;
pub use loopback::LoopbackTransport;

use async_trait::async_trait;

use crate::message::Message;

/// A distinct sentinel for end-of-stream, so the dispatcher can translate it
/// into `Error::ConnectionLost` rather than the generic `TransportError`
/// (spec.md §4.7 step 3).
#[derive(Clone, Debug)]
pub enum RecvError {
    /// The peer closed the stream in an orderly fashion.
    Eof,
    /// The peer sent bytes that do not parse as a D-Bus message.
    Protocol(String),
    /// Any other I/O failure.
    Io(String),
}

/// The two ways a write can fail, per spec.md §4.2 step 4: a marshalling
/// fault is non-fatal and reported only to the caller; anything else crashes
/// the connection with `TransportError`.
#[derive(Clone, Debug)]
pub enum SendError {
    /// The message could not be marshalled (`Error::DataError`).
    Data(String),
    /// Any other failure writing to the peer (`Error::TransportError`).
    Io(String),
}

/// The abstract bidirectional framed message channel spec.md §2 and §6
/// describe as the transport adapter collaborator. Authentication, SASL and
/// address resolution all happen before a value of this trait exists; the
/// core only ever sends and receives whole [`Message`]s.
///
/// Methods take `&self`, not `&mut self`: `RunningState` keeps exactly one
/// `Arc<dyn Transport>` (spec.md §3), and the dispatcher's long-lived
/// `recv().await` must not block a concurrent `send()` from another task
/// behind the same lock. Implementors own their read half and write half
/// separately and synchronize each internally (see [`LoopbackTransport`]);
/// `recv` and `send` running concurrently with each other is a requirement,
/// not an accident. Serializing multiple concurrent *senders* against each
/// other remains the caller's job (`RunningState::outgoing_m`).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Reads the next whole message from the peer. Only ever called from the
    /// single dispatcher task, so implementors need not support concurrent
    /// calls to `recv` itself — only `recv` running alongside `send`.
    async fn recv(&self) -> Result<Message, RecvError>;

    /// Writes one message to the peer. May be called concurrently with
    /// `recv`, but callers serialize concurrent `send` calls against each
    /// other (`RunningState::outgoing_m`).
    async fn send(&self, message: &Message) -> Result<(), SendError>;

    /// Half- or full-closes the underlying channel. Errors are swallowed by
    /// the caller (spec.md §4.1 step 9 — "Shut down the transport, swallowing
    /// errors"), so this method's `Result` exists only for completeness.
    async fn shutdown(&self) -> Result<(), String>;
}
