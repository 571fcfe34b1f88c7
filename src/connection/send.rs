/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use std::sync::Arc;

use crate::connection::state::{RunningState, Snapshot};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::SendError;
use crate::Connection;

/// Fails immediately with the stored error if the cell is `Crashed`, per
/// spec.md §7's propagation policy applied to every public operation.
pub(crate) fn running_or_fail(connection: &Connection) -> Result<Arc<RunningState>> {
    match connection.state.get() {
        Snapshot::Running(running) => Ok(running),
        Snapshot::Crashed(err) => Err(err),
    }
}

/// The five-step send algorithm from spec.md §4.2, executed atomically under
/// `outgoing_m`. `expect_reply` controls whether a reply waiter is registered
/// before the write; on success, returns the assigned serial and, if a reply
/// was requested, the receiver to await it on.
pub(crate) async fn send(
    connection: &Connection,
    mut message: Message,
    expect_reply: bool,
) -> Result<(u32, Option<tokio::sync::oneshot::Receiver<Result<Message>>>)> {
    let running = running_or_fail(connection)?;
    let _guard = running.outgoing_m.lock().await;

    // Step 1: assign the serial (not yet advanced).
    let serial = running.current_serial();
    message.serial = serial;

    // Step 2: outgoing filters; a drop is a non-fatal FilterDropped failure.
    // The chain is cloned out from under the lock before running: a filter
    // that re-enters this mutex (e.g. by dropping its own
    // `RegistrationHandle`) would otherwise deadlock against a non-reentrant
    // `std::sync::Mutex` still held here.
    let message = {
        let filters: Vec<_> = running.outgoing_filters.lock().unwrap().clone();
        crate::connection::filter::apply_chain(&filters, message)
    };
    let message = match message {
        Some(m) => m,
        None => return Err(Error::FilterDropped),
    };

    // Step 3: register the reply waiter BEFORE writing (reply-before-wire).
    let reply_rx = if expect_reply { Some(running.reply_waiters.register(serial)) } else { None };

    // Step 4: write through the transport.
    match running.transport.send(&message).await {
        Ok(()) => {}
        Err(SendError::Data(msg)) => {
            // Non-fatal: leave state Running, do not advance the serial, do
            // not remove the just-inserted waiter (spec.md §9 Open Question
            // resolution — see connection::reply::ReplyTable::forget).
            return Err(Error::DataError(msg));
        }
        Err(SendError::Io(msg)) => {
            // Fatal: the stream may be partially written and cannot be
            // recovered. Crash the connection and fail this caller with the
            // same error (spec.md §4.2 step 4).
            let err = connection.state.set_crash(Error::TransportError(msg)).await;
            return Err(err);
        }
    }

    // Step 5: advance the serial only after a successful write.
    running.advance_serial();

    Ok((serial, reply_rx))
}
