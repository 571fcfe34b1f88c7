/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

pub(crate) mod bus_bookkeeping;
mod dispatcher;
pub mod filter;
pub mod handle;
pub mod match_rule;
pub mod object_server;
mod registry;
mod reply;
mod send;
pub mod signal;
pub(crate) mod state;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::address::{self, AddressEntry};
use crate::error::{Error, Result};
use crate::guid::Guid;
use crate::message::{Message, MessageBuilder, Value};
use crate::names::{BusName, ErrorName, InterfaceName, MemberName, ObjectPath, UniqueName, WellKnownName};
use crate::transport::{LoopbackTransport, Transport};

pub use filter::Filter;
pub use handle::RegistrationHandle;
pub use match_rule::{MatchRule, MatchRuleBuilder};
pub use object_server::ExportedObject;
pub use signal::SignalSink;

use state::{RunningState, Snapshot, StateCell};

/// Establishes an authenticated transport from a parsed address list,
/// performing whatever SASL/auth handshake the concrete wire format needs.
/// Out of scope per spec.md §2/§6 beyond this seam: `of_addresses` consumes
/// one to turn addresses into a live `Transport` plus the peer's GUID.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, addresses: &[AddressEntry]) -> Result<(Option<Guid>, Arc<dyn Transport>)>;
}

/// A client-side D-Bus connection (spec.md §3-§9). Cheap to clone — every
/// clone shares the same underlying state cell, mirroring the teacher's own
/// `Dispatch<A>(Arc<InnerDispatch<A>>)` pattern.
#[derive(Clone)]
pub struct Connection {
    pub(crate) state: Arc<StateCell>,
}

impl Connection {
    fn new_running(transport: Arc<dyn Transport>, guid: Option<Guid>) -> Self {
        let running = RunningState::new(transport, guid);
        Connection { state: Arc::new(StateCell::new(running)) }
    }

    pub(crate) fn from_inner(state: Arc<StateCell>) -> Self {
        Connection { state }
    }

    pub(crate) fn inner(&self) -> &Arc<StateCell> {
        &self.state
    }

    /// spec.md §4.9 / §6: wraps an already-authenticated transport. If `guid`
    /// names an already-registered shared connection, that connection is
    /// returned instead and `transport` is discarded by the caller's own
    /// `Arc` going out of scope.
    pub fn of_transport(transport: Arc<dyn Transport>, guid: Option<Guid>) -> Connection {
        if let Some(guid) = &guid {
            if let Some(existing) = registry::lookup(guid) {
                return existing;
            }
        }
        let connection = Connection::new_running(transport, guid.clone());
        if let Some(guid) = guid {
            registry::insert(guid, &connection);
        }
        dispatcher::spawn(connection.clone());
        connection
    }

    /// spec.md §4.9: extracts every GUID embedded in `addresses`; if any has
    /// a registered connection, returns it. Otherwise authenticates a new
    /// transport via `factory` and defers to `of_transport`, which performs
    /// the documented double-check (another task may have registered the
    /// same GUID while authentication was in flight).
    pub async fn of_addresses(
        addresses: &str,
        shared: bool,
        factory: &dyn TransportFactory,
    ) -> Result<Connection> {
        if shared {
            for guid in address::guids_in(addresses) {
                if let Some(existing) = registry::lookup(&guid) {
                    return Ok(existing);
                }
            }
        }
        let entries = address::parse_addresses(addresses);
        let (guid, transport) = factory.connect(&entries).await?;
        Ok(Connection::of_transport(transport, if shared { guid } else { None }))
    }

    /// spec.md §6: "a `loopback()` for testing" — a connected, peer-to-peer
    /// pair backed by [`LoopbackTransport`], neither side registered or
    /// bus-attached.
    pub fn loopback() -> (Connection, Connection) {
        let (a, b) = LoopbackTransport::pair();
        let a = Connection::new_running(Arc::new(a), None);
        let b = Connection::new_running(Arc::new(b), None);
        dispatcher::spawn(a.clone());
        dispatcher::spawn(b.clone());
        (a, b)
    }

    /// `true` iff the connection has not yet crashed.
    pub fn running(&self) -> bool {
        matches!(self.state.get(), Snapshot::Running(_))
    }

    /// Resolves once the connection crashes, with the terminal error. Polls
    /// are cheap: this does not install a new waiter, it just re-checks the
    /// cell, since the dispatcher itself is the only task that observes the
    /// transition promptly (spec.md §4.1's `abort_waiter` is internal).
    pub async fn watch(&self) -> Error {
        loop {
            match self.state.get() {
                Snapshot::Crashed(err) => return err,
                Snapshot::Running(running) => {
                    let notified = running.abort_waiter.notified();
                    // Re-check immediately in case the crash raced us in
                    // between the two `get()` calls above and below.
                    if let Snapshot::Crashed(err) = self.state.get() {
                        return err;
                    }
                    notified.await;
                }
            }
        }
    }

    /// spec.md §6: the documented cancellation mechanism for the whole
    /// connection. Idempotent (spec.md §8 "Idempotent close").
    pub async fn close(&self) -> Error {
        self.state.set_crash(Error::ConnectionClosed).await
    }

    /// Installs (replacing any previous) the fatal handler invoked by the
    /// dispatcher after it exits (spec.md §4.7). Fails if already `Crashed`.
    pub fn on_disconnect(&self, handler: impl FnMut(&Error) + Send + 'static) -> Result<()> {
        let running = send::running_or_fail(self)?;
        *running.on_disconnect.lock().unwrap() = Some(Box::new(handler));
        Ok(())
    }

    /// `true` iff the dispatcher is currently reading (not paused by
    /// `set_down`).
    pub fn is_up(&self) -> Result<bool> {
        let running = send::running_or_fail(self)?;
        Ok(running.down.lock().unwrap().is_none())
    }

    /// Resumes dispatch if it was paused.
    pub fn set_up(&self) -> Result<()> {
        let running = send::running_or_fail(self)?;
        if let Some(notify) = running.down.lock().unwrap().take() {
            notify.notify_waiters();
        }
        Ok(())
    }

    /// Pauses dispatch: the dispatcher will await resumption before its next
    /// `recv` (spec.md §4.7 step 1).
    pub fn set_down(&self) -> Result<()> {
        let running = send::running_or_fail(self)?;
        let mut down = running.down.lock().unwrap();
        if down.is_none() {
            *down = Some(Arc::new(Notify::new()));
        }
        Ok(())
    }

    // -- Messaging (spec.md §4.2, §6) ---------------------------------------

    /// Fire-and-forget send.
    pub async fn send_message(&self, message: Message) -> Result<()> {
        send::send(self, message, false).await.map(|_| ())
    }

    /// Sends `message` and awaits the matching reply.
    pub async fn send_message_with_reply(&self, message: Message) -> Result<Message> {
        let (_, reply_rx) = send::send(self, message, true).await?;
        match reply_rx.unwrap().await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Builds a Method-Call to `(path, interface?, member)`, awaits the
    /// reply, and decodes its first body element as `T` (spec.md §4.2:
    /// "resolves to either the decoded body or a typed error mapped from an
    /// Error reply").
    pub async fn method_call<T: crate::message::FromValue>(
        &self,
        destination: Option<BusName>,
        path: ObjectPath,
        interface: Option<InterfaceName>,
        member: MemberName,
        args: Vec<Value>,
    ) -> Result<T> {
        let mut builder = MessageBuilder::method_call(path, member).body(args);
        if let Some(destination) = destination {
            builder = builder.destination(destination);
        }
        if let Some(interface) = interface {
            builder = builder.interface(interface);
        }
        let reply = self.send_message_with_reply(builder.build()).await?;
        match reply.body.first() {
            Some(value) => T::from_value(value),
            None => Err(Error::CastFailure("reply body was empty".to_string())),
        }
    }

    /// Like [`Self::method_call`], but with `no_reply_expected` set and no
    /// reply awaited.
    pub async fn method_call_no_reply(
        &self,
        destination: Option<BusName>,
        path: ObjectPath,
        interface: Option<InterfaceName>,
        member: MemberName,
        args: Vec<Value>,
    ) -> Result<()> {
        let mut builder = MessageBuilder::method_call(path, member).no_reply_expected(true).body(args);
        if let Some(destination) = destination {
            builder = builder.destination(destination);
        }
        if let Some(interface) = interface {
            builder = builder.interface(interface);
        }
        self.send_message(builder.build()).await
    }

    pub async fn emit_signal(
        &self,
        path: ObjectPath,
        interface: InterfaceName,
        member: MemberName,
        args: Vec<Value>,
    ) -> Result<()> {
        let message = MessageBuilder::signal(path, interface, member).body(args).build();
        self.send_message(message).await
    }

    pub async fn send_reply(&self, call: &Message, args: Vec<Value>) -> Result<()> {
        self.send_message(MessageBuilder::method_return(call).body(args).build()).await
    }

    /// Used by [`object_server`] handlers to send their own reply directly
    /// (bypasses the public `Result`-returning API: a handler that cannot
    /// send its reply has nothing useful left to do but log).
    pub(crate) fn send_reply_message(&self, message: Message) {
        let connection = self.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.send_message(message).await {
                log::warn!("failed to send object-server reply: {}", e);
            }
        });
    }

    pub async fn send_error(&self, call: &Message, error_name: ErrorName, message: impl Into<String>) -> Result<()> {
        let reply = MessageBuilder::error(call, error_name).arg(Value::Str(message.into())).build();
        self.send_message(reply).await
    }

    /// Maps a native `Error` to a D-Bus error reply via
    /// [`crate::error_registry`], or to a generic `Failed` if `err` has no
    /// natural D-Bus name (spec.md §4.2: "`send_exception(exn)`").
    pub async fn send_exception(&self, call: &Message, err: &Error) -> Result<()> {
        match crate::error_registry::unmake(err) {
            Some((name, message)) => self.send_error(call, name.clone(), message.to_string()).await,
            None => {
                let name: ErrorName = crate::error_registry::names::FAILED.parse().unwrap();
                self.send_error(call, name, err.to_string()).await
            }
        }
    }

    // -- Registration (spec.md §6) -------------------------------------------

    pub fn add_incoming_filter(&self, filter: Filter) -> Result<RegistrationHandle> {
        self.add_filter(|r| &r.incoming_filters, filter)
    }

    pub fn add_outgoing_filter(&self, filter: Filter) -> Result<RegistrationHandle> {
        self.add_filter(|r| &r.outgoing_filters, filter)
    }

    /// `select` is a plain `fn` pointer (not a closure) specifically so it is
    /// `Copy + 'static` and can be moved into the returned handle's removal
    /// closure without borrowing `self`. Entries are stored as `Arc<Filter>`
    /// so the dispatch path can clone the whole chain out from under the lock
    /// (cheap refcount bumps) before invoking any filter — holding the lock
    /// across a filter call would deadlock if that filter's removal closure
    /// re-enters this same mutex.
    fn add_filter(
        &self,
        select: fn(&RunningState) -> &std::sync::Mutex<Vec<Arc<Filter>>>,
        filter: Filter,
    ) -> Result<RegistrationHandle> {
        let running = send::running_or_fail(self)?;
        let mut list = select(&running).lock().unwrap();
        let index = list.len();
        list.push(Arc::new(filter));
        drop(list);

        let running = running.clone();
        Ok(RegistrationHandle::new(move || {
            let mut list = select(&running).lock().unwrap();
            if index < list.len() {
                list.remove(index);
            }
        }))
    }

    pub fn add_signal_receiver(
        &self,
        sink: SignalSink,
        configure: impl FnOnce(signal::SignalReceiverEntry) -> signal::SignalReceiverEntry,
    ) -> Result<RegistrationHandle> {
        let running = send::running_or_fail(self)?;
        let entry = configure(signal::SignalReceiverEntry::new(sink));
        let id = entry.id;
        running.signal_receivers.lock().unwrap().push(Arc::new(entry));

        let running = running.clone();
        Ok(RegistrationHandle::new(move || {
            running.signal_receivers.lock().unwrap().retain(|r| r.id != id);
        }))
    }

    pub fn export_object(&self, path: ObjectPath, object: Arc<dyn ExportedObject>) -> Result<RegistrationHandle> {
        let running = send::running_or_fail(self)?;
        running.exported_objects.export(path.clone(), object);

        let running = running.clone();
        Ok(RegistrationHandle::new(move || {
            running.exported_objects.unexport(&path);
        }))
    }

    pub fn unexport(&self, path: &ObjectPath) -> Result<()> {
        let running = send::running_or_fail(self)?;
        running.exported_objects.unexport(path);
        Ok(())
    }

    // -- Introspection of state (spec.md §6) ---------------------------------

    pub fn guid(&self) -> Option<Guid> {
        match self.state.get() {
            Snapshot::Running(running) => running.guid.clone(),
            Snapshot::Crashed(_) => None,
        }
    }

    pub fn name(&self) -> Option<UniqueName> {
        match self.state.get() {
            Snapshot::Running(running) => running.name.read().unwrap().clone(),
            Snapshot::Crashed(_) => None,
        }
    }

    pub fn acquired_names(&self) -> HashSet<WellKnownName> {
        match self.state.get() {
            Snapshot::Running(running) => running.acquired_names.lock().unwrap().clone(),
            Snapshot::Crashed(_) => HashSet::new(),
        }
    }

    /// Debug-only accessor: the transport is normally private to the
    /// connection (spec.md §3: "Owned exclusively by this connection").
    #[doc(hidden)]
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        match self.state.get() {
            Snapshot::Running(running) => Some(running.transport.clone()),
            Snapshot::Crashed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests;
