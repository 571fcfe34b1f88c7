/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use lru::LruCache;
use tokio::sync::Notify;

use crate::connection::filter::Filter;
use crate::connection::object_server::ObjectTable;
use crate::connection::reply::ReplyTable;
use crate::connection::signal::SignalReceiverEntry;
use crate::error::Error;
use crate::guid::Guid;
use crate::names::{BusName, UniqueName, WellKnownName};
use crate::transport::Transport;

const EXITED_PEERS_CAPACITY: usize = 100;

/// A name resolver awaiting or holding the bus owner of one well-known name
/// (spec.md §4.8: "if an internal name resolver exists for `name`"). Not part
/// of spec.md's table directly — it is the registry the bookkeeping section
/// assumes exists.
pub struct NameResolver {
    pub(crate) owner: std::sync::RwLock<Option<UniqueName>>,
    pub(crate) ready: Notify,
}

impl NameResolver {
    pub fn new() -> Self {
        NameResolver { owner: std::sync::RwLock::new(None), ready: Notify::new() }
    }
}

/// Everything a live connection owns, exactly spec.md §3's table, one field
/// per row with the synchronization primitive its access pattern calls for.
pub struct RunningState {
    pub transport: Arc<dyn Transport>,
    pub guid: Option<Guid>,
    pub name: RwLock<Option<UniqueName>>,
    pub acquired_names: std::sync::Mutex<HashSet<WellKnownName>>,
    pub next_serial: AtomicU32,
    pub reply_waiters: ReplyTable,
    pub signal_receivers: std::sync::Mutex<Vec<Arc<SignalReceiverEntry>>>,
    pub exported_objects: ObjectTable,
    pub incoming_filters: std::sync::Mutex<Vec<Arc<Filter>>>,
    pub outgoing_filters: std::sync::Mutex<Vec<Arc<Filter>>>,
    /// Guards the critical section in spec.md §4.2: serial assignment through
    /// the transport write, held as one acquisition.
    pub outgoing_m: tokio::sync::Mutex<()>,
    pub down: std::sync::Mutex<Option<Arc<Notify>>>,
    /// spec.md's `abort_waiter`: notified by `set_crash` to unblock the
    /// dispatcher's `recv` race (spec.md §4.7 step 2) *and* every concurrent
    /// external `Connection::watch()` caller (spec.md §8's crash fan-out
    /// property). `notify_waiters` (not `notify_one`) is required here: both
    /// the dispatcher and any number of `watch()` callers register their own
    /// `.notified()` future against this same `Notify`, and `notify_one` wakes
    /// at most one of them, starving the rest. Callers that race the wakeup
    /// against a fresh state check (as both `watch()` and the dispatcher do)
    /// never miss a crash even though `notify_waiters` stores no permit for
    /// latecomers: the next state check observes `Crashed` directly.
    pub(crate) abort_waiter: Notify,
    pub on_disconnect: std::sync::Mutex<Option<Box<dyn FnMut(&Error) + Send>>>,
    pub exited_peers: std::sync::Mutex<LruCache<UniqueName, ()>>,
    pub name_resolvers: std::sync::Mutex<std::collections::HashMap<BusName, Arc<NameResolver>>>,
}

impl RunningState {
    pub fn new(transport: Arc<dyn Transport>, guid: Option<Guid>) -> Arc<Self> {
        Arc::new(RunningState {
            transport,
            guid,
            name: RwLock::new(None),
            acquired_names: std::sync::Mutex::new(HashSet::new()),
            next_serial: AtomicU32::new(1),
            reply_waiters: ReplyTable::new(),
            signal_receivers: std::sync::Mutex::new(Vec::new()),
            exported_objects: ObjectTable::new(),
            incoming_filters: std::sync::Mutex::new(Vec::new()),
            outgoing_filters: std::sync::Mutex::new(Vec::new()),
            outgoing_m: tokio::sync::Mutex::new(()),
            down: std::sync::Mutex::new(None),
            abort_waiter: Notify::new(),
            on_disconnect: std::sync::Mutex::new(None),
            exited_peers: std::sync::Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(EXITED_PEERS_CAPACITY).unwrap(),
            )),
            name_resolvers: std::sync::Mutex::new(std::collections::HashMap::new()),
        })
    }

    /// The serial to stamp on the next outgoing message (spec.md §4.2 step
    /// 1). Peeking does not consume it — only [`Self::advance_serial`] does,
    /// and only after a successful write (step 5). Both are only ever called
    /// while holding `outgoing_m`, so plain load/store (not `fetch_add`)
    /// is enough; the field stays atomic so diagnostic reads elsewhere don't
    /// need the send lock.
    pub fn current_serial(&self) -> u32 {
        self.next_serial.load(Ordering::SeqCst)
    }

    /// Advances the serial counter by one, wrapping and skipping 0 (spec.md
    /// §3: "wraps; never 0").
    pub fn advance_serial(&self) {
        let next = match self.next_serial.load(Ordering::SeqCst).wrapping_add(1) {
            0 => 1,
            n => n,
        };
        self.next_serial.store(next, Ordering::SeqCst);
    }
}

/// The packed connection state cell (spec.md §4.1): `Running` or `Crashed`,
/// one-way transition, sole entry point for every public operation.
pub(crate) enum Cell {
    Running(Arc<RunningState>),
    Crashed(Error),
}

/// The shared handle behind [`crate::Connection`]. Guarded by a
/// `std::sync::RwLock`, matching the teacher's `InnerDispatch::pool`: reads on
/// the hot send/dispatch path are cheap and uncontended, and the single write
/// (the crash transition) happens at most once.
pub(crate) struct StateCell {
    cell: RwLock<Cell>,
}

/// A snapshot of the cell at one instant: either the live state or the
/// terminal error.
pub(crate) enum Snapshot {
    Running(Arc<RunningState>),
    Crashed(Error),
}

impl StateCell {
    pub fn new(running: Arc<RunningState>) -> Self {
        StateCell { cell: RwLock::new(Cell::Running(running)) }
    }

    /// spec.md §4.1: `get() -> Running|Crashed`.
    pub fn get(&self) -> Snapshot {
        match &*self.cell.read().unwrap() {
            Cell::Running(state) => Snapshot::Running(state.clone()),
            Cell::Crashed(err) => Snapshot::Crashed(err.clone()),
        }
    }

    /// spec.md §4.1: the first call performs steps 1-9 in order and returns
    /// `err`; later calls are no-ops that return the already-stored error.
    ///
    /// Async only for step 8 (draining `outgoing_m` on a clean close) and
    /// step 9 (shutting down the transport) — both awaits happen after the
    /// `std::sync::RwLock` write guard has already been dropped, so no std
    /// lock is ever held across an await point.
    pub async fn set_crash(&self, err: Error) -> Error {
        let running = {
            let mut guard = self.cell.write().unwrap();
            match &*guard {
                Cell::Crashed(existing) => return existing.clone(),
                Cell::Running(_) => {}
            }
            let Cell::Running(running) = std::mem::replace(&mut *guard, Cell::Crashed(err.clone())) else {
                unreachable!()
            };
            running
        };

        // Step 2: there is no process-exit hook in this crate (see DESIGN.md
        // deviation note on connection::dispatcher's on_disconnect default);
        // nothing to remove here.

        // Step 3: drop our registry entry before anything else can observe us
        // mid-teardown, breaking the registry <-> RunningState reference cycle.
        if let Some(guid) = &running.guid {
            crate::connection::registry::remove(guid);
        }

        // Step 4: unblock the dispatcher's recv/abort race and every
        // concurrent `watch()` caller (notify_one would starve all but one).
        running.abort_waiter.notify_waiters();

        // Step 5: wake a paused dispatcher so it observes the crash promptly.
        if let Some(notify) = running.down.lock().unwrap().take() {
            notify.notify_waiters();
        }

        // Step 6: fail every outstanding reply waiter and empty the table.
        running.reply_waiters.fail_all(&err);

        // Step 7: notify every exported object, swallowing and logging panics.
        running.exported_objects.notify_connection_closed();

        // Step 8: drain any in-flight send before shutdown, but only for a
        // clean user-initiated close (spec.md §4.1 step 8).
        if matches!(err, Error::ConnectionClosed) {
            let _guard = running.outgoing_m.lock().await;
        }

        // Step 9: shut down the transport, swallowing errors.
        if let Err(e) = running.transport.shutdown().await {
            log::debug!("error shutting down transport during crash: {}", e);
        }

        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    fn running_state() -> Arc<RunningState> {
        let (transport, _peer) = LoopbackTransport::pair();
        RunningState::new(Arc::new(transport), None)
    }

    #[test]
    fn advance_serial_skips_zero_on_wrap() {
        let state = running_state();
        state.next_serial.store(u32::MAX, Ordering::SeqCst);
        assert_eq!(state.current_serial(), u32::MAX);
        state.advance_serial();
        assert_eq!(state.current_serial(), 1);
    }

    #[tokio::test]
    async fn set_crash_is_idempotent() {
        let cell = StateCell::new(running_state());
        let first = cell.set_crash(Error::ConnectionClosed).await;
        let second = cell.set_crash(Error::ConnectionLost).await;
        assert!(matches!(first, Error::ConnectionClosed));
        assert!(matches!(second, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn set_crash_fails_every_reply_waiter() {
        let state = running_state();
        let rx = state.reply_waiters.register(1);
        let cell = StateCell::new(state);
        cell.set_crash(Error::ConnectionLost).await;
        assert!(matches!(rx.await.unwrap().unwrap_err(), Error::ConnectionLost));
    }

    #[tokio::test]
    async fn set_crash_wakes_the_abort_waiter() {
        let state = running_state();
        let cell = StateCell::new(state.clone());
        let notified = state.abort_waiter.notified();
        cell.set_crash(Error::ConnectionLost).await;
        notified.await;
    }
}
