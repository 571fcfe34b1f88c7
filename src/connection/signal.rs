/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::message::Message;
use crate::names::{BusName, InterfaceName, MemberName, ObjectPath, UniqueName};

/// A sink that receives matching signals (spec.md §4.4).
pub type SignalSink = Box<dyn Fn(&Message) + Send + Sync>;

static NEXT_RECEIVER_ID: AtomicU64 = AtomicU64::new(1);

/// One registered receiver: a match-rule-shaped filter plus the sink it feeds.
/// Named `SR` in spec.md §4.4.
pub struct SignalReceiverEntry {
    pub(crate) id: u64,
    pub sender: Option<UniqueName>,
    pub path: Option<ObjectPath>,
    pub interface: Option<InterfaceName>,
    pub member: Option<MemberName>,
    /// `arg0`, `arg1`, ... filters: position -> expected string value.
    pub arg_filters: Vec<(usize, String)>,
    pub sink: SignalSink,
}

impl SignalReceiverEntry {
    pub fn new(sink: SignalSink) -> Self {
        SignalReceiverEntry {
            id: NEXT_RECEIVER_ID.fetch_add(1, Ordering::Relaxed),
            sender: None,
            path: None,
            interface: None,
            member: None,
            arg_filters: Vec::new(),
            sink,
        }
    }

    /// True iff every `Some` field on this receiver matches `message`
    /// (spec.md §4.4, second paragraph).
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(sender) = &self.sender {
            if message.sender_unique_name() != Some(sender) {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if message.path.as_ref() != Some(path) {
                return false;
            }
        }
        if let Some(interface) = &self.interface {
            if message.interface.as_ref() != Some(interface) {
                return false;
            }
        }
        if let Some(member) = &self.member {
            if message.member.as_ref() != Some(member) {
                return false;
            }
        }
        for (index, expected) in &self.arg_filters {
            match message.body.get(*index) {
                Some(crate::message::Value::Str(actual)) if actual == expected => {}
                _ => return false,
            }
        }
        true
    }
}

/// Scans `receivers` for matches against `message` and invokes each matching
/// sink. Sink panics are caught, logged, and do not stop the scan (spec.md
/// §4.4: "sink failures are logged and do not abort the dispatcher or the
/// signal scan"). Takes an `Arc`-wrapped slice so callers can clone the
/// receiver list out from under its lock before invoking any sink.
pub fn dispatch_signal(receivers: &[Arc<SignalReceiverEntry>], message: &Message) {
    for receiver in receivers {
        if receiver.matches(message) {
            let outcome = catch_unwind(AssertUnwindSafe(|| (receiver.sink)(message)));
            if outcome.is_err() {
                log::warn!("signal receiver sink panicked");
            }
        }
    }
}

/// True if `message` should be hidden from user signal receivers because it
/// targets a different bus-attached connection than `own_name` (spec.md
/// §4.4, final paragraph). Peer-to-peer connections (`own_name = None`)
/// bypass this check entirely.
pub fn is_visible_to_receivers(message: &Message, own_name: Option<&UniqueName>) -> bool {
    match (own_name, &message.destination) {
        (None, _) => true,
        (Some(_), None) => true,
        (Some(name), Some(BusName::Unique(dest))) => dest == name,
        (Some(_), Some(BusName::WellKnown(_))) => false,
    }
}
