/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use crate::connection::state::RunningState;
use crate::message::{Message, Value};
use crate::names::{BusName, UniqueName, WellKnownName};

const BUS_SENDER: &str = "org.freedesktop.DBus";
const BUS_PATH: &str = "/org/freedesktop/DBus";

/// True iff `message` is a signal from the bus daemon itself (spec.md §4.8:
/// "when the signal's sender is `org.freedesktop.DBus` and the signal is
/// emitted by the well-known bus object").
fn is_from_bus_daemon(message: &Message) -> bool {
    message.is_signal()
        && message.sender.as_ref().map(|s| s.as_str()) == Some(BUS_SENDER)
        && message.path.as_ref().map(|p| p.as_str()) == Some(BUS_PATH)
}

fn string_arg(message: &Message, index: usize) -> Option<&str> {
    match message.body.get(index) {
        Some(Value::Str(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Applies one bus-daemon signal to `state` before user signal receivers are
/// notified (spec.md §4.8). Returns nothing: bookkeeping never fails the
/// dispatcher, it only updates internal state.
pub fn apply(state: &RunningState, message: &Message) {
    if !is_from_bus_daemon(message) {
        return;
    }

    let member = message.member.as_ref().map(|m| m.as_str()).unwrap_or("");
    match member {
        "NameOwnerChanged" => handle_name_owner_changed(state, message),
        "NameAcquired" => handle_name_acquired(state, message),
        "NameLost" => handle_name_lost(state, message),
        _ => {}
    }
}

fn handle_name_owner_changed(state: &RunningState, message: &Message) {
    let name = match string_arg(message, 0) {
        Some(n) => n,
        None => return,
    };
    let old_owner = string_arg(message, 1).unwrap_or("");
    let new_owner = string_arg(message, 2).unwrap_or("");
    let _ = old_owner;

    let new_unique: Option<UniqueName> = if new_owner.is_empty() { None } else { new_owner.parse().ok() };

    // `name` is either a well-known name changing owner or a unique name's
    // own connect/disconnect (spec.md §8 scenario 6, e.g. `:1.42`); a
    // resolver can be registered against either, so look up by `BusName`.
    if let Ok(bus_name) = name.parse::<BusName>() {
        let resolvers = state.name_resolvers.lock().unwrap();
        if let Some(resolver) = resolvers.get(&bus_name) {
            *resolver.owner.write().unwrap() = new_unique.clone();
            // The signal takes precedence over any still-pending initial
            // GetNameOwner reply (spec.md §4.8): wake the initial waiter now.
            resolver.ready.notify_waiters();
        }
    }

    if new_unique.is_none() {
        if let Ok(unique) = name.parse::<UniqueName>() {
            let mut exited = state.exited_peers.lock().unwrap();
            exited.put(unique, ());
        }
    }
}

fn handle_name_acquired(state: &RunningState, message: &Message) {
    let name = match string_arg(message, 0).and_then(|n| n.parse::<WellKnownName>().ok()) {
        Some(n) => n,
        None => return,
    };
    state.acquired_names.lock().unwrap().insert(name);
}

fn handle_name_lost(state: &RunningState, message: &Message) {
    let name = match string_arg(message, 0).and_then(|n| n.parse::<WellKnownName>().ok()) {
        Some(n) => n,
        None => return,
    };
    state.acquired_names.lock().unwrap().remove(&name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBuilder;
    use crate::names::ObjectPath;
    use std::sync::Arc;

    fn bus_signal(member: &str) -> Message {
        let mut m = MessageBuilder::signal(
            BUS_PATH.parse::<ObjectPath>().unwrap(),
            "org.freedesktop.DBus".parse().unwrap(),
            member.parse().unwrap(),
        )
        .build();
        m.sender = Some(BusName::WellKnown(BUS_SENDER.parse().unwrap()));
        m
    }

    fn state() -> Arc<RunningState> {
        let (transport, _peer) = crate::transport::LoopbackTransport::pair();
        RunningState::new(Arc::new(transport), None)
    }

    #[test]
    fn name_acquired_adds_to_acquired_names() {
        let state = state();
        let mut msg = bus_signal("NameAcquired");
        msg.body = vec![Value::Str("com.example.Foo".to_string())];
        apply(&state, &msg);
        assert!(state
            .acquired_names
            .lock()
            .unwrap()
            .contains(&"com.example.Foo".parse().unwrap()));
    }

    #[test]
    fn name_lost_removes_from_acquired_names() {
        let state = state();
        state.acquired_names.lock().unwrap().insert("com.example.Foo".parse().unwrap());
        let mut msg = bus_signal("NameLost");
        msg.body = vec![Value::Str("com.example.Foo".to_string())];
        apply(&state, &msg);
        assert!(!state
            .acquired_names
            .lock()
            .unwrap()
            .contains(&"com.example.Foo".parse().unwrap()));
    }

    #[test]
    fn name_owner_changed_records_exited_unique_peer() {
        let state = state();
        let mut msg = bus_signal("NameOwnerChanged");
        msg.body = vec![
            Value::Str(":1.7".to_string()),
            Value::Str(":1.7".to_string()),
            Value::Str(String::new()),
        ];
        apply(&state, &msg);
        let mut exited = state.exited_peers.lock().unwrap();
        assert!(exited.get(&":1.7".parse().unwrap()).is_some());
    }

    #[test]
    fn name_owner_changed_wakes_pending_resolver() {
        let state = state();
        let resolver = Arc::new(crate::connection::state::NameResolver::new());
        state
            .name_resolvers
            .lock()
            .unwrap()
            .insert("com.example.Foo".parse().unwrap(), resolver.clone());

        let mut msg = bus_signal("NameOwnerChanged");
        msg.body = vec![
            Value::Str("com.example.Foo".to_string()),
            Value::Str(String::new()),
            Value::Str(":1.9".to_string()),
        ];
        apply(&state, &msg);

        assert_eq!(resolver.owner.read().unwrap().as_ref().unwrap().as_str(), ":1.9");
    }

    /// spec.md §8 scenario 6, the literal case: resolving a unique name
    /// (`:1.42`) rather than a well-known one. `name_resolvers` is keyed on
    /// `BusName`, which covers both kinds.
    #[test]
    fn name_owner_changed_wakes_pending_resolver_for_a_unique_name() {
        let state = state();
        let resolver = Arc::new(crate::connection::state::NameResolver::new());
        state
            .name_resolvers
            .lock()
            .unwrap()
            .insert(":1.42".parse().unwrap(), resolver.clone());

        let mut msg = bus_signal("NameOwnerChanged");
        msg.body = vec![
            Value::Str(":1.42".to_string()),
            Value::Str(":1.42".to_string()),
            Value::Str(String::new()),
        ];
        apply(&state, &msg);

        assert!(resolver.owner.read().unwrap().is_none());
    }
}
