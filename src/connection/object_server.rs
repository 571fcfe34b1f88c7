/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use uuid::Uuid;

use crate::connection::Connection;
use crate::error_registry::names as errname;
use crate::message::{Message, MessageBuilder, Value};
use crate::names::ObjectPath;

/// A handler registered under a single object path (spec.md §4.5, "Polymorphic
/// handler objects" design note in §9: "represent as the capability set
/// `{invoke(message) -> ()}`").
///
/// The handler is contractually responsible for sending its own reply or
/// error through `connection` — the dispatcher does not do this for it.
pub trait ExportedObject: Send + Sync {
    fn handle(&self, message: &Message, connection: &Connection);

    /// Called once, at most, when the connection crashes (spec.md §4.1 step
    /// 7). The default implementation does nothing.
    fn on_connection_closed(&self) {}
}

/// `exported_objects` from spec.md §3: exact-path lookup, no partial matches.
#[derive(Default)]
pub struct ObjectTable {
    objects: Mutex<HashMap<ObjectPath, std::sync::Arc<dyn ExportedObject>>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        ObjectTable { objects: Mutex::new(HashMap::new()) }
    }

    pub fn export(&self, path: ObjectPath, object: std::sync::Arc<dyn ExportedObject>) {
        self.objects.lock().unwrap().insert(path, object);
    }

    pub fn unexport(&self, path: &ObjectPath) {
        self.objects.lock().unwrap().remove(path);
    }

    pub fn lookup(&self, path: &ObjectPath) -> Option<std::sync::Arc<dyn ExportedObject>> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    /// The direct child component of every exported path that extends `path`
    /// (spec.md §4.5 "Child computation"), deduplicated.
    pub fn children_of(&self, path: &ObjectPath) -> Vec<String> {
        let prefix = path.components();
        let mut children = HashSet::new();
        for exported in self.objects.lock().unwrap().keys() {
            let components = exported.components();
            if components.len() > prefix.len() && components[..prefix.len()] == prefix[..] {
                children.insert(components[prefix.len()].to_string());
            }
        }
        let mut children: Vec<String> = children.into_iter().collect();
        children.sort();
        children
    }

    /// Notifies every exported object that the connection has crashed
    /// (spec.md §4.1 step 7), swallowing and logging handler panics.
    pub fn notify_connection_closed(&self) {
        let objects: Vec<_> = self.objects.lock().unwrap().values().cloned().collect();
        for object in objects {
            if catch_unwind(AssertUnwindSafe(|| object.on_connection_closed())).is_err() {
                log::warn!("exported object's connection-closed hook panicked");
            }
        }
    }
}

fn machine_id() -> &'static str {
    static MACHINE_ID: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    MACHINE_ID.get_or_init(|| Uuid::new_v4().simple().to_string())
}

/// Handles `org.freedesktop.DBus.Peer` inline, as every D-Bus connection must
/// (spec.md §4.5 step 1).
fn handle_peer(message: &Message, connection: &Connection) {
    let member = message.member.as_ref().map(|m| m.as_str()).unwrap_or("");
    match member {
        "Ping" => {
            let reply = MessageBuilder::method_return(message).build();
            connection.send_reply_message(reply);
        }
        "GetMachineId" => {
            let reply = MessageBuilder::method_return(message)
                .arg(Value::Str(machine_id().to_string()))
                .build();
            connection.send_reply_message(reply);
        }
        _ => {
            let name = errname::UNKNOWN_METHOD.parse().unwrap();
            let reply = MessageBuilder::error(message, name)
                .arg(Value::Str(format!(
                    "Unknown method \"{}\" on interface \"org.freedesktop.DBus.Peer\"",
                    member
                )))
                .build();
            connection.send_reply_message(reply);
        }
    }
}

/// Builds the minimal introspection document for a virtual parent node:
/// the `Introspectable` interface plus the listed children (spec.md §4.5
/// step 3). No XML crate is used — the document is fixed-shape enough that
/// string formatting is clearer than a dependency for it.
fn introspection_document(children: &[String]) -> String {
    let mut doc = String::new();
    doc.push_str("<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n");
    doc.push_str("\"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n");
    doc.push_str("<node>\n");
    doc.push_str("  <interface name=\"org.freedesktop.DBus.Introspectable\">\n");
    doc.push_str("    <method name=\"Introspect\">\n");
    doc.push_str("      <arg name=\"xml_data\" type=\"s\" direction=\"out\"/>\n");
    doc.push_str("    </method>\n");
    doc.push_str("  </interface>\n");
    for child in children {
        doc.push_str(&format!("  <node name=\"{}\"/>\n", child));
    }
    doc.push_str("</node>\n");
    doc
}

/// Routes one incoming method call (spec.md §4.5, steps 1-4).
pub fn route_method_call(message: &Message, connection: &Connection, objects: &ObjectTable) {
    let interface = message.interface.as_ref().map(|n| n.as_str());
    let member = message.member.as_ref().map(|n| n.as_str());

    if interface == Some("org.freedesktop.DBus.Peer") {
        handle_peer(message, connection);
        return;
    }

    let path = match &message.path {
        Some(p) => p,
        None => {
            send_no_such_object(message, connection, "");
            return;
        }
    };

    if let Some(object) = objects.lookup(path) {
        if catch_unwind(AssertUnwindSafe(|| object.handle(message, connection))).is_err() {
            log::warn!("exported object handler panicked for path {}", path);
        }
        return;
    }

    let is_introspect = member == Some("Introspect")
        && interface.map(|i| i == "org.freedesktop.DBus.Introspectable").unwrap_or(true);

    if is_introspect {
        let children = objects.children_of(path);
        if !children.is_empty() {
            let reply = MessageBuilder::method_return(message)
                .arg(Value::Str(introspection_document(&children)))
                .build();
            connection.send_reply_message(reply);
            return;
        }
    }

    send_no_such_object(message, connection, path.as_str());
}

fn send_no_such_object(message: &Message, connection: &Connection, path: &str) {
    let name = errname::FAILED.parse().unwrap();
    let reply = MessageBuilder::error(message, name)
        .arg(Value::Str(format!("No such object: \"{}\"", path)))
        .build();
    connection.send_reply_message(reply);
}
