/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::error_registry;
use crate::message::{Message, MessageType};

/// `reply_waiters` from spec.md §3: outstanding request serial -> completion
/// sink. A plain `Mutex<HashMap<..>>` is enough since every access is a short,
/// synchronous critical section (insert, remove-and-complete, or drain-all).
#[derive(Default)]
pub struct ReplyTable {
    waiters: Mutex<HashMap<u32, oneshot::Sender<Result<Message>>>>,
}

impl ReplyTable {
    pub fn new() -> Self {
        ReplyTable { waiters: Mutex::new(HashMap::new()) }
    }

    /// Registers a waiter for `serial`. Must happen before the corresponding
    /// request is written to the transport (spec.md §4.2 step 3, §5
    /// "reply-register-before-write").
    pub fn register(&self, serial: u32) -> oneshot::Receiver<Result<Message>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(serial, tx);
        rx
    }

    /// Drops a previously registered waiter without completing it (used when
    /// a send fails before reaching the wire, per spec.md §9's resolution of
    /// the `DataError` open question: the entry is deliberately left in place
    /// here rather than removed eagerly — see `Connection::send_message_with_reply`).
    #[allow(dead_code)]
    pub fn forget(&self, serial: u32) {
        self.waiters.lock().unwrap().remove(&serial);
    }

    /// Routes an incoming Method-Return or Error reply to its waiter, if any.
    /// Unmatched replies are logged and dropped (spec.md §4.3).
    pub fn complete(&self, message: Message) {
        let serial = match message.reply_serial {
            Some(s) => s,
            None => return,
        };
        let sender = self.waiters.lock().unwrap().remove(&serial);
        let sender = match sender {
            Some(s) => s,
            None => {
                log::debug!("dropping unmatched reply for serial {}", serial);
                return;
            }
        };

        let outcome = match message.message_type {
            MessageType::MethodReturn => Ok(message),
            MessageType::Error => {
                let name = message
                    .error_name
                    .clone()
                    .unwrap_or_else(|| "org.freedesktop.DBus.Error.Failed".parse().unwrap());
                let text = message
                    .body
                    .first()
                    .map(|v| v.as_str_or_empty().to_string())
                    .unwrap_or_default();
                Err(error_registry::make(name, text))
            }
            _ => {
                log::warn!("reply_serial set on a non-reply message; dropping");
                return;
            }
        };

        let _ = sender.send(outcome);
    }

    /// Completes every outstanding waiter with `err` and empties the table
    /// (spec.md §4.1 step 6, part of the crash fan-out).
    pub fn fail_all(&self, err: &Error) {
        let waiters = std::mem::take(&mut *self.waiters.lock().unwrap());
        for (_, sender) in waiters {
            let _ = sender.send(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBuilder;
    use crate::names::ObjectPath;

    fn call() -> Message {
        let mut m = MessageBuilder::method_call(ObjectPath::root(), "Ping".parse().unwrap()).build();
        m.serial = 7;
        m
    }

    #[tokio::test]
    async fn method_return_resolves_the_waiter() {
        let table = ReplyTable::new();
        let rx = table.register(7);
        let reply = MessageBuilder::method_return(&call()).build();
        table.complete(reply);
        let resolved = rx.await.unwrap().unwrap();
        assert_eq!(resolved.reply_serial, Some(7));
    }

    #[tokio::test]
    async fn error_reply_maps_name_and_first_string_arg() {
        let table = ReplyTable::new();
        let rx = table.register(7);
        let reply = MessageBuilder::error(&call(), "org.freedesktop.DBus.Error.Failed".parse().unwrap())
            .arg(crate::message::Value::Str("No such object".to_string()))
            .build();
        table.complete(reply);
        let err = rx.await.unwrap().unwrap_err();
        match err {
            Error::Reply { name, message } => {
                assert_eq!(name.as_str(), "org.freedesktop.DBus.Error.Failed");
                assert_eq!(message, "No such object");
            }
            _ => panic!("expected a Reply error"),
        }
    }

    #[tokio::test]
    async fn unmatched_reply_is_dropped_without_panicking() {
        let table = ReplyTable::new();
        table.complete(MessageBuilder::method_return(&call()).build());
    }

    #[tokio::test]
    async fn fail_all_resolves_every_waiter_with_the_same_error() {
        let table = ReplyTable::new();
        let rx1 = table.register(1);
        let rx2 = table.register(2);
        table.fail_all(&Error::ConnectionClosed);
        assert!(matches!(rx1.await.unwrap().unwrap_err(), Error::ConnectionClosed));
        assert!(matches!(rx2.await.unwrap().unwrap_err(), Error::ConnectionClosed));
    }
}
