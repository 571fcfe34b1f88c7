/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use super::{Flags, Message, MessageType, Value};
use crate::names::{BusName, ErrorName, InterfaceName, MemberName, ObjectPath};

/// Builds outgoing [`Message`]s. The serial is always `0` here; the actual
/// connection assigns it under `outgoing_m` as the first step of send
/// (spec.md §4.2 step 1) and overwrites this placeholder.
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    fn new(message_type: MessageType) -> Self {
        MessageBuilder {
            message: Message {
                serial: 0,
                message_type,
                flags: Flags::default(),
                sender: None,
                destination: None,
                path: None,
                interface: None,
                member: None,
                error_name: None,
                reply_serial: None,
                body: Vec::new(),
            },
        }
    }

    pub fn method_call(path: ObjectPath, member: MemberName) -> Self {
        let mut b = Self::new(MessageType::MethodCall);
        b.message.path = Some(path);
        b.message.member = Some(member);
        b
    }

    pub fn signal(path: ObjectPath, interface: InterfaceName, member: MemberName) -> Self {
        let mut b = Self::new(MessageType::Signal);
        b.message.path = Some(path);
        b.message.interface = Some(interface);
        b.message.member = Some(member);
        b
    }

    /// A method return in reply to `call`.
    pub fn method_return(call: &Message) -> Self {
        let mut b = Self::new(MessageType::MethodReturn);
        b.message.reply_serial = Some(call.serial);
        b.message.destination = call.sender.clone();
        b
    }

    /// An error reply in reply to `call`.
    pub fn error(call: &Message, error_name: ErrorName) -> Self {
        let mut b = Self::new(MessageType::Error);
        b.message.reply_serial = Some(call.serial);
        b.message.destination = call.sender.clone();
        b.message.error_name = Some(error_name);
        b
    }

    pub fn destination(mut self, destination: BusName) -> Self {
        self.message.destination = Some(destination);
        self
    }

    pub fn interface(mut self, interface: InterfaceName) -> Self {
        self.message.interface = Some(interface);
        self
    }

    pub fn sender(mut self, sender: BusName) -> Self {
        self.message.sender = Some(sender);
        self
    }

    pub fn no_reply_expected(mut self, value: bool) -> Self {
        self.message.flags.no_reply_expected = value;
        self
    }

    pub fn no_auto_start(mut self, value: bool) -> Self {
        self.message.flags.no_auto_start = value;
        self
    }

    pub fn body(mut self, body: Vec<Value>) -> Self {
        self.message.body = body;
        self
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.message.body.push(value);
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}
