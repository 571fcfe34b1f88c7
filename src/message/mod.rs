/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

mod builder;
pub use builder::MessageBuilder;
mod value;
pub use value::{ArgValue, FromValue, Value};

use crate::names::{BusName, ErrorName, InterfaceName, MemberName, ObjectPath, UniqueName};

/// The four D-Bus message types (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    MethodCall,
    MethodReturn,
    Error,
    Signal,
}

/// Per-message flags (spec.md §3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub no_reply_expected: bool,
    pub no_auto_start: bool,
}

/// A parsed D-Bus message, exactly the fields spec.md §3 lists.
#[derive(Clone, Debug)]
pub struct Message {
    pub serial: u32,
    pub message_type: MessageType,
    pub flags: Flags,
    pub sender: Option<BusName>,
    pub destination: Option<BusName>,
    pub path: Option<ObjectPath>,
    pub interface: Option<InterfaceName>,
    pub member: Option<MemberName>,
    pub error_name: Option<ErrorName>,
    pub reply_serial: Option<u32>,
    pub body: Vec<Value>,
}

impl Message {
    /// The unique name of whoever sent this message, if any.
    pub fn sender_unique_name(&self) -> Option<&UniqueName> {
        match &self.sender {
            Some(BusName::Unique(n)) => Some(n),
            _ => None,
        }
    }

    pub fn is_method_call(&self) -> bool {
        self.message_type == MessageType::MethodCall
    }

    pub fn is_signal(&self) -> bool {
        self.message_type == MessageType::Signal
    }
}
