/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use std::fmt;

use crate::message::MessageType;
use crate::names::{BusName, InterfaceName, MemberName, ObjectPath};

/// A single key/value pair of a match rule, in the order it was added.
enum Entry {
    Type(MessageType),
    Sender(BusName),
    Interface(InterfaceName),
    Member(MemberName),
    Path(ObjectPath),
    Destination(BusName),
    Arg(u32, String),
}

/// A match rule (spec.md §6): `key='value',...`. Supplements the spec's
/// grammar with a builder, since the spec describes only the wire grammar and
/// a complete crate needs an ergonomic way to produce it.
pub struct MatchRule {
    entries: Vec<Entry>,
}

/// Fluent constructor for [`MatchRule`].
#[derive(Default)]
pub struct MatchRuleBuilder {
    entries: Vec<Entry>,
}

impl MatchRuleBuilder {
    pub fn new() -> Self {
        MatchRuleBuilder::default()
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.entries.push(Entry::Type(message_type));
        self
    }

    pub fn sender(mut self, sender: BusName) -> Self {
        self.entries.push(Entry::Sender(sender));
        self
    }

    pub fn interface(mut self, interface: InterfaceName) -> Self {
        self.entries.push(Entry::Interface(interface));
        self
    }

    pub fn member(mut self, member: MemberName) -> Self {
        self.entries.push(Entry::Member(member));
        self
    }

    pub fn path(mut self, path: ObjectPath) -> Self {
        self.entries.push(Entry::Path(path));
        self
    }

    pub fn destination(mut self, destination: BusName) -> Self {
        self.entries.push(Entry::Destination(destination));
        self
    }

    /// Adds an `argN='value'` filter, as consumed by `add_signal_receiver`'s
    /// `arg_filters` (spec.md §4.4).
    pub fn arg(mut self, index: u32, value: impl Into<String>) -> Self {
        self.entries.push(Entry::Arg(index, value.into()));
        self
    }

    pub fn build(self) -> MatchRule {
        MatchRule { entries: self.entries }
    }
}

fn message_type_str(t: MessageType) -> &'static str {
    match t {
        MessageType::MethodCall => "method_call",
        MessageType::MethodReturn => "method_return",
        MessageType::Error => "error",
        MessageType::Signal => "signal",
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for entry in &self.entries {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            match entry {
                Entry::Type(t) => write!(f, "type='{}'", message_type_str(*t))?,
                Entry::Sender(s) => write!(f, "sender='{}'", s)?,
                Entry::Interface(i) => write!(f, "interface='{}'", i)?,
                Entry::Member(m) => write!(f, "member='{}'", m)?,
                Entry::Path(p) => write!(f, "path='{}'", p)?,
                Entry::Destination(d) => write!(f, "destination='{}'", d)?,
                Entry::Arg(index, value) => write!(f, "arg{}='{}'", index, value)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_the_expected_grammar() {
        let rule = MatchRuleBuilder::new()
            .message_type(MessageType::Signal)
            .interface("org.example.X".parse().unwrap())
            .path("/a/b".parse().unwrap())
            .build();
        assert_eq!(rule.to_string(), "type='signal',interface='org.example.X',path='/a/b'");
    }

    #[test]
    fn renders_root_path_as_single_slash() {
        let rule = MatchRuleBuilder::new().path(ObjectPath::root()).build();
        assert_eq!(rule.to_string(), "path='/'");
    }

    #[test]
    fn renders_arg_filters() {
        let rule = MatchRuleBuilder::new().arg(0, "com.example.Foo").build();
        assert_eq!(rule.to_string(), "arg0='com.example.Foo'");
    }
}
