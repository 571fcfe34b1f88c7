/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::message::Message;

/// One entry of an incoming or outgoing filter chain (spec.md §4.6).
pub type Filter = Box<dyn Fn(Message) -> Option<Message> + Send + Sync>;

/// Folds `message` through `filters` left to right. A filter returning `None`
/// drops the message and skips the rest of the chain. A filter that panics is
/// treated the same way — logged, chain aborted — without crashing the
/// connection (spec.md §4.6: "the connection is NOT crashed"). Takes an
/// `Arc`-wrapped slice so callers can clone the chain out from under its lock
/// before invoking it, rather than holding the lock across these user calls.
pub fn apply_chain(filters: &[Arc<Filter>], mut message: Message) -> Option<Message> {
    for filter in filters {
        let result = catch_unwind(AssertUnwindSafe(|| filter(message.clone())));
        match result {
            Ok(Some(next)) => message = next,
            Ok(None) => {
                log::debug!("message dropped by filter chain");
                return None;
            }
            Err(_) => {
                log::warn!("filter panicked; dropping message and aborting chain");
                return None;
            }
        }
    }
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBuilder;
    use crate::names::ObjectPath;

    fn sample_message() -> Message {
        MessageBuilder::method_call(ObjectPath::root(), "Ping".parse().unwrap()).build()
    }

    #[test]
    fn chain_threads_message_through_in_order() {
        let filters: Vec<Arc<Filter>> = vec![
            Arc::new(Box::new(|mut m: Message| {
                m.serial = 1;
                Some(m)
            })),
            Arc::new(Box::new(|mut m: Message| {
                m.serial += 41;
                Some(m)
            })),
        ];
        let result = apply_chain(&filters, sample_message()).unwrap();
        assert_eq!(result.serial, 42);
    }

    #[test]
    fn drop_in_middle_skips_remaining_filters() {
        let filters: Vec<Arc<Filter>> = vec![
            Arc::new(Box::new(|_m: Message| None)),
            Arc::new(Box::new(|mut m: Message| {
                m.serial = 999;
                Some(m)
            })),
        ];
        assert!(apply_chain(&filters, sample_message()).is_none());
    }

    #[test]
    fn panicking_filter_drops_without_propagating() {
        let filters: Vec<Arc<Filter>> = vec![Arc::new(Box::new(|_m: Message| -> Option<Message> {
            panic!("boom")
        }))];
        assert!(apply_chain(&filters, sample_message()).is_none());
    }
}
