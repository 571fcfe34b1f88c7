/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

//! Minimal stand-in for the out-of-scope address-parser collaborator
//! (spec.md §6): enough of the `transport:key=value,...;...` grammar to pull
//! out an embedded `guid=` parameter, which is all [`crate::Connection::of_addresses`]
//! needs from this collaborator.

use crate::guid::Guid;

/// One entry of a parsed D-Bus address list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressEntry {
    pub transport_kind: String,
    pub params: Vec<(String, String)>,
    pub guid: Option<Guid>,
}

/// Parses a semicolon-separated D-Bus address list.
///
/// Unrecognized transport kinds are kept (with their raw params) rather than
/// rejected — establishing a transport is this crate's caller's job, not
/// this parser's.
pub fn parse_addresses(addresses: &str) -> Vec<AddressEntry> {
    addresses
        .split(';')
        .filter(|s| !s.is_empty())
        .filter_map(parse_one)
        .collect()
}

fn parse_one(address: &str) -> Option<AddressEntry> {
    let (kind, rest) = address.split_once(':')?;
    let mut params = Vec::new();
    let mut guid = None;
    for kv in rest.split(',').filter(|s| !s.is_empty()) {
        let (key, value) = kv.split_once('=')?;
        if key == "guid" {
            guid = Some(Guid::new(value.to_string()));
        }
        params.push((key.to_string(), value.to_string()));
    }
    Some(AddressEntry { transport_kind: kind.to_string(), params, guid })
}

/// Every GUID embedded anywhere in the address list, in order of appearance.
pub fn guids_in(addresses: &str) -> Vec<Guid> {
    parse_addresses(addresses)
        .into_iter()
        .filter_map(|entry| entry.guid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_guid_parameter() {
        let entries = parse_addresses("unix:path=/run/dbus/system_bus_socket,guid=abc123");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].transport_kind, "unix");
        assert_eq!(entries[0].guid, Some(Guid::new("abc123")));
    }

    #[test]
    fn parses_multiple_entries() {
        let guids = guids_in("unix:path=/a,guid=one;unix:path=/b,guid=two");
        assert_eq!(guids, vec![Guid::new("one"), Guid::new("two")]);
    }

    #[test]
    fn tolerates_missing_guid() {
        let entries = parse_addresses("unix:path=/tmp/x");
        assert_eq!(entries[0].guid, None);
    }
}
