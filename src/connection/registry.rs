/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::connection::state::StateCell;
use crate::connection::Connection;
use crate::guid::Guid;

/// Process-wide GUID -> shared connection registry (spec.md §4.9). Entries are
/// `Weak` so a connection whose `set_crash` forgot (or raced) to remove it
/// still decays instead of keeping the `RunningState` alive forever; the
/// explicit removal in `StateCell::set_crash` step 3 is the primary path, this
/// is belt-and-suspenders.
static REGISTRY: OnceLock<Mutex<HashMap<Guid, Weak<StateCell>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<Guid, Weak<StateCell>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Looks up a live, registered connection for `guid`.
pub(crate) fn lookup(guid: &Guid) -> Option<Connection> {
    registry().lock().unwrap().get(guid).and_then(Weak::upgrade).map(Connection::from_inner)
}

/// Registers `connection` under `guid`, replacing any stale (decayed) entry.
pub(crate) fn insert(guid: Guid, connection: &Connection) {
    registry().lock().unwrap().insert(guid, Arc::downgrade(connection.inner()));
}

/// Removes the entry for `guid`, if any (spec.md §4.1 step 3).
pub(crate) fn remove(guid: &Guid) {
    registry().lock().unwrap().remove(guid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_of_unknown_guid_is_a_no_op() {
        remove(&Guid::generate());
    }

    #[test]
    fn lookup_of_unregistered_guid_is_none() {
        assert!(lookup(&Guid::generate()).is_none());
    }
}
