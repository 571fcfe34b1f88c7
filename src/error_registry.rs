/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

//! Stand-in for the out-of-scope error-registry collaborator (spec.md §6):
//! `make`/`unmake` between D-Bus error names and [`Error::Reply`].

use crate::error::Error;
use crate::names::ErrorName;

/// The well-known `org.freedesktop.DBus.Error.*` names the inline handlers in
/// [`crate::connection::object_server`] produce (spec.md §4.5).
pub mod names {
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
}

/// Builds an [`Error::Reply`] from a D-Bus error name and message.
pub fn make(name: ErrorName, message: impl Into<String>) -> Error {
    Error::Reply { name, message: message.into() }
}

/// The inverse of [`make`]: pulls the name/message pair back out of an
/// [`Error::Reply`], or `None` for any other error kind.
pub fn unmake(error: &Error) -> Option<(&ErrorName, &str)> {
    match error {
        Error::Reply { name, message } => Some((name, message.as_str())),
        _ => None,
    }
}
