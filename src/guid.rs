/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use std::fmt;

/// A server identity, as embedded in an authenticated transport. Used only to
/// key the shared-connection registry (spec.md §4.9); this crate does not
/// interpret the value beyond equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Guid(String);

impl Guid {
    pub fn new(raw: impl Into<String>) -> Self {
        Guid(raw.into())
    }

    pub fn generate() -> Self {
        Guid(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
