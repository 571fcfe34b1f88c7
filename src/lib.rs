/******************************************************************************
*
*  Copyright 2018 Stefan Majewsky <majewsky@gmx.net>
*
*  Licensed under the Apache License, Version 2.0 (the "License");
*  you may not use this file except in compliance with the License.
*  You may obtain a copy of the License at
*
*      http://www.apache.org/licenses/LICENSE-2.0
*
*  Unless required by applicable law or agreed to in writing, software
*  distributed under the License is distributed on an "AS IS" BASIS,
*  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
*  See the License for the specific language governing permissions and
*  limitations under the License.
*
******************************************************************************/

//! The core of a client-side D-Bus connection: message dispatch, reply
//! correlation, signal fan-out and object export over an authenticated
//! transport. Wire (un)marshalling, transport establishment, SASL
//! authentication and bus-specific method wrappers (`Hello`, `RequestName`,
//! …) are out of scope — see the stand-in collaborators in [`message`],
//! [`transport`] and [`address`].

pub mod address;
pub mod connection;
pub mod error;
pub mod error_registry;
pub mod guid;
pub mod message;
pub mod names;
pub mod transport;

pub use connection::Connection;
pub use error::{Error, Result};
pub use guid::Guid;
