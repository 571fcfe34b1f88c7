/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use std::fmt;

use crate::names::ErrorName;

/// Shorthand for `std::result::Result<T, Error>`, used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way a connection operation can fail.
///
/// Kinds marked fatal in their doc comment crash the whole connection (see
/// [`crate::Connection::close`] and the dispatcher in
/// [`crate::connection::dispatcher`]); the others are reported to a single
/// caller and leave the connection `Running`.
#[derive(Clone, Debug)]
pub enum Error {
    /// Fatal. The user called [`crate::Connection::close`].
    ConnectionClosed,
    /// Fatal. The transport reported end-of-stream.
    ConnectionLost,
    /// Fatal. The peer violated the wire protocol.
    ProtocolError(String),
    /// Fatal. Any other transport failure; the stream may be partially written.
    TransportError(String),
    /// Not fatal. Marshalling the outgoing message failed.
    DataError(String),
    /// Not fatal. A reply body did not decode into the requested Rust type.
    CastFailure(String),
    /// Not fatal. A reply body's signature did not match what was expected.
    SignatureMismatch { expected: String, got: String },
    /// Not fatal. An outgoing filter dropped the message before it reached the wire.
    FilterDropped,
    /// Not fatal. The peer returned a D-Bus `Error` reply to a method call.
    Reply { name: ErrorName, message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionClosed => write!(f, "the connection was closed"),
            Error::ConnectionLost => write!(f, "the connection was lost (peer closed the stream)"),
            Error::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            Error::TransportError(msg) => write!(f, "transport error: {}", msg),
            Error::DataError(msg) => write!(f, "failed to marshal message: {}", msg),
            Error::CastFailure(msg) => write!(f, "failed to decode reply body: {}", msg),
            Error::SignatureMismatch { expected, got } => {
                write!(f, "signature mismatch: expected {:?}, got {:?}", expected, got)
            }
            Error::FilterDropped => write!(f, "message was dropped by an outgoing filter"),
            Error::Reply { name, message } => write!(f, "{}: {}", name.as_str(), message),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// True for the kinds that crash the whole connection (spec.md §7 table).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed
                | Error::ConnectionLost
                | Error::ProtocolError(_)
                | Error::TransportError(_)
        )
    }
}
