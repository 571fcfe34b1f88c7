use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::address::AddressEntry;
use crate::connection::object_server::ExportedObject;
use crate::connection::{Connection, TransportFactory};
use crate::error::Error;
use crate::guid::Guid;
use crate::message::{Message, MessageBuilder, Value};
use crate::names::ObjectPath;
use crate::transport::{LoopbackTransport, RecvError, SendError, Transport};

const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

fn peer_call(member: &str) -> Message {
    MessageBuilder::method_call(ObjectPath::root(), member.parse().unwrap())
        .interface(PEER_INTERFACE.parse().unwrap())
        .build()
}

/// spec.md §8 scenario 1: a loopback ping-pong round trip.
#[tokio::test]
async fn ping_pong_round_trip() {
    let (a, _b) = Connection::loopback();
    let reply = a.send_message_with_reply(peer_call("Ping")).await.unwrap();
    assert!(reply.body.is_empty());
    assert_eq!(reply.reply_serial, Some(1));
}

#[tokio::test]
async fn get_machine_id_returns_a_string() {
    let (a, _b) = Connection::loopback();
    let reply = a.send_message_with_reply(peer_call("GetMachineId")).await.unwrap();
    match reply.body.first() {
        Some(Value::Str(s)) => assert!(!s.is_empty()),
        other => panic!("expected a string machine id, got {:?}", other),
    }
}

/// spec.md §8 scenario 2: an unknown method call resolves to a typed error.
#[tokio::test]
async fn unknown_peer_method_resolves_to_an_error_reply() {
    let (a, _b) = Connection::loopback();
    let err = a.send_message_with_reply(peer_call("Frobnicate")).await.unwrap_err();
    match err {
        Error::Reply { name, .. } => {
            assert_eq!(name.as_str(), "org.freedesktop.DBus.Error.UnknownMethod");
        }
        other => panic!("expected a Reply error, got {:?}", other),
    }
}

/// A method call against a path with no exported object and no Introspectable
/// children gets the generic "No such object" failure (spec.md §4.5 step 4).
#[tokio::test]
async fn call_to_unknown_object_is_failed() {
    let (a, _b) = Connection::loopback();
    let call = MessageBuilder::method_call("/no/such/thing".parse().unwrap(), "DoIt".parse().unwrap()).build();
    let err = a.send_message_with_reply(call).await.unwrap_err();
    match err {
        Error::Reply { name, .. } => assert_eq!(name.as_str(), "org.freedesktop.DBus.Error.Failed"),
        other => panic!("expected a Reply error, got {:?}", other),
    }
}

struct Echo;
impl ExportedObject for Echo {
    fn handle(&self, message: &Message, connection: &Connection) {
        let reply = MessageBuilder::method_return(message).body(message.body.clone()).build();
        connection.send_reply_message(reply);
    }
}

/// spec.md §4.5: a method call to an exact exported path routes to its handler.
#[tokio::test]
async fn method_call_routes_to_an_exported_object() {
    let (a, b) = Connection::loopback();
    let _handle = b.export_object("/echo".parse().unwrap(), Arc::new(Echo)).unwrap();

    let call = MessageBuilder::method_call("/echo".parse().unwrap(), "Echo".parse().unwrap())
        .arg(Value::Str("hi".to_string()))
        .build();
    let reply = a.send_message_with_reply(call).await.unwrap();
    assert_eq!(reply.body, vec![Value::Str("hi".to_string())]);
}

/// Dropping the registration handle stops routing to the handler; the call
/// then falls through to "No such object".
#[tokio::test]
async fn dropping_the_registration_handle_unexports_the_object() {
    let (a, b) = Connection::loopback();
    let handle = b.export_object("/echo".parse().unwrap(), Arc::new(Echo)).unwrap();
    drop(handle);

    let call = MessageBuilder::method_call("/echo".parse().unwrap(), "Echo".parse().unwrap()).build();
    let err = a.send_message_with_reply(call).await.unwrap_err();
    assert!(matches!(err, Error::Reply { .. }));
}

/// spec.md §4.6: an outgoing filter that drops a message fails the caller
/// without touching the wire or the connection's state.
#[tokio::test]
async fn outgoing_filter_drop_fails_the_caller_only() {
    let (a, _b) = Connection::loopback();
    let _handle = a.add_outgoing_filter(Box::new(|_m| None)).unwrap();

    let err = a.send_message(peer_call("Ping")).await.unwrap_err();
    assert!(matches!(err, Error::FilterDropped));
    assert!(a.running());
}

/// spec.md §8: closing is idempotent and unblocks `watch`.
#[tokio::test]
async fn close_is_idempotent_and_wakes_watchers() {
    let (a, _b) = Connection::loopback();
    let first = a.close().await;
    let second = a.close().await;
    assert!(matches!(first, Error::ConnectionClosed));
    assert!(matches!(second, Error::ConnectionClosed));
    assert!(!a.running());

    let watched = tokio::time::timeout(Duration::from_secs(1), a.watch()).await.unwrap();
    assert!(matches!(watched, Error::ConnectionClosed));
}

/// Once one side closes, the loopback peer observes end-of-stream and
/// crashes with `ConnectionLost` (spec.md §4.7 step 3).
#[tokio::test]
async fn peer_disconnect_crashes_the_other_side_with_connection_lost() {
    let (a, b) = Connection::loopback();
    a.close().await;

    let watched = tokio::time::timeout(Duration::from_secs(1), b.watch()).await.unwrap();
    assert!(matches!(watched, Error::ConnectionLost));
    assert!(!b.running());
}

/// spec.md §4.7, final paragraph: the dispatcher invokes `on_disconnect`
/// exactly once for a non-clean crash.
#[tokio::test]
async fn on_disconnect_fires_once_for_a_non_clean_crash() {
    let (a, b) = Connection::loopback();
    let fired = Arc::new(AtomicBool::new(false));
    let fired_clone = fired.clone();
    b.on_disconnect(move |_err| {
        fired_clone.store(true, Ordering::SeqCst);
    })
    .unwrap();

    a.close().await;
    tokio::time::timeout(Duration::from_secs(1), b.watch()).await.unwrap();
    assert!(fired.load(Ordering::SeqCst));
}

/// Operations against an already-crashed connection fail immediately with the
/// stored terminal error (spec.md §7: "every public operation ... fails with
/// the stored error").
#[tokio::test]
async fn operations_after_crash_fail_with_the_stored_error() {
    let (a, _b) = Connection::loopback();
    a.close().await;
    let err = a.send_message(peer_call("Ping")).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
}

/// A transport whose `recv` never resolves and whose `send` always fails,
/// for exercising the crash-on-write-failure path (spec.md §8 scenario 3)
/// without a real socket.
struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn recv(&self) -> Result<Message, RecvError> {
        futures::future::pending().await
    }

    async fn send(&self, _message: &Message) -> Result<(), SendError> {
        Err(SendError::Io("simulated write failure".to_string()))
    }

    async fn shutdown(&self) -> Result<(), String> {
        Ok(())
    }
}

/// spec.md §8 scenario 3: a failing write crashes the connection with
/// `TransportError` and fails the caller with the same error.
#[tokio::test]
async fn failing_write_crashes_the_connection_with_transport_error() {
    let connection = Connection::of_transport(Arc::new(FailingTransport), None);
    let err = connection.send_message(peer_call("Ping")).await.unwrap_err();
    assert!(matches!(err, Error::TransportError(_)));
    assert!(!connection.running());
}

/// spec.md §8 scenario 4: two `of_transport` calls sharing a GUID return the
/// same underlying connection rather than each wrapping its own transport.
#[tokio::test]
async fn of_transport_dedups_connections_sharing_a_guid() {
    let guid = Guid::generate();

    let (t1, _peer1) = LoopbackTransport::pair();
    let a = Connection::of_transport(Arc::new(t1), Some(guid.clone()));

    let (t2, _peer2) = LoopbackTransport::pair();
    let b = Connection::of_transport(Arc::new(t2), Some(guid));

    assert!(Arc::ptr_eq(a.inner(), b.inner()));
}

/// A `TransportFactory` that hands out a fresh loopback pair on every call,
/// discarding the peer half — enough to exercise `of_addresses`' dedup path
/// without a real address resolver or socket.
struct LoopbackFactory;

#[async_trait]
impl TransportFactory for LoopbackFactory {
    async fn connect(&self, addresses: &[AddressEntry]) -> crate::error::Result<(Option<Guid>, Arc<dyn Transport>)> {
        let guid = addresses.iter().find_map(|e| e.guid.clone());
        let (transport, _peer) = LoopbackTransport::pair();
        Ok((guid, Arc::new(transport)))
    }
}

/// spec.md §8 scenario 4, via `of_addresses`: a second connect to the same
/// embedded GUID returns the already-registered connection instead of
/// authenticating (and discarding) a second transport.
#[tokio::test]
async fn of_addresses_dedups_connections_sharing_a_guid() {
    let addresses = "unix:path=/tmp/example,guid=scenario4-shared";
    let factory = LoopbackFactory;

    let a = Connection::of_addresses(addresses, true, &factory).await.unwrap();
    let b = Connection::of_addresses(addresses, true, &factory).await.unwrap();

    assert!(Arc::ptr_eq(a.inner(), b.inner()));
}
