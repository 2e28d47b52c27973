use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anoncast_client::{Client, ClientConfig, ClientError};
use anoncast_frame::{encode_frame, FrameError};
use anoncast_keystore::{ChannelId, KeyPack, KeyStore};
use anoncast_transport::{Endpoint, NetListener, NetStream};
use bytes::BytesMut;

/// A client connected to a bare listener standing in for the relay, plus a
/// store holding the other end of the client's channel.
struct Harness {
    client: Client,
    server: NetStream,
    peer: KeyStore,
    id: ChannelId,
}

fn harness(drop_on_broken_length: bool) -> Harness {
    let listener = NetListener::bind(&Endpoint::tcp("127.0.0.1:0")).expect("listener should bind");
    let id = ChannelId::new_random();
    let (ours, theirs) = KeyPack::generate_pair(id, 4096);
    let store = KeyStore::in_memory(0);
    store.insert_key_pack(ours).expect("pack should insert");
    let peer = KeyStore::in_memory(0);
    peer.insert_key_pack(theirs).expect("pack should insert");

    let client = Client::with_store(
        Arc::new(store),
        ClientConfig {
            max_package_size: 1024,
            drop_on_broken_length,
            ..ClientConfig::new("unused", listener.local_endpoint().expect("endpoint"))
        },
    );
    client.start().expect("client should connect");
    let server = listener.accept().expect("listener should accept");

    Harness {
        client,
        server,
        peer,
        id,
    }
}

fn frame(store: &KeyStore, id: ChannelId, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(store, id, payload, &mut buf).expect("frame should encode");
    buf.to_vec()
}

#[test]
fn zero_length_is_broken_and_connection_stays_open() {
    let mut h = harness(false);
    h.server.write_all(&[0x00]).expect("server should write");
    h.server
        .write_all(&frame(&h.peer, h.id, b"after the junk"))
        .expect("server should write");

    assert!(matches!(
        h.client.receive(),
        Err(ClientError::BrokenPackageRecv(FrameError::InvalidLength { size: 0, .. }))
    ));
    assert!(h.client.is_connected());

    let frame = h.client.receive().expect("next frame should decode");
    assert_eq!(frame.payload.as_ref(), b"after the junk");
}

#[test]
fn oversized_length_is_broken() {
    let mut h = harness(false);
    // Declares 1024 bytes with a two-byte value: not below the 1024 maximum.
    h.server.write_all(&[0x02, 0x04, 0x00]).expect("server should write");

    assert!(matches!(
        h.client.receive(),
        Err(ClientError::BrokenPackageRecv(FrameError::InvalidLength { size: 1024, max: 1024 }))
    ));
}

#[test]
fn broken_length_can_force_disconnect() {
    let mut h = harness(true);
    h.server.write_all(&[0x00]).expect("server should write");

    assert!(matches!(
        h.client.receive(),
        Err(ClientError::BrokenPackageRecv(_))
    ));
    assert!(!h.client.is_connected());
}

#[test]
fn tampered_terminator_is_broken_package() {
    let mut h = harness(false);
    let mut bytes = frame(&h.peer, h.id, b"tampered");
    let last = bytes.len() - 1;
    bytes[last] = 0x00;
    h.server.write_all(&bytes).expect("server should write");

    assert!(matches!(
        h.client.receive(),
        Err(ClientError::BrokenPackageRecv(FrameError::WrongTerminator { found: 0x00 }))
    ));
}

#[test]
fn oversized_payload_is_refused_before_sending() {
    let h = harness(false);
    let err = h.client.write(h.id, &[0u8; 1024]).unwrap_err();
    assert!(matches!(
        err,
        ClientError::BrokenPackageSend(FrameError::PayloadTooLarge { .. })
    ));
    let pack = h.client.store().get_key_pack(h.id).expect("pack");
    assert_eq!(pack.payload_out().position(), 0);
    assert!(h.client.is_connected());
}

#[test]
fn peer_hangup_closes_connection() {
    let h = harness(false);
    h.server.shutdown();
    drop(h.server);

    assert!(matches!(h.client.receive(), Err(ClientError::ConnectionClosed)));
    assert!(!h.client.is_connected());
}

#[test]
fn write_failure_closes_connection() {
    let h = harness(false);
    h.server.shutdown();
    drop(h.server);

    let mut result = Ok(());
    for _ in 0..50 {
        result = h.client.write(h.id, b"into the void");
        if result.is_err() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert!(!h.client.is_connected());
}
