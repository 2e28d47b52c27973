use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anoncast_client::{Client, ClientConfig, ClientError, Relay, RelayConfig};
use anoncast_keystore::ChannelId;
use anoncast_transport::Endpoint;

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "anoncast-client-{}-{}-{}",
        tag,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

struct RunningRelay {
    relay: Arc<Relay>,
    endpoint: Endpoint,
    worker: Option<thread::JoinHandle<()>>,
}

impl RunningRelay {
    fn start() -> Self {
        let relay = Arc::new(
            Relay::bind(&Endpoint::tcp("127.0.0.1:0"), RelayConfig::default())
                .expect("relay should bind"),
        );
        let endpoint = relay.local_endpoint().expect("relay endpoint");
        let worker = {
            let relay = Arc::clone(&relay);
            thread::spawn(move || relay.serve().expect("relay should serve"))
        };
        Self {
            relay,
            endpoint,
            worker: Some(worker),
        }
    }

    fn wait_for_peers(&self, n: usize) {
        wait_for("relay peers", || self.relay.peer_count() == n);
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        if let Ok(handle) = self.relay.handle() {
            handle.stop();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Two file-backed clients sharing one channel through an exported bundle.
fn paired_clients(relay: &RunningRelay, tag: &str) -> (Client, Client, ChannelId, PathBuf) {
    let root = temp_dir(tag);
    let config = |name: &str| ClientConfig {
        key_buffer_size: 64 * 1024,
        ..ClientConfig::new(root.join(name), relay.endpoint.clone())
    };

    let alice = Client::new(config("alice")).expect("alice should open");
    let bob = Client::new(config("bob")).expect("bob should open");

    let id = ChannelId::new_random();
    alice.store().add_key_pack(id).expect("channel should be created");
    let bundle = root.join("bundle");
    alice
        .store()
        .export_key_pack(id, &bundle)
        .expect("bundle should export");
    bob.store()
        .import_key_pack(&bundle)
        .expect("bundle should import");

    (alice, bob, id, root)
}

#[test]
fn messages_cross_the_relay_both_ways() {
    let relay = RunningRelay::start();
    let (alice, bob, id, root) = paired_clients(&relay, "both-ways");

    alice.start().expect("alice should connect");
    bob.start().expect("bob should connect");
    relay.wait_for_peers(2);

    alice.write(id, b"hello bob").expect("alice should send");
    let frame = bob.receive().expect("bob should receive");
    assert_eq!(frame.channel, id);
    assert_eq!(frame.payload.as_ref(), b"hello bob");

    bob.write(id, b"hello alice").expect("bob should send");
    let frame = alice.receive().expect("alice should receive");
    assert_eq!(frame.payload.as_ref(), b"hello alice");

    alice.close();
    bob.close();
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn frames_for_other_channels_are_skipped() {
    let relay = RunningRelay::start();
    let (alice, bob, id, root) = paired_clients(&relay, "skip-foreign");

    let carol = Client::new(ClientConfig {
        key_buffer_size: 4096,
        ..ClientConfig::new(root.join("carol"), relay.endpoint.clone())
    })
    .expect("carol should open");
    let foreign = ChannelId::new_random();
    carol.store().add_key_pack(foreign).expect("carol channel");

    alice.start().expect("alice should connect");
    bob.start().expect("bob should connect");
    carol.start().expect("carol should connect");
    relay.wait_for_peers(3);

    carol.write(foreign, b"noise").expect("carol should send");
    thread::sleep(Duration::from_millis(50));
    alice.write(id, b"signal").expect("alice should send");

    let frame = bob.receive().expect("bob should receive");
    assert_eq!(frame.payload.as_ref(), b"signal");

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn stop_unblocks_pending_receive() {
    let relay = RunningRelay::start();
    let (_alice, bob, _id, root) = paired_clients(&relay, "stop-unblocks");
    let bob = Arc::new(bob);

    bob.start().expect("bob should connect");
    let receiver = {
        let bob = Arc::clone(&bob);
        thread::spawn(move || bob.receive())
    };
    thread::sleep(Duration::from_millis(50));
    bob.stop();

    let result = receiver.join().expect("receiver thread should finish");
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert!(!bob.is_connected());

    bob.start().expect("bob should reconnect after stop");
    assert!(bob.is_connected());
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn read_timeout_keeps_connection() {
    let relay = RunningRelay::start();
    let root = temp_dir("timeout");
    let client = Client::new(ClientConfig {
        read_timeout: Some(Duration::from_millis(50)),
        key_buffer_size: 1024,
        ..ClientConfig::new(root.join("solo"), relay.endpoint.clone())
    })
    .expect("client should open");

    client.start().expect("client should connect");
    assert!(matches!(client.receive(), Err(ClientError::Timeout)));
    assert!(client.is_connected());
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn cursors_survive_client_restart() {
    let relay = RunningRelay::start();
    let (alice, _bob, id, root) = paired_clients(&relay, "restart");

    alice.start().expect("alice should connect");
    relay.wait_for_peers(1);
    alice.write(id, b"first").expect("alice should send");
    let used = alice.store().get_key_pack(id).expect("pack").payload_out().position();
    assert!(used > 0);
    alice.close();

    let reopened = Client::new(ClientConfig::new(root.join("alice"), relay.endpoint.clone()))
        .expect("alice should reopen");
    let pack = reopened.store().get_key_pack(id).expect("pack should reload");
    assert_eq!(pack.payload_out().position(), used);
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn relay_drops_peer_with_broken_length() {
    use std::io::Write;

    let relay = RunningRelay::start();
    let mut rogue = anoncast_transport::connect(&relay.endpoint).expect("rogue should connect");
    relay.wait_for_peers(1);

    rogue.write_all(&[0x00]).expect("rogue should write");
    relay.wait_for_peers(0);
}
