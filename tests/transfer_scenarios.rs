//! Black-box transfer scenarios driven entirely through the public API.

use aftvault::transfer::{mode, Session};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = thread::spawn(move || listener.accept().unwrap().0);
    let client = TcpStream::connect(addr).unwrap();
    let server = acceptor.join().unwrap();
    (client, server)
}

#[test]
fn plaintext_under_10mib_roundtrips_exactly() {
    let (a, b) = loopback_pair();
    let payload = vec![0xABu8; 2 * 1024 * 1024]; // 2 MiB
    let mut sender = Session::new(0, a);
    let mut receiver = Session::new(0, b);

    let data = payload.clone();
    let send_thread = thread::spawn(move || sender.send(&data, "big-payload"));
    let (received, smsg) = receiver.receive().unwrap();
    send_thread.join().unwrap().unwrap();

    assert_eq!(received, payload);
    assert_eq!(smsg, "big-payload");
}

#[test]
fn msgonly_mode_transfers_empty_body() {
    let (a, b) = loopback_pair();
    let mut sender = Session::new(mode::MSGONLY, a);
    let mut receiver = Session::new(mode::MSGONLY, b);

    let send_thread = thread::spawn(move || sender.send(&[], "ping"));
    let (data, smsg) = receiver.receive().unwrap();
    send_thread.join().unwrap().unwrap();

    assert!(data.is_empty());
    assert_eq!(smsg, "ping");
}

/// A malformed handshake response (here, a zero-length peer public key)
/// makes the sender's key-wrap fail during ENCRYPTING; it must emit the
/// abort sentinel on the status channel rather than hang or crash.
#[test]
fn sender_emits_abort_sentinel_on_encrypting_failure() {
    let (client, mut server) = loopback_pair();

    let fake_receiver = thread::spawn(move || {
        let mut handshake_head = [0u8; 8];
        server.read_exact(&mut handshake_head).unwrap();
        let pub_len = u16::from_be_bytes([handshake_head[6], handshake_head[7]]) as usize;
        let mut discard = vec![0u8; pub_len];
        server.read_exact(&mut discard).unwrap();

        // Respond with an empty (invalid) peer public key.
        server.write_all(&0u16.to_be_bytes()).unwrap();

        let mut frame = [0u8; 8];
        server.read_exact(&mut frame).unwrap();
        frame
    });

    let mut sender = Session::new(0, client);
    let result = sender.send(b"payload", "");
    let frame = fake_receiver.join().unwrap();

    assert!(result.is_err());
    assert_eq!(frame, [0xFFu8; 8]);
}
