//! The stream-oriented authenticated transfer protocol: handshake,
//! heartbeat-framed status channel, and payload transfer.

use crate::crypto;
use crate::error::{AftError, Result};
use crate::opsec::OpsecHeader;
use std::io::{Cursor, Read, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const MAGIC: &[u8; 4] = b"UTP1";
const ZERO8: [u8; 8] = [0u8; 8];
const MAX8: [u8; 8] = [0xFFu8; 8];
const CHUNK: usize = 1024;

/// Session mode bitmask, negotiated during handshake.
pub mod mode {
    pub const MSGONLY: u16 = 0x1;
    pub const LEGACY: u16 = 0x2;
    pub const RSA_4K: u16 = 0x4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Handshake,
    Encrypting,
    Transferring,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    pub sent: u64,
    pub total: u64,
}

/// A shareable read handle onto a running session's progress, matching
/// `TPprotocol.GetStatus()` in the source: observers poll without owning
/// the session.
#[derive(Clone)]
pub struct ProgressHandle(Arc<Mutex<Progress>>);

impl ProgressHandle {
    pub fn get(&self) -> Progress {
        *self.0.lock().expect("progress mutex poisoned")
    }
}

/// A reliable, full-duplex byte stream the session can clone for the
/// heartbeat thread's exclusive write access. `std::net::TcpStream`
/// satisfies this out of the box.
pub trait DuplexStream: Read + Write + Send + 'static {
    fn try_clone(&self) -> std::io::Result<Self>
    where
        Self: Sized;
}

impl DuplexStream for std::net::TcpStream {
    fn try_clone(&self) -> std::io::Result<Self> {
        std::net::TcpStream::try_clone(self)
    }
}

pub struct Session<S: DuplexStream> {
    stream: S,
    mode: u16,
    progress: Arc<Mutex<Progress>>,
}

impl<S: DuplexStream> Session<S> {
    pub fn new(mode: u16, stream: S) -> Self {
        Session {
            stream,
            mode,
            progress: Arc::new(Mutex::new(Progress { stage: Stage::Idle, sent: 0, total: 0 })),
        }
    }

    pub fn status(&self) -> Progress {
        *self.progress.lock().expect("progress mutex poisoned")
    }

    pub fn handle(&self) -> ProgressHandle {
        ProgressHandle(self.progress.clone())
    }

    fn set_stage(&self, stage: Stage) {
        self.progress.lock().expect("progress mutex poisoned").stage = stage;
    }

    fn set_sent(&self, sent: u64) {
        self.progress.lock().expect("progress mutex poisoned").sent = sent;
    }

    fn set_total(&self, total: u64) {
        self.progress.lock().expect("progress mutex poisoned").total = total;
    }

    fn genkey(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        if self.mode & mode::LEGACY != 0 {
            let bits = if self.mode & mode::RSA_4K != 0 { 4096 } else { 2048 };
            crypto::rsa_genkey(bits)
        } else {
            Ok(crypto::ecc_genkey())
        }
    }

    fn wrap_algo(&self) -> &'static str {
        if self.mode & mode::LEGACY != 0 {
            "rsa1"
        } else {
            "ecc1"
        }
    }

    /// Initiator side: send our mode + pubkey, read back the responder's.
    fn handshake_send(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let (my_pub, my_priv) = self.genkey()?;
        if my_pub.len() > u16::MAX as usize {
            return Err(AftError::Crypto("public key too long".into()));
        }
        let mut buf = Vec::with_capacity(8 + my_pub.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&self.mode.to_be_bytes());
        buf.extend_from_slice(&(my_pub.len() as u16).to_be_bytes());
        buf.extend_from_slice(&my_pub);
        self.stream.write_all(&buf)?;

        let mut len_buf = [0u8; 2];
        self.stream.read_exact(&mut len_buf)?;
        let peer_len = u16::from_be_bytes(len_buf) as usize;
        let mut peer_pub = vec![0u8; peer_len];
        self.stream.read_exact(&mut peer_pub)?;
        Ok((peer_pub, my_priv))
    }

    /// Responder side: read the initiator's mode + pubkey, send ours back.
    fn handshake_receive(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut header = [0u8; 8];
        self.stream.read_exact(&mut header)?;
        if &header[..4] != MAGIC {
            return Err(AftError::Format("bad handshake magic".into()));
        }
        self.mode = u16::from_be_bytes([header[4], header[5]]);
        let peer_len = u16::from_be_bytes([header[6], header[7]]) as usize;
        let mut peer_pub = vec![0u8; peer_len];
        self.stream.read_exact(&mut peer_pub)?;

        let (my_pub, my_priv) = self.genkey()?;
        if my_pub.len() > u16::MAX as usize {
            return Err(AftError::Crypto("generated public key too long".into()));
        }
        let mut resp = Vec::with_capacity(2 + my_pub.len());
        resp.extend_from_slice(&(my_pub.len() as u16).to_be_bytes());
        resp.extend_from_slice(&my_pub);
        self.stream.write_all(&resp)?;
        Ok((peer_pub, my_priv))
    }

    fn notify_remote_error(&mut self) {
        let _ = self.stream.write_all(&MAX8);
    }

    /// Send `data` (authenticated) plus a cleartext-carried-but-AEAD-sealed
    /// `smsg`. Spawns a heartbeat thread while the payload is assembled.
    pub fn send(&mut self, data: &[u8], smsg: &str) -> Result<()> {
        self.set_stage(Stage::Handshake);
        let (peer_pub, my_priv) = self.handshake_send().map_err(|e| {
            self.set_stage(Stage::Error);
            e
        })?;

        let (commit_tx, commit_rx) = mpsc::channel::<bool>();
        let mut hb_stream = self.stream.try_clone()?;
        let heartbeat = thread::spawn(move || loop {
            match commit_rx.recv_timeout(Duration::from_secs(1)) {
                Ok(true) => break,
                Ok(false) => {
                    let _ = hb_stream.write_all(&MAX8);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if hb_stream.write_all(&ZERO8).is_err() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        self.set_stage(Stage::Encrypting);
        let built = (|| -> Result<Vec<u8>> {
            let mut header = OpsecHeader::new();
            header.reset();
            header.size = data.len() as i64 + 16;
            header.smsg = smsg.to_string();
            header.encpub(self.wrap_algo(), &peer_pub, &my_priv)?;
            let body = crypto::aead_encrypt(&header.body_key, data)?;
            let mut payload = Vec::new();
            header.write(&mut payload, &[])?;
            payload.extend_from_slice(&body);
            Ok(payload)
        })();

        let payload = match built {
            Ok(p) => p,
            Err(e) => {
                let _ = commit_tx.send(false);
                let _ = heartbeat.join();
                self.set_stage(Stage::Error);
                return Err(e);
            }
        };
        let _ = commit_tx.send(true);
        let _ = heartbeat.join();

        self.set_stage(Stage::Transferring);
        let total = payload.len() as u64;
        self.set_sent(0);
        self.set_total(total);
        self.stream.write_all(&total.to_be_bytes()).map_err(|e| {
            self.set_stage(Stage::Error);
            e
        })?;

        let mut sent = 0u64;
        while sent < total {
            let end = (sent + CHUNK as u64).min(total);
            self.stream.write_all(&payload[sent as usize..end as usize]).map_err(|e| {
                self.set_stage(Stage::Error);
                e
            })?;
            sent = end;
            self.set_sent(sent);
        }

        let mut term = [0u8; 8];
        self.stream.read_exact(&mut term).map_err(|e| {
            self.set_stage(Stage::Error);
            e
        })?;
        if term != ZERO8 {
            self.set_stage(Stage::Error);
            return Err(AftError::RemoteError);
        }
        self.set_stage(Stage::Complete);
        Ok(())
    }

    /// Receive a payload sent by the peer's `send`. Returns `(data, smsg)`.
    pub fn receive(&mut self) -> Result<(Vec<u8>, String)> {
        self.set_stage(Stage::Handshake);
        let (peer_pub, my_priv) = self.handshake_receive().map_err(|e| {
            self.set_stage(Stage::Error);
            e
        })?;

        self.set_stage(Stage::Transferring);
        let mut buf8 = [0u8; 8];
        let total = loop {
            self.stream.read_exact(&mut buf8).map_err(|e| {
                self.set_stage(Stage::Error);
                e
            })?;
            if buf8 == ZERO8 {
                continue;
            }
            if buf8 == MAX8 {
                self.set_stage(Stage::Error);
                return Err(AftError::RemoteError);
            }
            break u64::from_be_bytes(buf8);
        };
        self.set_total(total);

        let mut payload = vec![0u8; total as usize];
        let mut received = 0u64;
        while received < total {
            let n = self.stream.read(&mut payload[received as usize..]).map_err(|e| {
                self.set_stage(Stage::Error);
                e
            })?;
            if n == 0 {
                self.set_stage(Stage::Error);
                return Err(AftError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed before full payload arrived",
                )));
            }
            received += n as u64;
            self.set_sent(received);
        }

        let mut cursor = Cursor::new(&payload);
        let raw = OpsecHeader::read(&mut cursor, 0).map_err(|e| {
            self.notify_remote_error();
            self.set_stage(Stage::Error);
            e
        })?;
        let mut header = OpsecHeader::new();
        header.view(&raw).map_err(|e| {
            self.notify_remote_error();
            self.set_stage(Stage::Error);
            e
        })?;
        header.decpub(&my_priv, &peer_pub).map_err(|e| {
            self.notify_remote_error();
            self.set_stage(Stage::Error);
            e
        })?;

        self.set_stage(Stage::Encrypting);
        if header.body_algo != "gcm1" {
            self.notify_remote_error();
            self.set_stage(Stage::Error);
            return Err(AftError::Format(format!("unsupported body algorithm {}", header.body_algo)));
        }
        let body_offset = cursor.position() as usize;
        let data = crypto::aead_decrypt(&header.body_key, &payload[body_offset..]).map_err(|e| {
            self.notify_remote_error();
            self.set_stage(Stage::Error);
            e
        })?;

        self.stream.write_all(&ZERO8).map_err(|e| {
            self.set_stage(Stage::Error);
            e
        })?;
        self.set_stage(Stage::Complete);
        Ok((data, header.smsg.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn send_receive_roundtrip() {
        let (a, b) = loopback_pair();
        let mut sender = Session::new(0, a);
        let mut receiver = Session::new(0, b);

        let send_thread = thread::spawn(move || sender.send(b"hello world", "secret-note"));
        let (data, smsg) = receiver.receive().unwrap();
        send_thread.join().unwrap().unwrap();

        assert_eq!(data, b"hello world");
        assert_eq!(smsg, "secret-note");
    }

    #[test]
    fn msgonly_transfer_carries_no_body() {
        let (a, b) = loopback_pair();
        let mut sender = Session::new(mode::MSGONLY, a);
        let mut receiver = Session::new(mode::MSGONLY, b);

        let send_thread = thread::spawn(move || sender.send(b"", "ping"));
        let (data, smsg) = receiver.receive().unwrap();
        send_thread.join().unwrap().unwrap();

        assert!(data.is_empty());
        assert_eq!(smsg, "ping");
    }

    #[test]
    fn legacy_mode_uses_rsa() {
        let (a, b) = loopback_pair();
        let mut sender = Session::new(mode::LEGACY, a);
        let mut receiver = Session::new(mode::LEGACY, b);

        let send_thread = thread::spawn(move || sender.send(b"rsa path", ""));
        let (data, _) = receiver.receive().unwrap();
        send_thread.join().unwrap().unwrap();
        assert_eq!(data, b"rsa path");
    }

    #[test]
    fn dropped_connection_reports_io_not_truncated_data() {
        let (a, b) = loopback_pair();
        let mut sender = Session::new(0, a);
        let mut receiver = Session::new(0, b);

        let send_thread = thread::spawn(move || {
            let _ = sender.handshake_send();
            // Drop immediately after handshake: receiver must never return partial data.
        });
        let result = receiver.receive();
        let _ = send_thread.join();
        assert!(result.is_err());
    }
}
