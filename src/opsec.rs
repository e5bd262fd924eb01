//! The opsec header: a self-describing, CRC-protected header shared by
//! vault blobs and transfer payloads.

use crate::crypto::{self, KEY_BUNDLE_LEN};
use crate::error::{AftError, Result};
use std::io::{Read, Write};
use zeroize::Zeroize;

/// Wire layout (all integers big-endian, self-delimiting, CRC over everything
/// that precedes the trailing 4-byte CRC field):
///
/// ```text
/// head_algo        : 4 ASCII bytes
/// msg_len          : u16, msg : msg_len bytes
/// head_params_len  : u16, head_params : head_params_len bytes
/// head_key_len     : u16, head_key : head_key_len bytes
/// body_algo        : 4 ASCII bytes
/// body_size        : i64
/// smsg_nonce       : 12 bytes
/// smsg_len         : u16, smsg_ct : smsg_len bytes
/// crc32            : u32, over every byte above
/// ```
///
/// `smsg_nonce` is carried as its own explicit field so the AEAD over
/// `smsg` never reuses the body's own nonce even though both encrypt under
/// the same `body_key`.
#[derive(Debug, Clone)]
pub struct OpsecHeader {
    pub msg: String,
    pub smsg: String,
    pub size: i64,
    pub body_algo: String,
    pub body_key: [u8; KEY_BUNDLE_LEN],
    pub head_algo: String,
    pub head_params: Vec<u8>,
    pub head_key: Vec<u8>,
    smsg_nonce: [u8; 12],
    smsg_ct: Vec<u8>,
}

impl Default for OpsecHeader {
    fn default() -> Self {
        Self {
            msg: String::new(),
            smsg: String::new(),
            size: 0,
            body_algo: String::new(),
            body_key: [0u8; KEY_BUNDLE_LEN],
            head_algo: String::new(),
            head_params: Vec::new(),
            head_key: Vec::new(),
            smsg_nonce: [0u8; 12],
            smsg_ct: Vec::new(),
        }
    }
}

impl OpsecHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill `body_key` with fresh randomness and fix `body_algo`.
    pub fn reset(&mut self) {
        let fresh = crypto::random(KEY_BUNDLE_LEN);
        self.body_key.copy_from_slice(&fresh);
        self.body_algo = "gcm1".to_string();
    }

    /// Wrap `body_key` with a password+keyfile-derived key. `algo` is `arg1`
    /// (Argon2id) or `pbk1` (PBKDF2).
    pub fn encpw(&mut self, algo: &str, pw: &[u8], kf: &[u8]) -> Result<()> {
        let salt: [u8; 16] = crypto::random(16)
            .try_into()
            .expect("random(16) returns 16 bytes");
        let kek = match algo {
            "arg1" => crypto::kdf_argon(pw, &salt, kf)?,
            "pbk1" => crypto::kdf_pbk(pw, &salt, kf)?,
            other => return Err(AftError::Crypto(format!("unknown password-wrap algo {other}"))),
        };
        self.head_key = crypto::aead_encrypt(&kek, &self.body_key)?;
        self.head_params = salt.to_vec();
        self.head_algo = algo.to_string();
        Ok(())
    }

    /// Wrap `body_key` with a public-key algorithm. `algo` is `ecc1`
    /// (X25519 ECDH) or `rsa1` (RSA-OAEP).
    pub fn encpub(&mut self, algo: &str, peer_pub: &[u8], my_priv: &[u8]) -> Result<()> {
        self.head_key = match algo {
            "ecc1" => crypto::ecc_wrap(peer_pub, my_priv, &self.body_key)?,
            "rsa1" => crypto::rsa_wrap(peer_pub, &self.body_key)?,
            other => return Err(AftError::Crypto(format!("unknown public-key wrap algo {other}"))),
        };
        self.head_params.clear();
        self.head_algo = algo.to_string();
        Ok(())
    }

    /// Encrypt `smsg` under `body_key` with a nonce distinct from the body's.
    fn seal_smsg(&mut self) -> Result<()> {
        let nonce: [u8; 12] = crypto::random(12).try_into().expect("random(12) returns 12 bytes");
        let bundle = smsg_bundle(&self.body_key, &nonce);
        self.smsg_ct = crypto::aead_encrypt(&bundle, self.smsg.as_bytes())?;
        self.smsg_nonce = nonce;
        Ok(())
    }

    fn open_smsg(&mut self) -> Result<()> {
        let bundle = smsg_bundle(&self.body_key, &self.smsg_nonce);
        let plain = crypto::aead_decrypt(&bundle, &self.smsg_ct)?;
        self.smsg = String::from_utf8(plain).map_err(|_| AftError::Format("smsg not utf-8".into()))?;
        Ok(())
    }

    /// Serialize the header (sealing `smsg` first) and write `decoy ‖ header`.
    pub fn write(&mut self, sink: &mut impl Write, decoy: &[u8]) -> Result<()> {
        self.seal_smsg()?;
        sink.write_all(decoy)?;
        sink.write_all(&self.header_bytes())?;
        Ok(())
    }

    fn header_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(tag4(&self.head_algo).as_slice());
        write_u16_field(&mut out, self.msg.as_bytes());
        write_u16_field(&mut out, &self.head_params);
        write_u16_field(&mut out, &self.head_key);
        out.extend_from_slice(tag4(&self.body_algo).as_slice());
        out.extend_from_slice(&self.size.to_be_bytes());
        out.extend_from_slice(&self.smsg_nonce);
        write_u16_field(&mut out, &self.smsg_ct);
        let crc = crypto::crc32(&out);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    /// Skip `decoy_len` bytes, then read and CRC-validate the header
    /// skeleton (without unwrapping `body_key`). Returns the raw header
    /// bytes (decoy excluded) for a later call to [`OpsecHeader::view`].
    pub fn read(src: &mut impl Read, decoy_len: usize) -> Result<Vec<u8>> {
        if decoy_len > 0 {
            let mut discard = vec![0u8; decoy_len];
            src.read_exact(&mut discard)?;
        }

        let mut buf = Vec::new();
        read_exact_into(src, &mut buf, 4)?; // head_algo
        read_len_prefixed(src, &mut buf)?; // msg
        read_len_prefixed(src, &mut buf)?; // head_params
        read_len_prefixed(src, &mut buf)?; // head_key
        read_exact_into(src, &mut buf, 4)?; // body_algo
        read_exact_into(src, &mut buf, 8)?; // body_size
        read_exact_into(src, &mut buf, 12)?; // smsg_nonce
        read_len_prefixed(src, &mut buf)?; // smsg_ct

        let mut crc_bytes = [0u8; 4];
        src.read_exact(&mut crc_bytes)?;
        let want = u32::from_be_bytes(crc_bytes);
        let got = crypto::crc32(&buf);
        if want != got {
            return Err(AftError::Format("opsec header crc mismatch".into()));
        }
        Ok(buf)
    }

    /// Populate fields from header bytes produced by [`OpsecHeader::read`].
    /// Does not touch `body_key`/`smsg` — call `decpw`/`decpub` next.
    pub fn view(&mut self, bytes: &[u8]) -> Result<()> {
        let mut cur = bytes;
        self.head_algo = take_tag4(&mut cur)?;
        self.msg = String::from_utf8(take_len_prefixed(&mut cur)?)
            .map_err(|_| AftError::Format("msg not utf-8".into()))?;
        self.head_params = take_len_prefixed(&mut cur)?;
        self.head_key = take_len_prefixed(&mut cur)?;
        self.body_algo = take_tag4(&mut cur)?;
        self.size = take_i64(&mut cur)?;
        self.smsg_nonce = take_fixed::<12>(&mut cur)?;
        self.smsg_ct = take_len_prefixed(&mut cur)?;

        if self.size < 16 {
            return Err(AftError::Format(format!("opsec body size {} below minimum", self.size)));
        }
        if self.head_algo.len() != 4 || self.body_algo.len() != 4 {
            return Err(AftError::Format("opsec algo tag must be 4 ascii bytes".into()));
        }
        Ok(())
    }

    /// Unwrap `body_key` with password+keyfile; on failure `body_key` is
    /// zeroed but `msg` remains readable as a hint.
    pub fn decpw(&mut self, pw: &[u8], kf: &[u8]) -> Result<()> {
        let salt: [u8; 16] = match self.head_params.as_slice().try_into() {
            Ok(s) => s,
            Err(_) => {
                self.body_key.zeroize();
                return Err(AftError::Format("head_params is not a 16-byte salt".into()));
            }
        };
        let kek = match self.head_algo.as_str() {
            "arg1" => crypto::kdf_argon(pw, &salt, kf),
            "pbk1" => crypto::kdf_pbk(pw, &salt, kf),
            other => {
                self.body_key.zeroize();
                return Err(AftError::Crypto(format!("unknown password-wrap algo {other}")));
            }
        }?;
        match crypto::aead_decrypt(&kek, &self.head_key) {
            Ok(plain) => self.adopt_body_key(plain)?,
            Err(_) => {
                self.body_key.zeroize();
                return Err(AftError::Auth(Some(self.msg.clone())));
            }
        }
        self.open_smsg().map_err(|e| {
            self.body_key.zeroize();
            e
        })
    }

    /// Unwrap `body_key` with an asymmetric key pair.
    pub fn decpub(&mut self, my_priv: &[u8], peer_pub: &[u8]) -> Result<()> {
        let unwrapped = match self.head_algo.as_str() {
            "ecc1" => crypto::ecc_unwrap(my_priv, peer_pub, &self.head_key),
            "rsa1" => crypto::rsa_unwrap(my_priv, &self.head_key),
            other => {
                self.body_key.zeroize();
                return Err(AftError::Crypto(format!("unknown public-key wrap algo {other}")));
            }
        };
        match unwrapped {
            Ok(key) => self.body_key = key,
            Err(_) => {
                self.body_key.zeroize();
                return Err(AftError::Auth(Some(self.msg.clone())));
            }
        }
        self.open_smsg().map_err(|e| {
            self.body_key.zeroize();
            e
        })
    }

    fn adopt_body_key(&mut self, plain: Vec<u8>) -> Result<()> {
        if plain.len() != KEY_BUNDLE_LEN {
            return Err(AftError::Auth(Some(self.msg.clone())));
        }
        self.body_key.copy_from_slice(&plain);
        Ok(())
    }
}

impl Drop for OpsecHeader {
    fn drop(&mut self) {
        self.body_key.zeroize();
    }
}

fn smsg_bundle(body_key: &[u8; KEY_BUNDLE_LEN], nonce: &[u8; 12]) -> [u8; KEY_BUNDLE_LEN] {
    let mut b = *body_key;
    b[32..44].copy_from_slice(nonce);
    b
}

fn tag4(s: &str) -> [u8; 4] {
    let mut out = [0u8; 4];
    let bytes = s.as_bytes();
    let n = bytes.len().min(4);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn write_u16_field(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

fn read_exact_into(src: &mut impl Read, buf: &mut Vec<u8>, n: usize) -> Result<()> {
    let start = buf.len();
    buf.resize(start + n, 0);
    src.read_exact(&mut buf[start..])?;
    Ok(())
}

fn read_len_prefixed(src: &mut impl Read, buf: &mut Vec<u8>) -> Result<()> {
    read_exact_into(src, buf, 2)?;
    let len_bytes = &buf[buf.len() - 2..];
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    read_exact_into(src, buf, len)?;
    Ok(())
}

fn take_tag4(cur: &mut &[u8]) -> Result<String> {
    let bytes = take_fixed::<4>(cur)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| AftError::Format("algo tag not ascii".into()))
}

fn take_fixed<const N: usize>(cur: &mut &[u8]) -> Result<[u8; N]> {
    if cur.len() < N {
        return Err(AftError::Format("opsec header truncated".into()));
    }
    let (head, rest) = cur.split_at(N);
    *cur = rest;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}

fn take_i64(cur: &mut &[u8]) -> Result<i64> {
    Ok(i64::from_be_bytes(take_fixed::<8>(cur)?))
}

fn take_len_prefixed(cur: &mut &[u8]) -> Result<Vec<u8>> {
    let len = u16::from_be_bytes(take_fixed::<2>(cur)?) as usize;
    if cur.len() < len {
        return Err(AftError::Format("opsec header truncated".into()));
    }
    let (head, rest) = cur.split_at(len);
    *cur = rest;
    Ok(head.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn password_roundtrip() {
        let mut h = OpsecHeader::new();
        h.reset();
        h.size = 16;
        h.msg = "hint".into();
        h.smsg = "secret".into();
        h.encpw("arg1", b"hunter2", b"").unwrap();

        let mut buf = Vec::new();
        h.write(&mut Cursor::new(&mut buf), &[]).unwrap();

        let mut cur = Cursor::new(&buf);
        let raw = OpsecHeader::read(&mut cur, 0).unwrap();
        let mut h2 = OpsecHeader::new();
        h2.view(&raw).unwrap();
        assert_eq!(h2.msg, "hint");
        h2.decpw(b"hunter2", b"").unwrap();
        assert_eq!(h2.body_key, h.body_key);
        assert_eq!(h2.smsg, "secret");
    }

    #[test]
    fn wrong_password_exposes_msg_but_zeroes_key() {
        let mut h = OpsecHeader::new();
        h.reset();
        h.size = 16;
        h.msg = "hint".into();
        h.smsg = "secret".into();
        h.encpw("arg1", b"hunter2", b"").unwrap();

        let mut buf = Vec::new();
        h.write(&mut Cursor::new(&mut buf), &[]).unwrap();

        let raw = OpsecHeader::read(&mut Cursor::new(&buf), 0).unwrap();
        let mut h2 = OpsecHeader::new();
        h2.view(&raw).unwrap();
        let err = h2.decpw(b"wrong", b"").unwrap_err();
        match err {
            AftError::Auth(Some(msg)) => assert_eq!(msg, "hint"),
            other => panic!("expected Auth(Some(hint)), got {other:?}"),
        }
        assert_eq!(h2.body_key, [0u8; KEY_BUNDLE_LEN]);
    }

    #[test]
    fn bit_flip_fails_crc_or_auth() {
        let mut h = OpsecHeader::new();
        h.reset();
        h.size = 16;
        h.encpw("pbk1", b"pw", b"").unwrap();
        let mut buf = Vec::new();
        h.write(&mut Cursor::new(&mut buf), &[]).unwrap();

        for i in 0..buf.len() {
            let mut tampered = buf.clone();
            tampered[i] ^= 0x01;
            let mut cur = Cursor::new(&tampered);
            match OpsecHeader::read(&mut cur, 0) {
                Err(AftError::Format(_)) => {} // crc caught it
                Ok(raw) => {
                    let mut h2 = OpsecHeader::new();
                    if h2.view(&raw).is_ok() {
                        assert!(h2.decpw(b"pw", b"").is_err());
                    }
                }
                Err(_) => {}
            }
        }
    }

    #[test]
    fn decoy_offset_is_skipped() {
        let mut h = OpsecHeader::new();
        h.reset();
        h.size = 16;
        h.encpw("arg1", b"pw", b"").unwrap();
        let decoy = crate::decoy::prefix("png");
        let mut buf = Vec::new();
        h.write(&mut Cursor::new(&mut buf), &decoy).unwrap();
        assert_eq!(&buf[..decoy.len()], decoy.as_slice());

        let raw = OpsecHeader::read(&mut Cursor::new(&buf), decoy.len()).unwrap();
        let mut h2 = OpsecHeader::new();
        h2.view(&raw).unwrap();
        h2.decpw(b"pw", b"").unwrap();
        assert_eq!(h2.body_key, h.body_key);
    }
}
