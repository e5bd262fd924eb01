//! The cryptographic primitives façade.
//!
//! Every other module reaches the concrete algorithms only through the
//! functions below — AES-GCM, Argon2id/PBKDF2, X25519 ECDH, RSA-OAEP, CRC32
//! and the CSPRNG are real crates, never hand-rolled.

use crate::error::{AftError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use rand_core::OsRng as XOsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

/// 32-byte key ‖ 12-byte nonce, the unit of a "body key" everywhere in this crate.
pub const KEY_BUNDLE_LEN: usize = 44;
const KEYFILE_CAP: usize = 1024;

/// AES-256-GCM encrypt; output is `ciphertext ‖ 16-byte tag`.
pub fn aead_encrypt(key_bundle: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let (key, nonce) = split_bundle(key_bundle)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| AftError::Crypto("aead encrypt failed".into()))
}

/// AES-256-GCM decrypt; `AftError::Auth` on tag mismatch.
pub fn aead_decrypt(key_bundle: &[u8], ct_with_tag: &[u8]) -> Result<Vec<u8>> {
    let (key, nonce) = split_bundle(key_bundle)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ct_with_tag)
        .map_err(|_| AftError::Auth(None))
}

fn split_bundle(bundle: &[u8]) -> Result<(&[u8], &[u8])> {
    if bundle.len() != KEY_BUNDLE_LEN {
        return Err(AftError::Crypto(format!(
            "expected {KEY_BUNDLE_LEN}-byte key bundle, got {}",
            bundle.len()
        )));
    }
    Ok((&bundle[..32], &bundle[32..44]))
}

/// Fresh CSPRNG bytes.
pub fn random(n: usize) -> Vec<u8> {
    let mut v = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut v);
    v
}

fn random_array<const N: usize>() -> [u8; N] {
    let mut b = [0u8; N];
    rand::thread_rng().fill_bytes(&mut b);
    b
}

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

fn cap_keyfile(kf: &[u8]) -> &[u8] {
    &kf[..kf.len().min(KEYFILE_CAP)]
}

/// Argon2id key derivation producing a 44-byte key+nonce bundle.
///
/// `salt` is the 16 raw bytes stored in `head_params`; password and keyfile
/// (capped to 1024 bytes) are mixed into the Argon2 input directly rather
/// than via a `PasswordHasher`, then HKDF-expanded into a stable key+nonce
/// bundle so re-deriving from the same password always yields the same
/// bytes.
pub fn kdf_argon(pw: &[u8], salt: &[u8; 16], kf: &[u8]) -> Result<[u8; KEY_BUNDLE_LEN]> {
    let mut input = pw.to_vec();
    input.extend_from_slice(cap_keyfile(kf));

    let params = Params::new(19456, 2, 1, Some(32))
        .map_err(|e| AftError::Crypto(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut seed = [0u8; 32];
    argon2
        .hash_password_into(&input, salt, &mut seed)
        .map_err(|e| AftError::Crypto(format!("argon2: {e}")))?;
    input.zeroize();

    let hk = Hkdf::<Sha256>::new(None, &seed);
    let mut out = [0u8; KEY_BUNDLE_LEN];
    hk.expand(b"aftvault-kdf-argon1", &mut out)
        .map_err(|e| AftError::Crypto(format!("hkdf expand: {e}")))?;
    seed.zeroize();
    Ok(out)
}

/// PBKDF2-HMAC-SHA256 key derivation producing a 44-byte key+nonce bundle.
pub fn kdf_pbk(pw: &[u8], salt: &[u8; 16], kf: &[u8]) -> Result<[u8; KEY_BUNDLE_LEN]> {
    let mut input = pw.to_vec();
    input.extend_from_slice(cap_keyfile(kf));

    let mut seed = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(&input, salt, 210_000, &mut seed);
    input.zeroize();

    let hk = Hkdf::<Sha256>::new(None, &seed);
    let mut out = [0u8; KEY_BUNDLE_LEN];
    hk.expand(b"aftvault-kdf-pbk1", &mut out)
        .map_err(|e| AftError::Crypto(format!("hkdf expand: {e}")))?;
    seed.zeroize();
    Ok(out)
}

/// Generate an X25519 keypair for `ecc1` wrapping. Returns `(public, private)`.
pub fn ecc_genkey() -> (Vec<u8>, Vec<u8>) {
    let secret = StaticSecret::random_from_rng(XOsRng);
    let public = PublicKey::from(&secret);
    (public.as_bytes().to_vec(), secret.to_bytes().to_vec())
}

/// Static-static ECDH + HKDF + AES-GCM wrap of a 44-byte body key.
///
/// Output: `12-byte nonce ‖ ciphertext+tag (60 bytes)`. Both sides derive the
/// same shared secret from their own private key and the other's public key,
/// so `head_params` carries no ephemeral key material for this mode.
pub fn ecc_wrap(peer_pub: &[u8], my_priv: &[u8], body_key: &[u8; KEY_BUNDLE_LEN]) -> Result<Vec<u8>> {
    let shared = ecdh(peer_pub, my_priv)?;
    let kek = hkdf_to_32(&shared, b"aftvault-ecc1-wrap")?;
    let nonce = random_array::<12>();
    let bundle = bundle32(&kek, &nonce);
    let ct = aead_encrypt(&bundle, body_key)?;
    let mut out = Vec::with_capacity(12 + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

pub fn ecc_unwrap(my_priv: &[u8], peer_pub: &[u8], wrapped: &[u8]) -> Result<[u8; KEY_BUNDLE_LEN]> {
    if wrapped.len() < 12 {
        return Err(AftError::Auth(None));
    }
    let (nonce, ct) = wrapped.split_at(12);
    let shared = ecdh(peer_pub, my_priv)?;
    let kek = hkdf_to_32(&shared, b"aftvault-ecc1-wrap")?;
    let mut nonce_arr = [0u8; 12];
    nonce_arr.copy_from_slice(nonce);
    let bundle = bundle32(&kek, &nonce_arr);
    let plain = aead_decrypt(&bundle, ct)?;
    to_key_bundle(plain)
}

fn ecdh(peer_pub: &[u8], my_priv: &[u8]) -> Result<[u8; 32]> {
    if peer_pub.len() != 32 || my_priv.len() != 32 {
        return Err(AftError::Crypto("malformed x25519 key".into()));
    }
    let mut pk = [0u8; 32];
    pk.copy_from_slice(peer_pub);
    let mut sk = [0u8; 32];
    sk.copy_from_slice(my_priv);
    let secret = StaticSecret::from(sk);
    sk.zeroize();
    let shared = secret.diffie_hellman(&PublicKey::from(pk));
    Ok(*shared.as_bytes())
}

fn hkdf_to_32(ikm: &[u8], info: &[u8]) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut out = [0u8; 32];
    hk.expand(info, &mut out)
        .map_err(|e| AftError::Crypto(format!("hkdf expand: {e}")))?;
    Ok(out)
}

fn bundle32(key: &[u8; 32], nonce: &[u8; 12]) -> [u8; KEY_BUNDLE_LEN] {
    let mut b = [0u8; KEY_BUNDLE_LEN];
    b[..32].copy_from_slice(key);
    b[32..].copy_from_slice(nonce);
    b
}

fn to_key_bundle(v: Vec<u8>) -> Result<[u8; KEY_BUNDLE_LEN]> {
    if v.len() != KEY_BUNDLE_LEN {
        return Err(AftError::Auth(None));
    }
    let mut out = [0u8; KEY_BUNDLE_LEN];
    out.copy_from_slice(&v);
    Ok(out)
}

/// Generate an RSA keypair for `rsa1` wrapping. `bits` is 2048 or 4096.
pub fn rsa_genkey(bits: usize) -> Result<(Vec<u8>, Vec<u8>)> {
    let priv_key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        .map_err(|e| AftError::Crypto(format!("rsa keygen: {e}")))?;
    let pub_key = RsaPublicKey::from(&priv_key);
    let pub_bytes = rsa::pkcs1::EncodeRsaPublicKey::to_pkcs1_der(&pub_key)
        .map_err(|e| AftError::Crypto(e.to_string()))?;
    let priv_bytes = rsa::pkcs1::EncodeRsaPrivateKey::to_pkcs1_der(&priv_key)
        .map_err(|e| AftError::Crypto(e.to_string()))?;
    Ok((pub_bytes.as_bytes().to_vec(), priv_bytes.as_bytes().to_vec()))
}

/// RSA-OAEP(SHA-256) wrap of a 44-byte body key.
pub fn rsa_wrap(pub_key_der: &[u8], body_key: &[u8; KEY_BUNDLE_LEN]) -> Result<Vec<u8>> {
    let pub_key = <RsaPublicKey as rsa::pkcs1::DecodeRsaPublicKey>::from_pkcs1_der(pub_key_der)
        .map_err(|e| AftError::Crypto(format!("rsa public key: {e}")))?;
    pub_key
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), body_key)
        .map_err(|e| AftError::Crypto(format!("rsa wrap: {e}")))
}

pub fn rsa_unwrap(priv_key_der: &[u8], wrapped: &[u8]) -> Result<[u8; KEY_BUNDLE_LEN]> {
    let priv_key = <RsaPrivateKey as rsa::pkcs1::DecodeRsaPrivateKey>::from_pkcs1_der(priv_key_der)
        .map_err(|e| AftError::Crypto(format!("rsa private key: {e}")))?;
    let plain = priv_key
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|_| AftError::Auth(None))?;
    to_key_bundle(plain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aead_roundtrip() {
        let key = random(KEY_BUNDLE_LEN);
        let ct = aead_encrypt(&key, b"hello world").unwrap();
        let pt = aead_decrypt(&key, &ct).unwrap();
        assert_eq!(pt, b"hello world");
    }

    #[test]
    fn aead_tamper_fails() {
        let key = random(KEY_BUNDLE_LEN);
        let mut ct = aead_encrypt(&key, b"hello world").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(aead_decrypt(&key, &ct).is_err());
    }

    #[test]
    fn argon_kdf_is_deterministic_per_salt() {
        let salt = [7u8; 16];
        let a = kdf_argon(b"hunter2", &salt, b"").unwrap();
        let b = kdf_argon(b"hunter2", &salt, b"").unwrap();
        assert_eq!(a, b);
        let c = kdf_argon(b"other", &salt, b"").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn ecc_wrap_roundtrip() {
        let (a_pub, a_priv) = ecc_genkey();
        let (b_pub, b_priv) = ecc_genkey();
        let body_key: [u8; KEY_BUNDLE_LEN] = random(KEY_BUNDLE_LEN).try_into().unwrap();

        let wrapped = ecc_wrap(&b_pub, &a_priv, &body_key).unwrap();
        let unwrapped = ecc_unwrap(&b_priv, &a_pub, &wrapped).unwrap();
        assert_eq!(unwrapped, body_key);
    }

    #[test]
    fn ecc_wrap_wrong_side_fails() {
        let (a_pub, a_priv) = ecc_genkey();
        let (b_pub, _b_priv) = ecc_genkey();
        let (c_pub, c_priv) = ecc_genkey();
        let body_key: [u8; KEY_BUNDLE_LEN] = random(KEY_BUNDLE_LEN).try_into().unwrap();

        let wrapped = ecc_wrap(&b_pub, &a_priv, &body_key).unwrap();
        // c tries to unwrap pretending to be b: wrong static key -> wrong shared secret.
        assert!(ecc_unwrap(&c_priv, &a_pub, &wrapped).is_err());
    }

    #[test]
    fn rsa_wrap_roundtrip() {
        let (pub_key, priv_key) = rsa_genkey(2048).unwrap();
        let body_key: [u8; KEY_BUNDLE_LEN] = random(KEY_BUNDLE_LEN).try_into().unwrap();
        let wrapped = rsa_wrap(&pub_key, &body_key).unwrap();
        let unwrapped = rsa_unwrap(&priv_key, &wrapped).unwrap();
        assert_eq!(unwrapped, body_key);
    }

    #[test]
    fn crc32_is_stable() {
        assert_eq!(crc32(b"abc"), crc32(b"abc"));
        assert_ne!(crc32(b"abc"), crc32(b"abd"));
    }
}
