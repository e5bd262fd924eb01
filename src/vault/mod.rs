//! The directory-backed encrypted vault: name tables, account and name
//! persistence, key rotation.

pub mod nametable;
pub mod ops;

use crate::bencode;
use crate::crypto;
use crate::decoy;
use crate::error::{AftError, Result};
use crate::opsec::OpsecHeader;
use nametable::NameTable;
use std::fs;
use std::path::{Path, PathBuf};

/// Default per-file ceiling: 512 MiB.
pub const DEFAULT_LIMIT: u64 = 512 * 1024 * 1024;

#[derive(Debug)]
pub struct Vault {
    pub path: PathBuf,
    pub limit: u64,
    pub algo: String,
    pub ext: String,
    pub public: Vec<u8>,
    pub private: Vec<u8>,
    pub names: NameTable,
}

/// Password-wrap algorithm tag the account blob uses for a given vault algo.
fn account_wrap_algo(algo: &str) -> &'static str {
    match algo {
        "ecc1" => "arg1",
        _ => "pbk1",
    }
}

impl Vault {
    /// Create a brand-new vault in memory with a fresh keypair. Nothing is
    /// written to disk until `store_account`/`store_name`.
    pub fn new(path: impl Into<PathBuf>, algo: &str, ext: &str) -> Result<Self> {
        if algo != "ecc1" && algo != "rsa1" {
            return Err(AftError::Format(format!("unknown vault algo {algo}")));
        }
        if ext != "png" && ext != "webp" && ext != "bin" {
            return Err(AftError::Format(format!("unknown decoy ext {ext}")));
        }
        let mut v = Vault {
            path: path.into(),
            limit: DEFAULT_LIMIT,
            algo: algo.to_string(),
            ext: ext.to_string(),
            public: Vec::new(),
            private: Vec::new(),
            names: NameTable::new(),
        };
        v.new_keypair()?;
        Ok(v)
    }

    /// (Re)generate the vault's asymmetric keypair.
    pub fn new_keypair(&mut self) -> Result<()> {
        let (public, private) = match self.algo.as_str() {
            "ecc1" => crypto::ecc_genkey(),
            "rsa1" => crypto::rsa_genkey(2048)?,
            other => return Err(AftError::Format(format!("unknown vault algo {other}"))),
        };
        self.public = public;
        self.private = private;
        Ok(())
    }

    fn account_path(&self) -> PathBuf {
        self.path.join(format!("account.{}", self.ext))
    }

    fn name_path(&self) -> PathBuf {
        self.path.join(format!("name.{}", self.ext))
    }

    /// Locate the single `account.*` and `name.*` files in `path`, returning
    /// `(account_path, name_path, ext)`.
    fn discover(path: &Path) -> Result<(PathBuf, PathBuf, String)> {
        let mut account = None;
        let mut name = None;
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let fname = entry.file_name();
            let fname = fname.to_string_lossy();
            if let Some(ext) = fname.strip_prefix("account.") {
                if account.replace((entry.path(), ext.to_string())).is_some() {
                    return Err(AftError::Format("multiple account.* files".into()));
                }
            } else if let Some(ext) = fname.strip_prefix("name.") {
                if name.replace((entry.path(), ext.to_string())).is_some() {
                    return Err(AftError::Format("multiple name.* files".into()));
                }
            }
        }
        let (account_path, account_ext) = account.ok_or_else(|| AftError::Format("missing account.* file".into()))?;
        let (name_path, name_ext) = name.ok_or_else(|| AftError::Format("missing name.* file".into()))?;
        if account_ext != name_ext {
            return Err(AftError::Format("account/name ext mismatch".into()));
        }
        Ok((account_path, name_path, account_ext))
    }

    /// Load an existing vault. On authentication failure the account's
    /// `msg` hint is still returned, via `AftError::Auth(Some(msg))`.
    pub fn load(path: impl Into<PathBuf>, pw: &[u8], kf: &[u8]) -> Result<(Self, String)> {
        let path = path.into();
        let (account_path, name_path, ext) = Self::discover(&path)?;
        let decoy_len = decoy::prefix(&ext).len();

        let mut account_file = fs::File::open(&account_path)?;
        let raw = OpsecHeader::read(&mut account_file, decoy_len)?;
        let mut header = OpsecHeader::new();
        header.view(&raw)?;
        let msg = header.msg.clone();

        let mut account_body = vec![0u8; header.size as usize];
        std::io::Read::read_exact(&mut account_file, &mut account_body)?;

        header.decpw(pw, kf)?; // Err already carries Auth(Some(msg))
        crypto::aead_decrypt(&header.body_key, &account_body)?;

        let fields: Vec<&str> = header.smsg.split('\n').collect();
        if fields.len() != 4 {
            return Err(AftError::Format("account payload must have 4 fields".into()));
        }
        let algo = fields[0].to_string();
        let ext2 = fields[1].to_string();
        if ext2 != ext {
            return Err(AftError::Format("account ext disagrees with filename".into()));
        }
        let public = bencode::decode_bytes(fields[2])?;
        let private = bencode::decode_bytes(fields[3])?;

        let mut name_file = fs::File::open(&name_path)?;
        let raw = OpsecHeader::read(&mut name_file, decoy_len)?;
        let mut name_header = OpsecHeader::new();
        name_header.view(&raw)?;
        let mut name_body = vec![0u8; name_header.size as usize];
        std::io::Read::read_exact(&mut name_file, &mut name_body)?;
        name_header.decpub(&private, &public)?;
        let plain = crypto::aead_decrypt(&name_header.body_key, &name_body)?;
        let payload = String::from_utf8(plain).map_err(|_| AftError::Format("name table not utf-8".into()))?;
        let names = NameTable::from_payload(&payload)?;

        let vault = Vault {
            path,
            limit: DEFAULT_LIMIT,
            algo,
            ext,
            public,
            private,
            names,
        };
        Ok((vault, msg))
    }

    /// Serialize and (over)write `account.<ext>`, sidecar-renaming any
    /// existing one to `.old` first.
    pub fn store_account(&self, pw: &[u8], kf: &[u8], msg: &str) -> Result<()> {
        let secret = format!(
            "{}\n{}\n{}\n{}",
            self.algo,
            self.ext,
            bencode::encode_bytes(&self.public),
            bencode::encode_bytes(&self.private),
        );
        let mut header = OpsecHeader::new();
        header.reset();
        header.msg = msg.to_string();
        header.smsg = secret;
        header.encpw(account_wrap_algo(&self.algo), pw, kf)?;
        let body = crypto::aead_encrypt(&header.body_key, b"")?;
        header.size = body.len() as i64;

        let decoy = decoy::prefix(&self.ext);
        let mut bytes = Vec::new();
        header.write(&mut bytes, &decoy)?;
        bytes.extend_from_slice(&body);
        persist_blob(&self.account_path(), &bytes)
    }

    /// Serialize and (over)write `name.<ext>`.
    pub fn store_name(&self) -> Result<()> {
        let mut header = OpsecHeader::new();
        header.reset();
        header.encpub(&self.algo, &self.public, &self.private)?;
        let payload = self.names.to_payload();
        let body = crypto::aead_encrypt(&header.body_key, payload.as_bytes())?;
        header.size = body.len() as i64;

        let decoy = decoy::prefix(&self.ext);
        let mut bytes = Vec::new();
        header.write(&mut bytes, &decoy)?;
        bytes.extend_from_slice(&body);
        persist_blob(&self.name_path(), &bytes)
    }

    fn cipher_abs_path(&self, cipher: &str) -> PathBuf {
        self.path.join(cipher)
    }
}

/// Rename any existing file at `path` to `<path>.old`, then write `bytes`.
/// Best-effort atomicity only: a crash between the rename and the write
/// still loses the new content, though the previous version survives as
/// the `.old` sidecar.
fn persist_blob(path: &Path, bytes: &[u8]) -> Result<()> {
    if path.exists() {
        let old = PathBuf::from(format!("{}.old", path.display()));
        fs::rename(path, old)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn store_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut v = Vault::new(dir.path(), "ecc1", "webp").unwrap();
        v.store_account(b"hunter2", b"", "home").unwrap();
        v.store_name().unwrap();

        let (loaded, msg) = Vault::load(dir.path(), b"hunter2", b"").unwrap();
        assert_eq!(msg, "home");
        assert_eq!(loaded.algo, "ecc1");
        assert_eq!(loaded.ext, "webp");
        assert_eq!(loaded.public, v.public);
        assert_eq!(loaded.private, v.private);
    }

    #[test]
    fn wrong_password_exposes_hint() {
        let dir = tempdir().unwrap();
        let v = Vault::new(dir.path(), "ecc1", "png").unwrap();
        v.store_account(b"hunter2", b"", "home").unwrap();
        v.store_name().unwrap();

        match Vault::load(dir.path(), b"wrong", b"") {
            Err(AftError::Auth(Some(msg))) => assert_eq!(msg, "home"),
            other => panic!("expected Auth(Some(home)), got {other:?}"),
        }
    }
}
