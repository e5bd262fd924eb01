//! Vault mutators: `add`, `write`, `read`, `rename`, `del`, `trim`,
//! `rotate_keys`.

use super::nametable::is_folder;
use super::Vault;
use crate::crypto;
use crate::decoy;
use crate::error::{AftError, Result};
use crate::opsec::OpsecHeader;
use std::fs;
use std::io::Read as _;
use std::path::Path;

impl Vault {
    /// Import a file or directory from the local filesystem under `parent`
    /// (`""` for the vault root, or `"folder/"`). Directories recurse one
    /// level deep; nested subdirectories are flattened away.
    pub fn add(&mut self, fs_path: &Path, parent: &str) -> Result<()> {
        let meta = fs::metadata(fs_path)?;
        let basename = fs_path
            .file_name()
            .ok_or_else(|| AftError::Format("path has no file name".into()))?
            .to_string_lossy()
            .to_string();

        if meta.is_file() {
            if meta.len() > self.limit {
                return Err(AftError::FileTooBig(self.limit as i64));
            }
            let data = fs::read(fs_path)?;
            let target = format!("{parent}{basename}");
            self.write(&target, &data)
        } else if meta.is_dir() {
            if !parent.is_empty() {
                // Already one level deep: flatten away nested directories.
                return Ok(());
            }
            let folder_plain = format!("{basename}/");
            let folder_cipher = self.alloc_cipher_name(true);
            fs::create_dir_all(self.cipher_abs_path(&folder_cipher))?;
            self.names.insert(&folder_plain, &folder_cipher)?;
            self.store_name()?;

            for entry in fs::read_dir(fs_path)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    self.add(&entry.path(), &folder_plain)?;
                }
            }
            Ok(())
        } else {
            Err(AftError::Format(format!("{} is neither a file nor a directory", fs_path.display())))
        }
    }

    /// Encrypt `data` under the vault keypair and store it as `name`,
    /// reusing an existing cipher name if one is already registered.
    pub fn write(&mut self, name: &str, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.limit {
            return Err(AftError::FileTooBig(self.limit as i64));
        }

        let cipher = if let Some(existing) = self.names.cipher_of(name) {
            existing.to_string()
        } else {
            let cipher = self.alloc_child_cipher_name(name)?;
            self.names.insert(name, &cipher)?;
            cipher
        };

        let mut header = OpsecHeader::new();
        header.reset();
        header.encpub(&self.algo, &self.public, &self.private)?;
        let body = crypto::aead_encrypt(&header.body_key, data)?;
        header.size = body.len() as i64;

        let decoy = decoy::prefix(&self.ext);
        let path = self.cipher_abs_path(&cipher);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&path)?;
        header.write(&mut file, &decoy)?;
        std::io::Write::write_all(&mut file, &body)?;

        self.store_name()
    }

    /// Decrypt and return the bytes stored under `name`.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let cipher = self.names.cipher_of(name).ok_or_else(|| AftError::NotFound(name.to_string()))?;
        read_cipher_file(&self.cipher_abs_path(cipher), &self.ext, &self.private, &self.public)
    }

    /// Rename a file or folder. Cipher names never change; only the plain
    /// side of the bijection moves.
    pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        if is_folder(src) != is_folder(dst) {
            return Err(AftError::Format("rename must keep folder-ness".into()));
        }
        if is_folder(src) {
            self.names.rename_prefix(src, dst)?;
        } else {
            self.names.rename_file(src, dst)?;
        }
        self.store_name()
    }

    /// Delete a file or an entire folder subtree, on disk and in the name
    /// table.
    pub fn del(&mut self, name: &str) -> Result<()> {
        if is_folder(name) {
            let removed = self.names.remove_prefix(name)?;
            for (plain, cipher) in &removed {
                let path = self.cipher_abs_path(cipher);
                if is_folder(plain) {
                    let _ = fs::remove_dir_all(&path);
                } else {
                    let _ = fs::remove_file(&path);
                }
            }
        } else {
            let cipher = self.names.remove(name)?;
            fs::remove_file(self.cipher_abs_path(&cipher))?;
        }
        self.store_name()
    }

    /// Reconcile the name table with what's actually on disk.
    pub fn trim(&mut self) -> Result<u64> {
        let mut count = 0u64;

        let stale: Vec<String> = self
            .names
            .iter()
            .filter(|(_, cipher)| !self.cipher_abs_path(cipher).exists())
            .map(|(plain, _)| plain.to_string())
            .collect();
        for plain in stale {
            self.names.remove(&plain)?;
            count += 1;
        }

        let account_name = format!("account.{}", self.ext);
        let name_name = format!("name.{}", self.ext);
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let fname = entry.file_name().to_string_lossy().to_string();
            if fname == account_name || fname == name_name || fname.ends_with(".old") {
                continue;
            }
            let known = self.names.contains_cipher(&fname)
                || self.names.contains_cipher(&format!("{fname}/"))
                || self.names.iter().any(|(_, c)| c.starts_with(&format!("{fname}/")));
            if known {
                continue;
            }
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            count += 1;
        }

        self.names.rebuild_tree();
        self.store_name()?;
        Ok(count)
    }

    /// Generate a fresh keypair and re-encrypt every stored file under it.
    /// The swap happens before re-encryption starts, so a failure partway
    /// leaves a mixed-key vault; callers SHOULD back up the vault directory
    /// first.
    pub fn rotate_keys(&mut self, pw: &[u8], kf: &[u8], msg: &str) -> Result<()> {
        let old_public = self.public.clone();
        let old_private = self.private.clone();
        self.new_keypair()?;

        let plains: Vec<String> = self.names.iter().map(|(p, _)| p.to_string()).collect();
        for plain in plains {
            if is_folder(&plain) {
                continue;
            }
            let cipher = self.names.cipher_of(&plain).unwrap().to_string();
            let path = self.cipher_abs_path(&cipher);
            let data = read_cipher_file(&path, &self.ext, &old_private, &old_public)?;
            write_cipher_file(&path, &self.ext, &self.algo, &self.public, &self.private, &data)?;
        }

        self.store_account(pw, kf, msg)?;
        self.store_name()
    }

    fn alloc_cipher_name(&self, folder: bool) -> String {
        loop {
            let candidate = hex::encode(crypto::random(12));
            let full = if folder { format!("{candidate}/") } else { format!("{candidate}.{}", self.ext) };
            if !self.names.contains_cipher(&full) {
                return full;
            }
        }
    }

    /// Allocate a cipher name for `name`, placing it under its parent
    /// folder's cipher directory when `name` is nested.
    fn alloc_child_cipher_name(&self, name: &str) -> Result<String> {
        match name.rfind('/') {
            None => Ok(self.alloc_cipher_name(false)),
            Some(idx) => {
                let parent = &name[..idx + 1];
                let parent_cipher = self
                    .names
                    .cipher_of(parent)
                    .ok_or_else(|| AftError::NotFound(parent.to_string()))?
                    .trim_end_matches('/')
                    .to_string();
                loop {
                    let candidate = hex::encode(crypto::random(12));
                    let full = format!("{parent_cipher}/{candidate}.{}", self.ext);
                    if !self.names.contains_cipher(&full) {
                        return Ok(full);
                    }
                }
            }
        }
    }
}

fn read_cipher_file(path: &Path, ext: &str, priv_key: &[u8], pub_key: &[u8]) -> Result<Vec<u8>> {
    let mut file = fs::File::open(path)?;
    let decoy_len = decoy::prefix(ext).len();
    let raw = OpsecHeader::read(&mut file, decoy_len)?;
    let mut header = OpsecHeader::new();
    header.view(&raw)?;
    let mut body = vec![0u8; header.size as usize];
    file.read_exact(&mut body)?;
    header.decpub(priv_key, pub_key)?;
    crypto::aead_decrypt(&header.body_key, &body)
}

fn write_cipher_file(path: &Path, ext: &str, algo: &str, pub_key: &[u8], priv_key: &[u8], data: &[u8]) -> Result<()> {
    let mut header = OpsecHeader::new();
    header.reset();
    header.encpub(algo, pub_key, priv_key)?;
    let body = crypto::aead_encrypt(&header.body_key, data)?;
    header.size = body.len() as i64;

    let decoy = decoy::prefix(ext);
    let mut file = fs::File::create(path)?;
    header.write(&mut file, &decoy)?;
    std::io::Write::write_all(&mut file, &body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::Vault;
    use std::fs;
    use tempfile::tempdir;

    fn fresh_vault() -> (tempfile::TempDir, Vault) {
        let dir = tempdir().unwrap();
        let v = Vault::new(dir.path(), "ecc1", "bin").unwrap();
        v.store_account(b"hunter2", b"", "home").unwrap();
        v.store_name().unwrap();
        (dir, v)
    }

    #[test]
    fn write_and_read_roundtrip() {
        let (_dir, mut v) = fresh_vault();
        v.write("a.txt", b"hello").unwrap();
        assert_eq!(v.read("a.txt").unwrap(), b"hello");
    }

    #[test]
    fn add_file_and_directory() {
        let (dir, mut v) = fresh_vault();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), b"hello").unwrap();
        fs::create_dir(src.join("docs")).unwrap();
        fs::write(src.join("docs").join("b.txt"), b"world").unwrap();

        for entry in fs::read_dir(&src).unwrap() {
            let entry = entry.unwrap();
            v.add(&entry.path(), "").unwrap();
        }

        assert_eq!(v.read("a.txt").unwrap(), b"hello");
        assert_eq!(v.read("docs/b.txt").unwrap(), b"world");
        assert_eq!(v.names.children(""), &["a.txt".to_string(), "docs/".to_string()]);
    }

    #[test]
    fn rename_folder_moves_prefix() {
        let (_dir, mut v) = fresh_vault();
        v.write("docs/b.txt", b"world").unwrap_err(); // parent doesn't exist yet
        let folder_cipher = v.alloc_cipher_name(true);
        v.names.insert("docs/", &folder_cipher).unwrap();
        v.store_name().unwrap();
        v.write("docs/b.txt", b"world").unwrap();

        v.rename("docs/", "archive/").unwrap();
        assert_eq!(v.read("archive/b.txt").unwrap(), b"world");
        assert!(v.read("docs/b.txt").is_err());
    }

    #[test]
    fn trim_drops_orphan_file() {
        let (dir, mut v) = fresh_vault();
        v.write("a.txt", b"hello").unwrap();
        fs::write(dir.path().join("garbage.bin"), b"junk").unwrap();

        let count = v.trim().unwrap();
        assert!(count >= 1);
        assert!(!dir.path().join("garbage.bin").exists());
        assert_eq!(v.read("a.txt").unwrap(), b"hello");
    }

    #[test]
    fn del_file_removes_entry_and_disk() {
        let (_dir, mut v) = fresh_vault();
        v.write("a.txt", b"hello").unwrap();
        let cipher = v.names.cipher_of("a.txt").unwrap().to_string();
        v.del("a.txt").unwrap();
        assert!(v.read("a.txt").is_err());
        assert!(!v.cipher_abs_path(&cipher).exists());
    }

    #[test]
    fn rotate_keys_reencrypts_under_new_pair() {
        let (_dir, mut v) = fresh_vault();
        v.write("a.txt", b"hello").unwrap();
        let old_pub = v.public.clone();
        v.rotate_keys(b"hunter2", b"", "home").unwrap();
        assert_ne!(v.public, old_pub);
        assert_eq!(v.read("a.txt").unwrap(), b"hello");
    }
}
