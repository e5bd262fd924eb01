//! The name index: owns `p_to_c`, `c_to_p` and `tree_view` together so the
//! bijection invariant is enforced in one place instead of at every `Vault`
//! call site.

use crate::error::{AftError, Result};
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct NameTable {
    p_to_c: HashMap<String, String>,
    c_to_p: HashMap<String, String>,
    tree_view: HashMap<String, Vec<String>>,
}

/// Is `name` a folder (root-level, one level of nesting only)?
pub fn is_folder(name: &str) -> bool {
    name.ends_with('/')
}

/// Parent key for `tree_view` that `name` belongs under.
fn parent_of(name: &str) -> String {
    match name.rfind('/') {
        Some(idx) if idx + 1 == name.len() => String::new(), // "folder/" itself lives at root
        Some(idx) => name[..idx + 1].to_string(),
        None => String::new(),
    }
}

/// Leaf component `tree_view` stores for `name` under its parent.
fn leaf_of(name: &str) -> String {
    let parent = parent_of(name);
    if parent.is_empty() {
        name.to_string()
    } else {
        name[parent.len()..].to_string()
    }
}

impl NameTable {
    pub fn new() -> Self {
        let mut t = NameTable::default();
        t.tree_view.insert(String::new(), Vec::new());
        t
    }

    pub fn cipher_of(&self, plain: &str) -> Option<&str> {
        self.p_to_c.get(plain).map(String::as_str)
    }

    pub fn plain_of(&self, cipher: &str) -> Option<&str> {
        self.c_to_p.get(cipher).map(String::as_str)
    }

    pub fn contains_cipher(&self, cipher: &str) -> bool {
        self.c_to_p.contains_key(cipher)
    }

    pub fn contains_plain(&self, plain: &str) -> bool {
        self.p_to_c.contains_key(plain)
    }

    pub fn children(&self, parent: &str) -> &[String] {
        self.tree_view.get(parent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.p_to_c.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.p_to_c.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p_to_c.is_empty()
    }

    /// Register a fresh plain/cipher pair. `plain` must not already exist.
    pub fn insert(&mut self, plain: &str, cipher: &str) -> Result<()> {
        if self.p_to_c.contains_key(plain) {
            return Err(AftError::AlreadyExists(plain.to_string()));
        }
        self.p_to_c.insert(plain.to_string(), cipher.to_string());
        self.c_to_p.insert(cipher.to_string(), plain.to_string());

        if is_folder(plain) {
            self.tree_view.entry(plain.to_string()).or_default();
        }
        let parent = parent_of(plain);
        let leaf = leaf_of(plain);
        let siblings = self.tree_view.entry(parent).or_default();
        if let Err(idx) = siblings.binary_search(&leaf) {
            siblings.insert(idx, leaf);
        }
        Ok(())
    }

    /// Remove a single entry (file, or an already-empty folder). Does not
    /// recurse — callers remove folder contents first via `remove_prefix`.
    pub fn remove(&mut self, plain: &str) -> Result<String> {
        let cipher = self
            .p_to_c
            .remove(plain)
            .ok_or_else(|| AftError::NotFound(plain.to_string()))?;
        self.c_to_p.remove(&cipher);
        if is_folder(plain) {
            self.tree_view.remove(plain);
        }
        let parent = parent_of(plain);
        let leaf = leaf_of(plain);
        if let Some(siblings) = self.tree_view.get_mut(&parent) {
            siblings.retain(|s| s != &leaf);
        }
        Ok(cipher)
    }

    /// Remove a folder and every plain name nested under it, returning the
    /// removed `(plain, cipher)` pairs (folder entry last).
    pub fn remove_prefix(&mut self, prefix: &str) -> Result<Vec<(String, String)>> {
        if !is_folder(prefix) {
            return Err(AftError::Format(format!("{prefix} is not a folder prefix")));
        }
        let nested: Vec<String> = self
            .p_to_c
            .keys()
            .filter(|p| p.starts_with(prefix) && p.as_str() != prefix)
            .cloned()
            .collect();
        let mut removed = Vec::with_capacity(nested.len() + 1);
        for plain in nested {
            let cipher = self.remove(&plain)?;
            removed.push((plain, cipher));
        }
        let cipher = self.remove(prefix)?;
        removed.push((prefix.to_string(), cipher));
        Ok(removed)
    }

    /// Rewrite every plain name under `old_prefix` (a folder) to begin with
    /// `new_prefix` instead, preserving cipher names.
    pub fn rename_prefix(&mut self, old_prefix: &str, new_prefix: &str) -> Result<()> {
        if !is_folder(old_prefix) || !is_folder(new_prefix) {
            return Err(AftError::Format("folder rename requires trailing '/'".into()));
        }
        if !self.p_to_c.contains_key(old_prefix) {
            return Err(AftError::NotFound(old_prefix.to_string()));
        }
        if self.p_to_c.contains_key(new_prefix) {
            return Err(AftError::AlreadyExists(new_prefix.to_string()));
        }

        let entries: Vec<(String, String)> = self
            .p_to_c
            .iter()
            .filter(|(p, _)| p.starts_with(old_prefix))
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        for (plain, _) in &entries {
            self.remove(plain)?;
        }
        for (plain, cipher) in entries {
            let renamed = format!("{new_prefix}{}", &plain[old_prefix.len()..]);
            self.insert(&renamed, &cipher)?;
        }
        Ok(())
    }

    /// Rename a single file entry, moving it between parents if needed.
    pub fn rename_file(&mut self, old: &str, new: &str) -> Result<()> {
        if is_folder(old) || is_folder(new) {
            return Err(AftError::Format("file rename must not end in '/'".into()));
        }
        let cipher = self.remove(old)?;
        self.insert(new, &cipher)
    }

    /// Recompute `tree_view` from scratch from the surviving `p_to_c`
    /// entries (used by `trim` after orphans are dropped).
    pub fn rebuild_tree(&mut self) {
        let mut tree: HashMap<String, Vec<String>> = HashMap::new();
        tree.insert(String::new(), Vec::new());
        let mut plains: Vec<&String> = self.p_to_c.keys().collect();
        plains.sort();
        for plain in plains {
            if is_folder(plain) {
                tree.entry(plain.clone()).or_default();
            }
            let parent = parent_of(plain);
            let leaf = leaf_of(plain);
            let siblings = tree.entry(parent).or_default();
            if let Err(idx) = siblings.binary_search(&leaf) {
                siblings.insert(idx, leaf);
            }
        }
        self.tree_view = tree;
    }

    /// Serialize to the `p1\nc1\np2\nc2\n...` plaintext payload.
    pub fn to_payload(&self) -> String {
        let mut out = String::new();
        for (p, c) in &self.p_to_c {
            out.push_str(p);
            out.push('\n');
            out.push_str(c);
            out.push('\n');
        }
        out
    }

    /// Parse the name-table payload, rebuilding `tree_view` from scratch.
    pub fn from_payload(s: &str) -> Result<Self> {
        let mut table = NameTable::new();
        let mut parts = s.split('\n');
        loop {
            let plain = match parts.next() {
                Some("") | None => break,
                Some(p) => p,
            };
            let cipher = parts
                .next()
                .ok_or_else(|| AftError::Format("name table: odd number of lines".into()))?;
            table.insert(plain, cipher)?;
        }
        table.rebuild_tree();
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_builds_root_and_folder_views() {
        let mut t = NameTable::new();
        t.insert("a.txt", "cccc1.bin").unwrap();
        t.insert("docs/", "cccc2").unwrap();
        t.insert("docs/b.txt", "cccc2/cccc3.bin").unwrap();

        assert_eq!(t.children(""), &["a.txt".to_string(), "docs/".to_string()]);
        assert_eq!(t.children("docs/"), &["b.txt".to_string()]);
        assert_eq!(t.cipher_of("docs/b.txt"), Some("cccc2/cccc3.bin"));
        assert_eq!(t.plain_of("cccc2/cccc3.bin"), Some("docs/b.txt"));
    }

    #[test]
    fn rename_prefix_moves_nested_entries() {
        let mut t = NameTable::new();
        t.insert("docs/", "c1").unwrap();
        t.insert("docs/b.txt", "c1/c2").unwrap();
        t.rename_prefix("docs/", "archive/").unwrap();

        assert!(!t.contains_plain("docs/"));
        assert!(!t.contains_plain("docs/b.txt"));
        assert_eq!(t.cipher_of("archive/b.txt"), Some("c1/c2"));
        assert_eq!(t.children(""), &["archive/".to_string()]);
        assert_eq!(t.children("archive/"), &["b.txt".to_string()]);
    }

    #[test]
    fn remove_prefix_drops_whole_subtree() {
        let mut t = NameTable::new();
        t.insert("docs/", "c1").unwrap();
        t.insert("docs/b.txt", "c1/c2").unwrap();
        let removed = t.remove_prefix("docs/").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(t.is_empty());
        assert_eq!(t.children(""), &[] as &[String]);
    }

    #[test]
    fn payload_roundtrip() {
        let mut t = NameTable::new();
        t.insert("a.txt", "c1").unwrap();
        t.insert("docs/", "c2").unwrap();
        t.insert("docs/b.txt", "c2/c3").unwrap();

        let payload = t.to_payload();
        let parsed = NameTable::from_payload(&payload).unwrap();
        assert_eq!(parsed.len(), t.len());
        assert_eq!(parsed.children(""), t.children(""));
        assert_eq!(parsed.children("docs/"), t.children("docs/"));
    }

    #[test]
    fn rebuild_tree_matches_fresh_insert_order() {
        let mut t = NameTable::new();
        t.insert("z.txt", "c1").unwrap();
        t.insert("a.txt", "c2").unwrap();
        t.rebuild_tree();
        assert_eq!(t.children(""), &["a.txt".to_string(), "z.txt".to_string()]);
    }
}
