//! Encrypted vault and authenticated point-to-point transfer protocol.

pub mod bencode;
pub mod crypto;
pub mod decoy;
pub mod error;
pub mod opsec;
pub mod transfer;
pub mod vault;

pub use error::{AftError, Result};
pub use opsec::OpsecHeader;
pub use transfer::Session;
pub use vault::Vault;
