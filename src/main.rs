use anyhow::Context;
use aftvault::vault::nametable::is_folder;
use aftvault::Vault;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "aftvault", version, about = "Encrypted vault and point-to-point transfer")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Build a new vault from a directory.
    Import {
        #[arg(long)]
        target_dir: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long)]
        password: String,
        #[arg(long)]
        keyfile: Option<PathBuf>,
        #[arg(long, default_value = "")]
        msg: String,
        /// Use RSA-OAEP instead of X25519 for the vault keypair.
        #[arg(long)]
        legacy: bool,
        /// Decoy format: png, webp, or bin (no decoy).
        #[arg(long, default_value = "webp")]
        ext: String,
    },

    /// Extract every file from a vault.
    Export {
        #[arg(long)]
        vault_dir: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long)]
        password: String,
        #[arg(long)]
        keyfile: Option<PathBuf>,
    },

    /// Report vault metadata without exporting.
    View {
        #[arg(long)]
        vault_dir: PathBuf,
        #[arg(long)]
        password: String,
        #[arg(long)]
        keyfile: Option<PathBuf>,
    },

    /// Reconcile the name table with disk, optionally rotating keys.
    Trim {
        #[arg(long)]
        vault_dir: PathBuf,
        #[arg(long)]
        password: String,
        #[arg(long)]
        keyfile: Option<PathBuf>,
        #[arg(long)]
        rotate: bool,
    },
}

fn read_keyfile(path: Option<&PathBuf>) -> anyhow::Result<Vec<u8>> {
    match path {
        None => Ok(Vec::new()),
        Some(p) => {
            let mut data = std::fs::read(p).with_context(|| format!("reading keyfile {}", p.display()))?;
            data.truncate(1024);
            Ok(data)
        }
    }
}

fn run_import(target_dir: PathBuf, out_dir: PathBuf, password: String, keyfile: Option<PathBuf>, msg: String, legacy: bool, ext: String) -> anyhow::Result<()> {
    let kf = read_keyfile(keyfile.as_ref())?;
    std::fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let algo = if legacy { "rsa1" } else { "ecc1" };
    let mut vault = Vault::new(&out_dir, algo, &ext)?;
    vault.store_account(password.as_bytes(), &kf, &msg)?;
    vault.store_name()?;
    tracing::info!(dir = %out_dir.display(), algo, ext, "vault created");

    for entry in std::fs::read_dir(&target_dir).with_context(|| format!("reading {}", target_dir.display()))? {
        let entry = entry?;
        vault.add(&entry.path(), "").with_context(|| format!("importing {}", entry.path().display()))?;
    }
    tracing::info!(count = vault.names.len(), "import complete");
    println!("imported {} entries into {}", vault.names.len(), out_dir.display());
    Ok(())
}

fn run_export(vault_dir: PathBuf, out_dir: PathBuf, password: String, keyfile: Option<PathBuf>) -> anyhow::Result<()> {
    let kf = read_keyfile(keyfile.as_ref())?;
    let (vault, _msg) = Vault::load(&vault_dir, password.as_bytes(), &kf)
        .with_context(|| format!("loading vault {}", vault_dir.display()))?;
    std::fs::create_dir_all(&out_dir)?;

    let plains: Vec<String> = vault.names.iter().filter(|(p, _)| !is_folder(p)).map(|(p, _)| p.to_string()).collect();
    for plain in &plains {
        let data = vault.read(plain)?;
        let out_path = out_dir.join(plain);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&out_path, data).with_context(|| format!("writing {}", out_path.display()))?;
    }
    tracing::info!(count = plains.len(), "export complete");
    println!("exported {} files to {}", plains.len(), out_dir.display());
    Ok(())
}

fn run_view(vault_dir: PathBuf, password: String, keyfile: Option<PathBuf>) -> anyhow::Result<()> {
    let kf = read_keyfile(keyfile.as_ref())?;
    let (vault, msg) = Vault::load(&vault_dir, password.as_bytes(), &kf)
        .with_context(|| format!("loading vault {}", vault_dir.display()))?;

    println!("algo:      {}", vault.algo);
    println!("ext:       {}", vault.ext);
    println!("items:     {}", vault.names.len());
    println!("hint:      {msg}");
    println!("public crc: {:08x}", aftvault::crypto::crc32(&vault.public));
    println!("private crc: {:08x}", aftvault::crypto::crc32(&vault.private));
    println!("tree:");
    print_tree(&vault, "", 0);
    Ok(())
}

fn print_tree(vault: &Vault, parent: &str, depth: usize) {
    for child in vault.names.children(parent) {
        println!("{}{}", "  ".repeat(depth + 1), child);
        if is_folder(child) {
            let nested = format!("{parent}{child}");
            print_tree(vault, &nested, depth + 1);
        }
    }
}

fn run_trim(vault_dir: PathBuf, password: String, keyfile: Option<PathBuf>, rotate: bool) -> anyhow::Result<()> {
    let kf = read_keyfile(keyfile.as_ref())?;
    let (mut vault, msg) = Vault::load(&vault_dir, password.as_bytes(), &kf)
        .with_context(|| format!("loading vault {}", vault_dir.display()))?;

    let dropped = vault.trim()?;
    tracing::info!(dropped, "trim reconciled name table");
    println!("trim removed {dropped} orphaned entries");

    if rotate {
        tracing::warn!("rotating vault keypair: a crash partway leaves a mixed-key vault");
        vault.rotate_keys(password.as_bytes(), &kf, &msg)?;
        println!("rotated vault keypair");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Import { target_dir, out_dir, password, keyfile, msg, legacy, ext } => {
            run_import(target_dir, out_dir, password, keyfile, msg, legacy, ext)
        }
        Cmd::Export { vault_dir, out_dir, password, keyfile } => run_export(vault_dir, out_dir, password, keyfile),
        Cmd::View { vault_dir, password, keyfile } => run_view(vault_dir, password, keyfile),
        Cmd::Trim { vault_dir, password, keyfile, rotate } => run_trim(vault_dir, password, keyfile, rotate),
    }
}
