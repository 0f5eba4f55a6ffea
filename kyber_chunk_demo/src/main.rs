use anyhow::{Context, Result, bail};
use blake3::Hasher;
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use hex::encode as hex_encode;
use kyber_chunk_core::{
    ChunkSession, CiphertextStore, CodecConfig, Framing, KeyPair, PublicKey, SecurityLevel,
    security_preset,
};
use log::{LevelFilter, debug, info};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_DEMO_MESSAGE: &str = "Kyber test message!";

#[derive(Parser)]
#[command(
    name = "kyber-chunk",
    author,
    version,
    about = "Chunked lattice public-key encryption (experimental)"
)]
struct Cli {
    #[arg(long, global = true)]
    debug: bool,
    #[arg(long, global = true, value_enum, default_value = "kyber512")]
    security_level: SecurityLevelArg,
    /// JSON codec configuration; explicit flags take precedence.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "BYTES")]
    chunk_size: Option<usize>,
    /// Chunk framing. Ciphertext files carry no framing marker, so decrypt
    /// must use the framing and chunk size the file was encrypted with.
    #[arg(long, global = true, value_enum)]
    framing: Option<FramingArg>,
    /// Worker threads; 0 uses every available CPU.
    #[arg(long, global = true, value_name = "N")]
    workers: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SecurityLevelArg {
    Kyber512,
    Kyber768,
    Kyber1024,
}

impl From<SecurityLevelArg> for SecurityLevel {
    fn from(arg: SecurityLevelArg) -> Self {
        match arg {
            SecurityLevelArg::Kyber512 => SecurityLevel::Kyber512,
            SecurityLevelArg::Kyber768 => SecurityLevel::Kyber768,
            SecurityLevelArg::Kyber1024 => SecurityLevel::Kyber1024,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FramingArg {
    StripZeros,
    LengthPrefixed,
}

impl From<FramingArg> for Framing {
    fn from(arg: FramingArg) -> Self {
        match arg {
            FramingArg::StripZeros => Framing::StripZeros,
            FramingArg::LengthPrefixed => Framing::LengthPrefixed,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key pair and write it to disk.
    Keygen {
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        /// Also write the public half on its own.
        #[arg(long, value_name = "FILE")]
        public_out: Option<PathBuf>,
    },
    /// Encrypt a message or file into concatenated ciphertexts.
    Encrypt {
        /// Public key file from `keygen --public-out`, or a full key pair.
        #[arg(long, value_name = "FILE")]
        keys: PathBuf,
        #[arg(long)]
        message: Option<String>,
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Decrypt a ciphertext file written by `encrypt`.
    ///
    /// Pass the same `--framing` and `--chunk-size` used to encrypt. A
    /// strip-zeros mismatch is not detected and yields wrong plaintext.
    Decrypt {
        #[arg(long, value_name = "FILE")]
        keys: PathBuf,
        #[arg(long, value_name = "FILE")]
        cipher: PathBuf,
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Generate keys, encrypt, write both files, decrypt and verify.
    Demo {
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long, value_name = "DIR", default_value = ".")]
        workdir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let level: SecurityLevel = cli.security_level.into();
    let config = resolve_config(&cli)?;
    let session = ChunkSession::new(level, config)
        .with_context(|| format!("configuring codec for {level}"))?;
    debug!(
        "level={} chunk_size={} framing={:?} workers={}",
        level,
        session.codec().chunk_size(),
        config.framing,
        config.workers
    );
    match cli.command {
        Commands::Keygen { out, public_out } => cmd_keygen(&session, out, public_out),
        Commands::Encrypt {
            keys,
            message,
            input,
            out,
        } => cmd_encrypt(&session, keys, message, input, out),
        Commands::Decrypt { keys, cipher, out } => cmd_decrypt(&session, keys, cipher, out),
        Commands::Demo {
            input,
            message,
            workdir,
        } => cmd_demo(&session, input, message, workdir),
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default));
    builder.format_timestamp(None);
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

fn resolve_config(cli: &Cli) -> Result<CodecConfig> {
    let mut config = match &cli.config {
        Some(path) => load_json::<CodecConfig>(path, "codec config")?,
        None => CodecConfig::default(),
    };
    if let Some(framing) = cli.framing {
        config = config.with_framing(framing.into());
    }
    if let Some(chunk_size) = cli.chunk_size {
        config = config.with_chunk_size(chunk_size);
    }
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    Ok(config)
}

fn cmd_keygen(session: &ChunkSession, out: PathBuf, public_out: Option<PathBuf>) -> Result<()> {
    let pair = session.generate_keypair();
    save_json(&out, "key pair", &pair)?;
    println!("Wrote {} key pair to {}", pair.level(), out.display());
    if let Some(path) = public_out {
        save_json(&path, "public key", &pair.public)?;
        println!("Wrote public key to {}", path.display());
    }
    print_fingerprint(&pair.public);
    let preset = security_preset(pair.level());
    debug!(
        "public_key_bytes={} secret_key_bytes={} ciphertext_bytes={}",
        preset.public_key_bytes(),
        preset.secret_key_bytes(),
        preset.ciphertext_bytes()
    );
    Ok(())
}

fn cmd_encrypt(
    session: &ChunkSession,
    keys: PathBuf,
    message: Option<String>,
    input: Option<PathBuf>,
    out: PathBuf,
) -> Result<()> {
    let public = load_public_key(&keys, session.level())?;
    let plaintext = resolve_plaintext(message, input)?;
    let chunks = session
        .encrypt_to(&public, &plaintext, &session.file_store(&out))
        .with_context(|| format!("encrypting into {}", out.display()))?;
    println!(
        "Encrypted {} bytes into {} chunks ({} bytes) at {}",
        plaintext.len(),
        chunks,
        chunks * session.ciphertext_bytes(),
        out.display()
    );
    println!("Plaintext digest: {}", digest(&plaintext));
    Ok(())
}

fn cmd_decrypt(
    session: &ChunkSession,
    keys: PathBuf,
    cipher: PathBuf,
    out: Option<PathBuf>,
) -> Result<()> {
    let pair = load_keys(&keys, session.level())?;
    let plaintext = session
        .decrypt_from(&pair.secret, &session.file_store(&cipher))
        .with_context(|| format!("decrypting {}", cipher.display()))?;
    match out {
        Some(path) => {
            fs::write(&path, &plaintext)
                .with_context(|| format!("writing plaintext to {}", path.display()))?;
            println!("Wrote {} bytes to {}", plaintext.len(), path.display());
        }
        None => println!("{}", String::from_utf8_lossy(&plaintext)),
    }
    println!("Plaintext digest: {}", digest(&plaintext));
    Ok(())
}

fn cmd_demo(
    session: &ChunkSession,
    input: Option<PathBuf>,
    message: Option<String>,
    workdir: PathBuf,
) -> Result<()> {
    let plaintext = match (message, input) {
        (None, None) => DEFAULT_DEMO_MESSAGE.as_bytes().to_vec(),
        (message, input) => resolve_plaintext(message, input)?,
    };
    fs::create_dir_all(&workdir)
        .with_context(|| format!("creating work directory {}", workdir.display()))?;
    let encrypted_path = workdir.join("encrypted_message.bin");
    let decrypted_path = workdir.join("decrypted_message.txt");

    let pair = session.generate_keypair();
    print_fingerprint(&pair.public);
    let stream = session.encrypt_bytes(&pair.public, &plaintext)?;
    session
        .file_store(&encrypted_path)
        .store(&stream)
        .with_context(|| format!("writing {}", encrypted_path.display()))?;
    info!(
        "{} bytes -> {} chunks -> {}",
        plaintext.len(),
        stream.len(),
        encrypted_path.display()
    );

    let reloaded = session
        .file_store(&encrypted_path)
        .load()
        .with_context(|| format!("reading {}", encrypted_path.display()))?;
    let recovered = session.decrypt_bytes(&pair.secret, &reloaded)?;
    fs::write(&decrypted_path, &recovered)
        .with_context(|| format!("writing {}", decrypted_path.display()))?;

    if recovered == plaintext {
        println!("Test Passed: the decrypted message matches the original.");
        return Ok(());
    }
    if session.codec().config().framing == Framing::StripZeros
        && recovered.len() < plaintext.len()
        && plaintext.contains(&0)
    {
        bail!(
            "zero stripping dropped {} of {} bytes; rerun with --framing length-prefixed",
            plaintext.len() - recovered.len(),
            plaintext.len()
        );
    }
    bail!("decrypted message does not match the original");
}

fn resolve_plaintext(message: Option<String>, input: Option<PathBuf>) -> Result<Vec<u8>> {
    match (message, input) {
        (Some(text), None) => Ok(text.into_bytes()),
        (None, Some(path)) => {
            fs::read(&path).with_context(|| format!("reading plaintext from {}", path.display()))
        }
        (Some(_), Some(_)) => bail!("Provide either --message or --input, not both."),
        (None, None) => bail!("Provide --message TEXT or --input FILE for data to encrypt."),
    }
}

fn load_keys(path: &Path, level: SecurityLevel) -> Result<KeyPair> {
    let pair: KeyPair = load_json(path, "key pair")?;
    if pair.level() != level {
        bail!(
            "{} holds a {} key pair but --security-level is {}",
            path.display(),
            pair.level(),
            level
        );
    }
    Ok(pair)
}

/// Reads either a bare public key or a full key pair and returns the public half.
fn load_public_key(path: &Path, level: SecurityLevel) -> Result<PublicKey> {
    let value: Value = load_json(path, "key file")?;
    let public = if value.get("secret").is_some() {
        let pair: KeyPair = serde_json::from_value(value)
            .with_context(|| format!("parsing key pair from {}", path.display()))?;
        pair.public
    } else {
        serde_json::from_value::<PublicKey>(value)
            .with_context(|| format!("parsing public key from {}", path.display()))?
    };
    if public.level() != level {
        bail!(
            "{} holds a {} public key but --security-level is {}",
            path.display(),
            public.level(),
            level
        );
    }
    Ok(public)
}

fn load_json<T: DeserializeOwned>(path: &Path, label: &str) -> Result<T> {
    let data =
        fs::read(path).with_context(|| format!("reading {} from {}", label, path.display()))?;
    let value = serde_json::from_slice(&data)
        .with_context(|| format!("parsing {} from {}", label, path.display()))?;
    Ok(value)
}

fn save_json<T: ?Sized + serde::Serialize>(path: &Path, label: &str, value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value)?;
    fs::write(path, serialized)
        .with_context(|| format!("writing {} to {}", label, path.display()))?;
    Ok(())
}

fn print_fingerprint(public: &PublicKey) {
    println!("Public key fingerprint: {}", hex_encode(public.fingerprint()));
}

fn digest(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize().to_hex().to_string()
}
