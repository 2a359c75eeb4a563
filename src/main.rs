use clap::{Parser, Subcommand};
use opak::archive::Archive;
use opak::cipher::{CipherContext, StrategyId};
use opak::decode::decode_external;
use opak::writer::{pack, pack_dir};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "opak", about = "The .opak asset container CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a directory tree into an unencrypted container
    Create {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Re-emit a container with every file body encrypted
    Pack {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Strategy: xor (default) or aes-128-ecb
        #[arg(short, long, default_value = "xor")]
        strategy: String,
        /// Key byte for the stream-xor strategy
        #[arg(long, default_value = "193")]
        xor_key: u8,
        /// Passphrase for the aes-128-ecb strategy
        #[arg(long, default_value = "testtesttesttest")]
        passphrase: String,
    },
    /// List container contents
    List {
        input: PathBuf,
    },
    /// Extract every file into a directory
    Extract {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(long, default_value = "193")]
        xor_key: u8,
        #[arg(long, default_value = "testtesttesttest")]
        passphrase: String,
    },
    /// Print one file's plaintext to stdout
    Cat {
        input: PathBuf,
        path: String,
        #[arg(long, default_value = "193")]
        xor_key: u8,
        #[arg(long, default_value = "testtesttesttest")]
        passphrase: String,
    },
    /// Show metadata for one inner path
    Stat {
        input: PathBuf,
        path: String,
    },
    /// Decrypt a base64-encoded out-of-band blob
    Decode {
        input: PathBuf,
        /// Plaintext length to produce
        #[arg(short, long)]
        len: u64,
        #[arg(long, default_value = "testtesttesttest")]
        passphrase: String,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    match Cli::parse().command {
        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create { input, output } => {
            pack_dir(&input, &output)?;
            println!("Created: {}", output.display());
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { input, output, strategy, xor_key, passphrase } => {
            let strategy: StrategyId = strategy.parse()?;
            let ctx = CipherContext { xor_key, passphrase };
            pack(&input, &output, strategy, &ctx)?;
            println!("Packed ({strategy}): {}", output.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input } => {
            let ar = Archive::open(&input)?;
            println!("Container: {}", input.display());
            println!(
                "Cipher: {}",
                ar.header().cipher.map_or_else(|| "none".into(), |c| c.to_string())
            );
            println!("{:<40} {:>12} {:>12} {:>10}  Flags", "Path", "Size", "Plain", "Offset");
            for (path, entry) in ar.header().walk() {
                let mut flags = String::new();
                if entry.encrypted { flags.push('E'); }
                if entry.unpacked  { flags.push('U'); }
                println!(
                    "{:<40} {:>12} {:>12} {:>10}  {}",
                    path, entry.size, entry.len, entry.offset, flags
                );
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output_dir, xor_key, passphrase } => {
            let ctx = CipherContext { xor_key, passphrase };
            let ar = Archive::open_with_context(&input, ctx)?;
            for (path, _) in ar.header().walk() {
                let dest = output_dir.join(&path);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                ar.copy_file_out(&path, &dest)?;
                println!("  extracted  {path}");
            }
            println!("Extracted to: {}", output_dir.display());
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { input, path, xor_key, passphrase } => {
            let ctx = CipherContext { xor_key, passphrase };
            let ar = Archive::open_with_context(&input, ctx)?;
            let data = ar.read_file(&path)?;
            use std::io::Write;
            std::io::stdout().write_all(&data)?;
        }

        // ── Stat ─────────────────────────────────────────────────────────────
        Commands::Stat { input, path } => {
            let ar = Archive::open(&input)?;
            let stat = ar.stat(&path)?;
            let kind = if stat.is_directory {
                "directory"
            } else if stat.is_link {
                "link"
            } else {
                "file"
            };
            println!("{path}: {kind}, size {}, offset {}", stat.size, stat.offset);
            println!("realpath: {}", ar.realpath(&path)?);
        }

        // ── Decode ───────────────────────────────────────────────────────────
        Commands::Decode { input, len, passphrase, output } => {
            let blob = std::fs::read(&input)?;
            let plaintext = decode_external(&blob, len, &passphrase)?;
            std::fs::write(&output, &plaintext)?;
            println!("Decoded {len} bytes -> {}", output.display());
        }
    }

    Ok(())
}
