use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use keysieve_core::{BloomFilter, FilterParams, HashScheme, KeyGate, KeyList};

#[derive(Parser)]
#[command(name = "keysieve", about = "keysieve CLI — Bloom filters and API key allowlists")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(ValueEnum, Clone, Copy)]
enum CliScheme {
    Windowed,
    DoubleHash,
}

impl From<CliScheme> for HashScheme {
    fn from(s: CliScheme) -> Self {
        match s {
            CliScheme::Windowed => HashScheme::Windowed,
            CliScheme::DoubleHash => HashScheme::DoubleHash,
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    Filter {
        #[command(subcommand)]
        cmd: FilterCmd,
    },

    Keys {
        #[command(subcommand)]
        cmd: KeysCmd,
    },
}

#[derive(Subcommand)]
enum FilterCmd {
    /// Create an empty filter, either from explicit size/k or from a capacity and target rate
    Create {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        size: Option<u64>,
        #[arg(long)]
        k: Option<u32>,
        #[arg(long)]
        capacity: Option<u64>,
        #[arg(long, default_value_t = 0.01)]
        fp_rate: f64,
        #[arg(long, value_enum, default_value_t = CliScheme::Windowed)]
        scheme: CliScheme,
    },

    Add {
        #[arg(long)]
        path: PathBuf,
        #[arg(required = true)]
        items: Vec<String>,
    },

    Contains {
        #[arg(long)]
        path: PathBuf,
        item: String,
    },

    Info {
        #[arg(long)]
        path: PathBuf,
    },

    /// Show the digest and bit positions an item maps to
    Positions {
        #[arg(long)]
        size: u64,
        #[arg(long)]
        k: u32,
        #[arg(long, value_enum, default_value_t = CliScheme::Windowed)]
        scheme: CliScheme,
        item: String,
    },
}

#[derive(Subcommand)]
enum KeysCmd {
    /// Add a key to the allowlist (created if missing), keeping it sorted
    Add {
        #[arg(long, default_value = "allowed_keys.json")]
        file: PathBuf,
        key: String,
    },

    /// Exit 0 and print "allowed" if the key is listed, exit 1 otherwise
    Check {
        #[arg(long, default_value = "allowed_keys.json")]
        file: PathBuf,
        key: String,
    },

    /// Write a Bloom pre-filter holding every key in the allowlist
    BuildFilter {
        #[arg(long, default_value = "allowed_keys.json")]
        file: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 0.001)]
        fp_rate: f64,
    },
}

fn load_filter(path: &Path) -> Result<BloomFilter> {
    BloomFilter::load(path).with_context(|| format!("load filter {}", path.display()))
}

fn create_filter(
    size: Option<u64>,
    k: Option<u32>,
    capacity: Option<u64>,
    fp_rate: f64,
    scheme: HashScheme,
) -> Result<BloomFilter> {
    let (size, k) = match (size, k, capacity) {
        (Some(size), Some(k), None) => (size, k),
        (None, None, Some(n)) => {
            let p = FilterParams::for_capacity(n, fp_rate)?;
            (p.size, p.k)
        }
        _ => return Err(anyhow!("pass either --size and --k, or --capacity")),
    };
    Ok(BloomFilter::with_scheme(size, k, scheme)?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Filter { cmd } => match cmd {
            FilterCmd::Create { path, size, k, capacity, fp_rate, scheme } => {
                let f = create_filter(size, k, capacity, fp_rate, scheme.into())?;
                f.save(&path)?;
                println!(
                    "created: {} size={} k={} scheme={}",
                    path.display(),
                    f.size(),
                    f.k(),
                    f.scheme().as_str()
                );
            }
            FilterCmd::Add { path, items } => {
                let mut f = load_filter(&path)?;
                for it in &items {
                    f.add(it);
                }
                f.save(&path)?;
                println!("added: {} item(s)", items.len());
            }
            FilterCmd::Contains { path, item } => {
                let f = load_filter(&path)?;
                if f.contains(&item) {
                    println!("maybe-present");
                } else {
                    println!("absent");
                }
            }
            FilterCmd::Info { path } => {
                let f = load_filter(&path)?;
                println!("size   : {}", f.size());
                println!("k      : {}", f.k());
                println!("scheme : {}", f.scheme().as_str());
                println!("bytes  : {}", f.as_bytes().len());
                println!("set    : {}", f.count_ones());
                println!("fill   ≈ {:.4}", f.fill_ratio());
            }
            FilterCmd::Positions { size, k, scheme, item } => {
                let f = BloomFilter::with_scheme(size, k, scheme.into())?;
                println!("sha256: {}", hex::encode(Sha256::digest(item.as_bytes())));
                let pos: Vec<String> = f.positions(&item).iter().map(u64::to_string).collect();
                println!("positions: {}", pos.join(","));
            }
        },

        Cmd::Keys { cmd } => match cmd {
            KeysCmd::Add { file, key } => {
                let mut list = KeyList::load(&file)
                    .with_context(|| format!("Failed to load allowed keys from {}", file.display()))?;
                list.add(&key)?;
                list.save(&file)
                    .with_context(|| format!("Failed to write allowed keys to {}", file.display()))?;
                println!("Key added successfully.");
            }
            KeysCmd::Check { file, key } => {
                let list = KeyList::load(&file)?;
                let gate = KeyGate::new(list, 0.001)?;
                if gate.check(&key) {
                    println!("allowed");
                } else {
                    println!("denied");
                    std::process::exit(1);
                }
            }
            KeysCmd::BuildFilter { file, out, fp_rate } => {
                let list = KeyList::load(&file)?;
                let f = list.to_filter(fp_rate)?;
                f.save(&out)?;
                println!(
                    "filter: {} keys={} size={} k={}",
                    out.display(),
                    list.len(),
                    f.size(),
                    f.k()
                );
            }
        },
    }
    Ok(())
}
