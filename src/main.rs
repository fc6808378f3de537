//! licensegate command line
//!
//! Issuer-side key management and signing, plus diagnostics for a
//! deployment:
//!   licensegate keygen --out-dir ./keys
//!   licensegate generate --customer-id acme --customer-name "Acme" --tier pro --days 365
//!   licensegate verify --public-key <base64> --key-file license.key
//!   licensegate status

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use licensegate::{
    Config, GenerateRequest, KeyPair, LicenseClient, LicenseGenerator, Limits, Manager, Tier,
    codec, crypto, hardware, models::HardwareInfo,
};

const PRIVATE_KEY_ENV: &str = "LICENSE_PRIVATE_KEY";

#[derive(Parser, Debug)]
#[command(name = "licensegate")]
#[command(about = "Issue, verify and inspect signed licenses")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new Ed25519 signing key pair
    Keygen {
        /// Write license.pub / license.key into this directory instead of printing
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Sign a new license
    Generate {
        #[arg(long)]
        customer_id: String,

        #[arg(long, default_value = "")]
        customer_name: String,

        /// community, pro, trial or enterprise
        #[arg(long, default_value = "community")]
        tier: Tier,

        /// Validity in days from now
        #[arg(long, default_value = "365")]
        days: i64,

        /// Extra feature on top of the tier defaults (repeatable)
        #[arg(long = "feature")]
        features: Vec<String>,

        /// Bind the license to this hardware ID
        #[arg(long)]
        hardware_id: Option<String>,

        #[arg(long)]
        max_sources: Option<u64>,
        #[arg(long)]
        max_tables: Option<u64>,
        #[arg(long)]
        max_throughput: Option<u64>,
        #[arg(long)]
        max_retention_days: Option<u64>,

        /// key=value metadata entry (repeatable)
        #[arg(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,

        /// Issuer name embedded in the license
        #[arg(long)]
        issuer: Option<String>,

        /// File holding the base64 private key (defaults to $LICENSE_PRIVATE_KEY)
        #[arg(long)]
        private_key_file: Option<PathBuf>,

        /// Write the key here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify a license key and print its contents
    Verify {
        /// Base64 public key (defaults to $LICENSE_PUBLIC_KEY)
        #[arg(long)]
        public_key: Option<String>,

        /// License key; read from --key-file or $LICENSE_KEY when omitted
        key: Option<String>,

        #[arg(long)]
        key_file: Option<PathBuf>,
    },

    /// Print this machine's hardware info and fingerprint
    Fingerprint,

    /// Load the configured license and print its status
    Status {
        /// Also validate against the license server
        #[arg(long)]
        online: bool,
    },

    /// Log in to the customer portal and fetch a license key
    Login {
        #[arg(long)]
        email: String,

        /// Portal password (defaults to $LICENSE_PORTAL_PASSWORD)
        #[arg(long, env = "LICENSE_PORTAL_PASSWORD", hide_env_values = true)]
        password: String,

        /// Portal base URL (defaults to $LICENSE_SERVER_URL)
        #[arg(long)]
        server_url: Option<String>,

        /// Write the fetched key here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Keygen { out_dir } => keygen(out_dir),
        Command::Generate {
            customer_id,
            customer_name,
            tier,
            days,
            features,
            hardware_id,
            max_sources,
            max_tables,
            max_throughput,
            max_retention_days,
            metadata,
            issuer,
            private_key_file,
            output,
        } => {
            let custom_limits = [max_sources, max_tables, max_throughput, max_retention_days]
                .iter()
                .any(Option::is_some);
            let limits = custom_limits.then(|| {
                let preset = tier.limits();
                Limits {
                    max_sources: max_sources.unwrap_or(preset.max_sources),
                    max_tables: max_tables.unwrap_or(preset.max_tables),
                    max_throughput: max_throughput.unwrap_or(preset.max_throughput),
                    max_retention_days: max_retention_days.unwrap_or(preset.max_retention_days),
                }
            });

            let request = GenerateRequest {
                features,
                limits,
                hardware_id,
                metadata: metadata.into_iter().collect::<BTreeMap<_, _>>(),
                ..GenerateRequest::new(customer_id, customer_name, tier, days)
            };
            generate(request, issuer, private_key_file, output)
        }
        Command::Verify {
            public_key,
            key,
            key_file,
        } => verify(public_key, key, key_file),
        Command::Fingerprint => fingerprint(),
        Command::Status { online } => status(online).await,
        Command::Login {
            email,
            password,
            server_url,
            output,
        } => login(&email, &password, server_url, output).await,
    }
}

fn keygen(out_dir: Option<PathBuf>) -> Result<()> {
    let keypair = KeyPair::generate();
    let public_key = keypair.public_key_base64();
    let private_key = keypair.private_key_base64();

    match out_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let pub_path = dir.join("license.pub");
            let key_path = dir.join("license.key");
            std::fs::write(&pub_path, &public_key)
                .with_context(|| format!("Failed to write {}", pub_path.display()))?;
            std::fs::write(&key_path, &private_key)
                .with_context(|| format!("Failed to write {}", key_path.display()))?;
            tracing::info!(
                public_key = %pub_path.display(),
                private_key = %key_path.display(),
                "Key pair written"
            );
        }
        None => {
            println!("public_key:  {}", public_key);
            println!("private_key: {}", private_key);
        }
    }
    Ok(())
}

fn generate(
    request: GenerateRequest,
    issuer: Option<String>,
    private_key_file: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let private_key = match private_key_file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read private key from {}", path.display()))?,
        None => std::env::var(PRIVATE_KEY_ENV)
            .with_context(|| format!("No --private-key-file given and {} is not set", PRIVATE_KEY_ENV))?,
    };

    let mut generator =
        LicenseGenerator::from_base64(private_key.trim()).context("Invalid private key")?;
    if let Some(issuer) = issuer {
        generator = generator.with_issuer(issuer);
    }

    let (license, key) = generator
        .generate_license(&request)
        .context("Failed to generate license")?;

    match output {
        Some(path) => {
            std::fs::write(&path, &key)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(license_id = %license.id, path = %path.display(), "License written");
        }
        None => println!("{}", key),
    }
    Ok(())
}

fn verify(public_key: Option<String>, key: Option<String>, key_file: Option<PathBuf>) -> Result<()> {
    let config = Config::from_env();

    let public_key = public_key
        .or(config.public_key)
        .context("No --public-key given and LICENSE_PUBLIC_KEY is not set")?;
    let public_key = crypto::load_public_key(public_key.trim()).context("Invalid public key")?;

    let key = match (key, key_file) {
        (Some(key), _) => key,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => std::env::var(&config.license_env)
            .with_context(|| format!("No key given and {} is not set", config.license_env))?,
    };

    let license = codec::verify_license(&key, &public_key).context("License verification failed")?;
    println!("{}", serde_json::to_string_pretty(&license)?);
    Ok(())
}

fn fingerprint() -> Result<()> {
    let info = HardwareInfo::collect();
    let resolved = hardware::resolve_hardware_id();

    println!("{}", serde_json::to_string_pretty(&info)?);
    println!("hardware_id: {}", resolved.id);
    println!("source:      {}", resolved.source.as_ref());
    Ok(())
}

async fn status(online: bool) -> Result<()> {
    let config = Config::from_env();
    let manager = Manager::from_config(config).context("Failed to create license manager")?;

    if let Err(e) = manager.load_from_config() {
        tracing::warn!(error = %e, code = e.code(), "No usable license, running at community tier");
    }

    if online
        && manager.get_license().is_some()
        && let Err(e) = manager.validate_online().await
    {
        tracing::error!(error = %e, code = e.code(), "Online validation failed");
    }

    println!("{}", serde_json::to_string_pretty(&manager.get_status())?);
    Ok(())
}

async fn login(
    email: &str,
    password: &str,
    server_url: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let server_url = match server_url.or(Config::from_env().server_url) {
        Some(url) => url,
        None => bail!("No --server-url given and LICENSE_SERVER_URL is not set"),
    };

    let client = LicenseClient::new(server_url)?;
    let response = client.login(email, password).await.context("Login failed")?;
    tracing::info!(customer_id = %response.customer_id, "Logged in");

    let Some(key) = response.license_key else {
        bail!("No license is associated with this account");
    };

    match output {
        Some(path) => {
            std::fs::write(&path, &key)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "License key saved");
        }
        None => println!("{}", key),
    }
    Ok(())
}
