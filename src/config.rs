use crate::services::blob_store::DEFAULT_MAX_COLLISION_RETRIES;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt::Display, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    pub database_url: String,
    pub max_collision_retries: u32,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Content-addressed file store")]
pub struct Args {
    /// Host to bind to (overrides FILE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root of the sharded blob tree (overrides FILE_STORE_BASE_PATH)
    #[arg(long)]
    pub base_path: Option<String>,

    /// Database URL (overrides FILE_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Collision retries allowed per write (overrides FILE_STORE_MAX_COLLISION_RETRIES)
    #[arg(long)]
    pub max_collision_retries: Option<u32>,

    /// Largest accepted upload body (overrides FILE_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up with `lookup`, then defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_host = lookup("FILE_STORE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "FILE_STORE_PORT", 3000u16)?;
        let env_base = lookup("FILE_STORE_BASE_PATH").unwrap_or_else(|| "./data/blobs".into());
        let env_db = lookup("FILE_STORE_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/file_store.db".into());
        let env_retries = parse_var(
            &lookup,
            "FILE_STORE_MAX_COLLISION_RETRIES",
            DEFAULT_MAX_COLLISION_RETRIES,
        )?;
        let env_upload = parse_var(&lookup, "FILE_STORE_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            base_path: args.base_path.unwrap_or(env_base),
            database_url: args.database_url.unwrap_or(env_db),
            max_collision_retries: args.max_collision_retries.unwrap_or(env_retries),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_upload),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}
