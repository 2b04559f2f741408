use clap::{Parser, Subcommand, ValueEnum};
use snip_core::{BatchItem, OwnerId, ShortCode};
use snip_shortener::service::DEFAULT_BASE_URL;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const FILE_STORAGE_PATH_ENV: &str = "SNIP_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "SNIP_DATABASE_DSN";
pub const BASE_URL_ENV: &str = "SNIP_BASE_URL";
pub const TIMEOUT_MS_ENV: &str = "SNIP_TIMEOUT_MS";
pub const LOG_FORMAT_ENV: &str = "SNIP_LOG_FORMAT";

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "snip", about = "Shorten, expand and manage URLs")]
pub struct CLI {
    /// Append-only log file; omitted or empty keeps records in memory.
    #[arg(long, global = true, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    /// MySQL DSN; when set it takes precedence over the file log.
    #[arg(long, global = true, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    #[arg(long, global = true, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Deadline for each storage operation, in milliseconds.
    #[arg(long, global = true, env = TIMEOUT_MS_ENV, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    #[arg(
        long,
        global = true,
        env = LOG_FORMAT_ENV,
        value_enum,
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten a single URL.
    Shorten {
        url: String,
        #[arg(long, default_value_t = OwnerId::nil())]
        owner: OwnerId,
    },
    /// Shorten several URLs at once, given as `correlation=url` pairs.
    Batch {
        #[arg(long, default_value_t = OwnerId::nil())]
        owner: OwnerId,
        #[arg(required = true, value_parser = parse_batch_item)]
        items: Vec<BatchItem>,
    },
    /// Print the original URL behind a code.
    Expand {
        #[arg(value_parser = parse_code)]
        code: ShortCode,
    },
    /// List the live URLs created by an owner.
    List {
        #[arg(long)]
        owner: OwnerId,
    },
    /// Delete codes owned by an owner.
    Delete {
        #[arg(long)]
        owner: OwnerId,
        #[arg(required = true, value_parser = parse_code)]
        codes: Vec<ShortCode>,
    },
    /// Count live URLs and distinct owners.
    Stats,
    /// Check that the storage backend is reachable.
    Ping,
}

fn parse_code(value: &str) -> Result<ShortCode, String> {
    ShortCode::new(value).map_err(|e| e.to_string())
}

fn parse_batch_item(value: &str) -> Result<BatchItem, String> {
    let (correlation_id, original_url) = value
        .split_once('=')
        .ok_or_else(|| format!("expected correlation=url, got '{value}'"))?;

    if correlation_id.is_empty() {
        return Err(format!("missing correlation id in '{value}'"));
    }

    Ok(BatchItem {
        correlation_id: correlation_id.to_string(),
        original_url: original_url.to_string(),
    })
}
