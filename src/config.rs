//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::auth::Credentials;
use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

/// Read buffer capacity for download bodies and upload ingress.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 10 * 1024 * 1024 * 1024;
pub const DEFAULT_UPLOAD_TEMP_TTL_SECS: u64 = 60 * 60;
pub const TEMP_CLEAN_INTERVAL_SECS: u64 = 900;
pub const LOCK_WAIT_TIMEOUT_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "filedrop", version = VERSION_INFO, about = "Zero-config file drop server")]
pub struct Args {
    #[arg(
        value_name = "PATH",
        default_value = ".",
        help = "Directory to serve"
    )]
    pub serve_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "FILEDROP_BIND",
        default_value = "0.0.0.0",
        help = "Host interface to bind to"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "FILEDROP_PORT",
        default_value_t = 8000,
        help = "Port to bind to"
    )]
    pub port: u16,
    #[arg(
        short = 'a',
        long,
        env = "FILEDROP_AUTH",
        value_parser = crate::auth::parse_auth,
        help = "Enable authentication (format: username:password)"
    )]
    pub auth: Option<Credentials>,
    #[arg(
        long,
        env = "FILEDROP_TLS",
        help = "Enable HTTPS with a self-signed certificate"
    )]
    pub tls: bool,
    #[arg(
        short = 'c',
        long,
        env = "FILEDROP_TLS_CERT",
        requires = "tls_key",
        help = "TLS cert path (instead of a generated one)"
    )]
    pub tls_cert: Option<String>,
    #[arg(
        short = 'k',
        long,
        env = "FILEDROP_TLS_KEY",
        requires = "tls_cert",
        help = "TLS key path"
    )]
    pub tls_key: Option<String>,
    #[arg(long, env = "FILEDROP_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "FILEDROP_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max size per uploaded file in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "FILEDROP_UPLOAD_TEMP_TTL_SECS",
        default_value_t = DEFAULT_UPLOAD_TEMP_TTL_SECS,
        help = "Age after which abandoned upload temp files are removed (0 to disable)"
    )]
    pub upload_temp_ttl_secs: u64,
}
