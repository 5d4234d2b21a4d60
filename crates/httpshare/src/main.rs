use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use httpshare_server::ReusePolicy;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "httpshare",
    about = "httpshare — share files or stdin over a short-lived HTTP(S) endpoint",
    version
)]
struct Cli {
    /// Files to share. Use `-` to share standard input.
    files: Vec<PathBuf>,

    /// Mark content as inline (shown in the browser instead of downloaded)
    #[arg(short, long)]
    inline: bool,

    /// Serve each file at most N times (negative: unlimited)
    #[arg(short = 'l', long = "limit", default_value_t = -1, allow_negative_numbers = true)]
    limit: i64,

    /// Trust only the first N clients, across all files (negative: disabled)
    #[arg(short = 't', long = "trust", default_value_t = -1, allow_negative_numbers = true)]
    trust: i64,

    /// Port to listen on
    #[arg(short, long, env = "HTTPSHARE_PORT", default_value_t = 8080)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "HTTPSHARE_HOST", default_value = "0.0.0.0")]
    bind: String,

    /// Serve over TLS with a self-signed certificate
    #[arg(short, long)]
    encrypt: bool,

    /// Issue the certificate into a temp dir that is removed on exit
    #[arg(long, requires = "encrypt")]
    ephemeral_cert: bool,

    /// When a cached certificate may be reused
    #[arg(long, value_enum, default_value_t = CertReuse::Always)]
    cert_reuse: CertReuse,

    /// Announce the public IP (queries an external service)
    #[arg(short = 'r', long = "public-ip")]
    public_ip: bool,

    /// Host name(s) to announce and certify, comma-separated
    #[arg(long, env = "HTTPSHARE_ANNOUNCE_HOST")]
    announce_host: Option<String>,

    /// Receive uploads into this directory
    #[arg(short = 'u', long = "upload-dir")]
    upload_dir: Option<PathBuf>,

    /// Display name when sharing stdin
    #[arg(short = 'n', long = "name", default_value = "stdin")]
    stdin_name: String,

    /// Directory holding the cached TLS material
    #[arg(long, env = "HTTPSHARE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Log level: error, warn, info, debug, verbose (default: $HTTPSHARE_LOG_LEVEL or info)
    #[arg(long, env = "HTTPSHARE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum CertReuse {
    /// Reuse any cached certificate
    Always,
    /// Reissue when hosts differ or the certificate expired
    MatchHosts,
}

impl From<CertReuse> for ReusePolicy {
    fn from(value: CertReuse) -> Self {
        match value {
            CertReuse::Always => ReusePolicy::Always,
            CertReuse::MatchHosts => ReusePolicy::MatchHosts,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let raw = cli.log_level.clone().unwrap_or_else(|| "info".into());
    let effective_log_level = if raw.eq_ignore_ascii_case("verbose") {
        "debug".to_owned()
    } else {
        raw
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&effective_log_level))
        .init();

    cmd_serve(cli).await
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(cli: Cli) -> Result<()> {
    let (stdin, files): (Vec<PathBuf>, Vec<PathBuf>) =
        cli.files.into_iter().partition(|f| f.as_os_str() == "-");
    if stdin.len() > 1 {
        anyhow::bail!("stdin can only be shared once");
    }

    tracing::debug!(files = files.len(), stdin = !stdin.is_empty(), "parsed command line");

    let cfg = httpshare_server::ServerConfig {
        host: cli.bind,
        port: cli.port,
        files,
        stdin_name: (!stdin.is_empty()).then_some(cli.stdin_name),
        inline: cli.inline,
        request_limit: cli.limit,
        max_clients: cli.trust,
        encrypt: cli.encrypt,
        ephemeral_cert: cli.ephemeral_cert,
        cert_reuse: cli.cert_reuse.into(),
        announce_host: cli.announce_host,
        public_ip: cli.public_ip,
        upload_dir: cli.upload_dir,
        config_dir: cli.config_dir,
    };

    httpshare_server::run(cfg).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn negative_limits_parse() {
        let cli = Cli::try_parse_from(["httpshare", "-l", "-1", "-t", "3", "a.txt"]).unwrap();
        assert_eq!(cli.limit, -1);
        assert_eq!(cli.trust, 3);
        assert_eq!(cli.files, vec![PathBuf::from("a.txt")]);
    }

    #[test]
    fn ephemeral_cert_requires_encrypt() {
        assert!(Cli::try_parse_from(["httpshare", "--ephemeral-cert", "a.txt"]).is_err());
        assert!(Cli::try_parse_from(["httpshare", "-e", "--ephemeral-cert", "a.txt"]).is_ok());
    }
}
