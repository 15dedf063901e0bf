//! api-throttle CLI: connectivity probe, configured limits, ad-hoc throttled GET.
//!
//! Usage:
//!   api-throttle-cli probe [--url <url>]                 Check internet reachability
//!   api-throttle-cli limits [--config <file>]            Show effective limits
//!   api-throttle-cli get <url> [--attempts <n>]          GET a response envelope

use anyhow::{bail, Context};
use api_throttle::transport::{ConnectivityCheck, HttpProbe};
use api_throttle::{ApiClient, ApiConfig, Endpoint, Environment};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Target {
    Dev,
    Test,
    Production,
}

impl Environment for Target {
    fn all() -> &'static [Self] {
        &[Target::Dev, Target::Test, Target::Production]
    }

    fn name(&self) -> &'static str {
        match self {
            Target::Dev => "dev",
            Target::Test => "test",
            Target::Production => "production",
        }
    }
}

/// The URL given on the command line is the whole request target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AdHoc;

impl Endpoint for AdHoc {
    fn all() -> &'static [Self] {
        &[AdHoc]
    }

    fn name(&self) -> &'static str {
        "AdHoc"
    }

    fn path_segment(&self) -> String {
        String::new()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "probe" => cmd_probe(&args[2..]).await,
        "limits" => cmd_limits(&args[2..]),
        "get" => cmd_get(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("api-throttle-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"api-throttle-cli

USAGE:
    api-throttle-cli <COMMAND> [OPTIONS]

COMMANDS:
    probe [--url <url>]              Check internet reachability
    limits [--config <file>]         Show effective limits and endpoint settings
    get <url> [--attempts <n>]       Throttled GET, prints the response envelope
    version                          Show version information
    help                             Show this help message

ENVIRONMENT:
    RUST_LOG                         Log filter (default: warn)
    API_THROTTLE_*                   Configuration overrides"#
    );
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

async fn cmd_probe(args: &[String]) -> anyhow::Result<()> {
    let probe = match flag(args, "--url") {
        Some(url) => HttpProbe::with_url(url),
        None => HttpProbe::new(),
    };
    if probe.has_internet().await {
        println!("online");
        Ok(())
    } else {
        println!("offline");
        std::process::exit(2);
    }
}

fn cmd_limits(args: &[String]) -> anyhow::Result<()> {
    let config: ApiConfig<Target> = match flag(args, "--config") {
        Some(path) => ApiConfig::from_yaml_file(path)
            .with_context(|| format!("loading {path}"))?
            .apply_env_overrides(),
        None => ApiConfig::from_env(),
    };

    println!("timeout:                       {}s", config.timeout_secs);
    println!("max attempts:                  {}", config.max_attempts);
    println!("backoff:                       {:?}", config.backoff);
    println!("max concurrent requests:       {}", config.max_concurrent_requests);
    println!("default max endpoint requests: {}", config.default_max_endpoint_requests);
    println!("download root:                 {}", config.download_root.display());
    println!(
        "current environment:           {}",
        config.current_environment().map(|e| e.name()).unwrap_or("-")
    );

    let mut envs: Vec<_> = config.environments().iter().collect();
    envs.sort_by_key(|(env, _)| env.name());
    for (env, url) in envs {
        println!("  env {:<12} {}", env.name(), url);
    }

    let mut endpoints: Vec<_> = config.endpoints.iter().collect();
    endpoints.sort_by(|a, b| a.0.cmp(b.0));
    for (name, settings) in endpoints {
        println!(
            "  endpoint {:<12} max={} min_interval_ms={} headers={}",
            name,
            settings
                .max_concurrent
                .map(|n| n.to_string())
                .unwrap_or_else(|| "default".to_string()),
            settings.min_interval_ms.unwrap_or(0),
            settings.headers.len()
        );
    }
    Ok(())
}

async fn cmd_get(args: &[String]) -> anyhow::Result<()> {
    let Some(url) = args.first().filter(|a| !a.starts_with("--")) else {
        bail!("usage: api-throttle-cli get <url> [--attempts <n>]");
    };
    let attempts = match flag(args, "--attempts") {
        Some(n) => n.parse::<u32>().context("--attempts expects a number")?,
        None => 1,
    };

    let client = ApiClient::<Target, AdHoc>::builder()
        .environment(Target::Dev, url.as_str())
        .current_environment(Target::Dev)
        .max_attempts(attempts)
        .build()?;

    let resp = client.try_get::<serde_json::Value>(AdHoc).await?;
    println!("success: {}", resp.success);
    if let Some(message) = &resp.message {
        println!("message: {message}");
    }
    if let Some(data) = &resp.data {
        println!("{}", serde_json::to_string_pretty(data)?);
    }
    if let Some(err) = resp.error {
        bail!(err);
    }
    Ok(())
}
