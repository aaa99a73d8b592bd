//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use loadchain_core::{
    BoxHandler, Chain, Loader, LoaderTask, RecordingSink, Response, Scope, Stage, respond,
    serve_request,
};
use loadchain_shared::{
    AppConfig, Request, ScopeConfig, init_config, load_config, load_config_from, status,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// loadchain — request-scoped loaders and middleware chains.
#[derive(Parser)]
#[command(
    name = "loadchain",
    version,
    about = "Run and inspect loadchain request pipelines.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.loadchain/loadchain.toml.
    #[arg(long, global = true, env = "LOADCHAIN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Serve one scripted request through a chain and a parallel loader.
    Demo {
        /// Request path.
        #[arg(long, default_value = "/profile")]
        path: String,

        /// Loader keys that should fail (repeatable): session, user, perms.
        #[arg(long)]
        fail: Vec<String>,

        /// Simulated latency per loader, as KEY=MS (repeatable).
        #[arg(long, value_parser = parse_delay)]
        delay: Vec<(String, u64)>,

        /// Write the full load report to the client on failure.
        #[arg(long)]
        expose_report: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

fn parse_delay(s: &str) -> std::result::Result<(String, u64), String> {
    let (key, ms) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=MS, got '{s}'"))?;
    let ms = ms
        .parse::<u64>()
        .map_err(|e| format!("invalid delay '{ms}': {e}"))?;
    Ok((key.to_string(), ms))
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "loadchain=info",
        1 => "loadchain=debug",
        _ => "loadchain=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Demo {
            path,
            fail,
            delay,
            expose_report,
        } => cmd_demo(&config, &path, &fail, &delay, expose_report).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_demo(
    config: &AppConfig,
    path: &str,
    fail: &[String],
    delays: &[(String, u64)],
    expose_report: bool,
) -> Result<()> {
    let mut scope_config = ScopeConfig::from(config);
    scope_config.expose_report |= expose_report;

    let delay_of = |key: &str| {
        delays
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, ms)| Duration::from_millis(*ms))
            .unwrap_or_default()
    };
    let should_fail = |key: &str| fail.iter().any(|k| k == key);

    for key in fail.iter().chain(delays.iter().map(|(k, _)| k)) {
        if !DEMO_KEYS.contains(&key.as_str()) {
            return Err(eyre!("unknown loader key '{key}', expected one of {DEMO_KEYS:?}"));
        }
    }

    // Base scope: config-driven policy and creator, plus process-wide defaults.
    let base = Scope::from_config(&scope_config)
        .with_default_stages([access_log()])
        .with_default_loaders([simulated(
            "session",
            String::from("sess-01"),
            delay_of("session"),
            should_fail("session"),
        )]);

    let loader = Loader::from_fn(
        &base,
        |scope: Scope| async move {
            let user = scope.get::<u64>("user").map(|u| *u).unwrap_or_default();
            respond::redirect(&scope, &format!("/users/{user}"), status::SEE_OTHER);
        },
        [
            simulated("user", 42u64, delay_of("user"), should_fail("user")),
            simulated(
                "perms",
                vec![String::from("read")],
                delay_of("perms"),
                should_fail("perms"),
            ),
        ],
    );
    let handler = Chain::new(&base, std::iter::empty()).then(Arc::new(loader));

    info!(path, tasks = DEMO_KEYS.len(), "serving demo request");
    let sink = Arc::new(RecordingSink::new());
    let start = Instant::now();
    serve_request(&base, &*handler, Request::new("GET", path), sink.clone()).await;
    let elapsed = start.elapsed();

    for response in sink.responses() {
        println!("{}", serde_json::to_string_pretty(&response_json(&response))?);
    }
    println!("  Time: {:.1}ms", elapsed.as_secs_f64() * 1000.0);

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Demo pieces
// ---------------------------------------------------------------------------

const DEMO_KEYS: [&str; 3] = ["session", "user", "perms"];

/// Loader that sleeps, then yields `value` or fails.
fn simulated<T>(key: &'static str, value: T, delay: Duration, fail: bool) -> LoaderTask
where
    T: Clone + Send + Sync + 'static,
{
    LoaderTask::spawn(key, move |_| {
        let value = value.clone();
        async move {
            tokio::time::sleep(delay).await;
            (!fail).then_some(value)
        }
    })
}

/// Outermost stage: logs each request with its id and duration.
fn access_log() -> Stage {
    Stage::from_fn(|scope: Scope, next: BoxHandler| async move {
        let start = Instant::now();
        let request_id = scope.request_id().map(|id| id.to_string()).unwrap_or_default();
        let path = scope.request().map(|r| r.path.clone()).unwrap_or_default();
        info!(%request_id, %path, "request started");
        next.serve(scope).await;
        info!(%request_id, elapsed_ms = start.elapsed().as_millis() as u64, "request finished");
    })
}

fn response_json(response: &Response) -> serde_json::Value {
    match response {
        Response::Error { message, status } => serde_json::json!({
            "kind": "error",
            "status": status,
            "body": message,
        }),
        Response::Redirect {
            from,
            target,
            status,
        } => serde_json::json!({
            "kind": "redirect",
            "status": status,
            "from": from,
            "location": target,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_delay_accepts_key_ms() {
        assert_eq!(parse_delay("user=250"), Ok(("user".to_string(), 250)));
        assert!(parse_delay("user").is_err());
        assert!(parse_delay("user=soon").is_err());
    }

    #[test]
    fn cli_parses_demo_flags() {
        let cli = Cli::try_parse_from([
            "loadchain",
            "demo",
            "--fail",
            "user",
            "--delay",
            "perms=10",
            "--expose-report",
        ])
        .expect("parse");
        match cli.command {
            Command::Demo {
                fail,
                delay,
                expose_report,
                ..
            } => {
                assert_eq!(fail, ["user"]);
                assert_eq!(delay, [("perms".to_string(), 10)]);
                assert!(expose_report);
            }
            Command::Config { .. } => panic!("expected demo"),
        }
    }

    #[test]
    fn redirect_json_shape() {
        let json = response_json(&Response::Redirect {
            from: Some("/profile".into()),
            target: "/users/42".into(),
            status: 303,
        });
        assert_eq!(json["kind"], "redirect");
        assert_eq!(json["location"], "/users/42");
    }
}
