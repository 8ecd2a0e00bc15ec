pub mod models {
    pub mod nest;
}

pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod db {
    pub mod models;
    pub mod store;
}
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod index;
pub mod reconcile;
pub mod registry;
pub mod schema;
pub mod session;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod testing;

use crate::client::NestClient;
use crate::config::Config;
use crate::credentials::TokenFile;
use crate::db::store::PgStore;
use crate::dispatch::Command;
use crate::engine::SyncEngine;
use crate::session::Session;
use crate::transport::UreqTransport;
use crate::worker::WorkerHandle;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{error, info, warn};
use std::io::BufRead;
use std::path::{Path, PathBuf};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| format!("Applying database migrations failed: {}", e))?;
    if applied.is_empty() {
        info!("Registry schema is up to date");
    } else {
        let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
        info!("Applied {} registry migration(s): {}", applied.len(), names);
    }
    Ok(())
}

/// A line read from stdin.
#[derive(Debug, PartialEq)]
enum Input {
    Command(Command),
    Token(String),
    Status,
    Quit,
}

/// `switch <node> on|off`, `setpoint <node> <temperature>`, `token <value>`,
/// `status` or `quit`.
fn parse_input(line: &str) -> Result<Input, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let node = |s: &str| s.parse::<u32>().map_err(|_| format!("invalid node id: {}", s));
    match words.as_slice() {
        ["switch", n, state] => {
            let on = match *state {
                "on" | "1" => true,
                "off" | "0" => false,
                other => return Err(format!("switch state must be on or off, got {}", other)),
            };
            Ok(Input::Command(Command::Switch { node: node(n)?, on }))
        }
        ["setpoint", n, t] => {
            let temperature = t.parse::<f64>().map_err(|_| format!("invalid temperature: {}", t))?;
            Ok(Input::Command(Command::Setpoint {
                node: node(n)?,
                temperature,
            }))
        }
        ["token", value] => Ok(Input::Token(value.to_string())),
        ["status"] => Ok(Input::Status),
        ["quit"] => Ok(Input::Quit),
        _ => Err(format!("unrecognised input: {}", line.trim())),
    }
}

/// Returns true when `quit` was read, false on end of input.
fn read_commands(worker: &WorkerHandle) -> bool {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("Reading commands from stdin failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let outcome = match parse_input(&line) {
            Ok(Input::Command(command)) => worker.submit(command).map_err(|e| e.to_string()),
            Ok(Input::Token(token)) => worker.push_token(token).map_err(|e| e.to_string()),
            Ok(Input::Status) => {
                log_heartbeat(worker);
                continue;
            }
            Ok(Input::Quit) => return true,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => info!("Done: {}", line.trim()),
            Err(e) => warn!("{}: {}", line.trim(), e),
        }
    }
    false
}

fn log_heartbeat(worker: &WorkerHandle) {
    match worker.last_heartbeat() {
        Some(at) => {
            let age = chrono::Utc::now().signed_duration_since(at);
            info!("Worker heartbeat {}.{:03}s ago", age.num_seconds(), age.num_milliseconds().rem_euclid(1000));
        }
        None => warn!("Worker heartbeat unavailable"),
    }
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (poll_interval={}s, scale={:?}, token={}, provisioning={}, api={})",
        cfg.poll_interval.as_secs(),
        cfg.temperature_scale,
        if cfg.access_token.is_some() { "present" } else { "missing" },
        if cfg.provisioning.is_some() { "present" } else { "missing" },
        cfg.api_base
    );
    if cfg.access_token.is_none() && cfg.provisioning.is_none() {
        warn!("Neither an access token nor provisioning secrets are configured; every login will fail");
    }

    // 2) Connect registry DB and apply pending migrations
    let mut conn = PgConnection::establish(&cfg.database_url).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database");
    apply_database_migrations(&mut conn)?;
    let mut store = PgStore::new(conn);
    let known = store.known_devices()?;
    info!("Registry holds {} device(s)", known.len());
    for d in &known {
        log::debug!("Known device {} {} ({})", d.kind, d.device_key, d.name);
    }

    // 3) Sync engine and worker
    let client = NestClient::new(Box::new(UreqTransport::new()), &cfg.api_base, &cfg.token_url);
    let session = Session::new(cfg.access_token.clone(), cfg.provisioning.clone());
    let engine = SyncEngine::new(
        client,
        session,
        store,
        Box::new(TokenFile::new(&cfg.token_file)),
        cfg.temperature_scale,
    );
    let handle = worker::spawn(engine, cfg.poll_interval.as_secs(), worker::TICK)
        .map_err(|e| format!("starting worker failed: {}", e))?;

    // 4) Commands from stdin; `quit` stops after the cycle in flight, EOF keeps syncing
    if read_commands(&handle) {
        info!("Shutting down");
        handle.shutdown();
    } else {
        info!("Command input closed; continuing to sync");
        handle.join();
    }
    Ok(())
}

fn env_file_from_cli() -> Result<Option<PathBuf>, String> {
    let mut args = std::env::args().skip(1);
    let mut env_file = None;
    while let Some(arg) = args.next() {
        let path = if arg == "--env-file" {
            args.next().ok_or_else(|| "`--env-file` requires a path argument".to_string())?
        } else if let Some(p) = arg.strip_prefix("--env-file=") {
            p.to_string()
        } else {
            return Err(format!("unrecognised argument: {}", arg));
        };
        if env_file.replace(PathBuf::from(path)).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }
    Ok(env_file)
}

/// `KEY=value` lines; `#` comments, `export ` prefixes and matching quotes
/// are accepted. Variables already set in the process environment win.
fn load_env_file(path: &Path) -> Result<usize, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let mut loaded = 0;
    for (n, line) in text.lines().enumerate() {
        let Some((key, value)) = parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), n + 1, e))? else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(&key, value);
            }
            loaded += 1;
        }
    }
    Ok(loaded)
}

fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, raw) = line.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("invalid variable name: {:?}", key));
    }
    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let inner = &raw[1..];
            let end = inner.find(q).ok_or_else(|| "unterminated quoted value".to_string())?;
            let rest = inner[end + 1..].trim();
            if !rest.is_empty() && !rest.starts_with('#') {
                return Err("unexpected characters after closing quote".to_string());
            }
            inner[..end].to_string()
        }
        _ => raw.split(" #").next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

fn main() {
    let env_file = match env_file_from_cli() {
        Ok(explicit) => explicit.or_else(|| Some(PathBuf::from(".env")).filter(|p| p.is_file())),
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let loaded = match env_file.as_deref().map(load_env_file).transpose() {
        Ok(n) => n,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let (Some(path), Some(n)) = (env_file.as_ref(), loaded) {
        info!("Loaded {} variable(s) from {}", n, path.display());
    }

    info!(
        "nest-bridge {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
