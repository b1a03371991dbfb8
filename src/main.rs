//! holy-http: demo HTTP server
//!
//! Echoes each request back as plain text:
//! - method, path and version
//! - query or form parameters
//! - the raw body
//!
//! Configuration via CLI arguments or TOML file.

use holy_http::runtime::{Server, ServerHandle, ServerHandler};
use holy_http::{Config, HttpConnFactory, HttpRequest, HttpResponse};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        port = config.port,
        bind_ips = ?config.bind_ips,
        cron_interval = config.cron_interval,
        events_capacity = config.events_capacity,
        "Starting holy-http server"
    );

    let mut server = Server::with_handler(&config, HttpConnFactory::new(echo), StatsLogger)?;
    server.run()?;
    Ok(())
}

fn echo(req: &HttpRequest, resp: &mut HttpResponse) {
    let mut body = String::new();
    let _ = writeln!(body, "{} {} {}", req.method, req.path, req.version);

    let mut params: Vec<_> = req.query_params.iter().collect();
    params.sort();
    for (key, value) in params {
        let _ = writeln!(body, "{key}={value}");
    }

    if !req.content.is_empty() {
        let _ = writeln!(body);
        body.push_str(&String::from_utf8_lossy(&req.content));
    }

    resp.write_simple(200, "OK", "text/plain", body.as_bytes());
}

/// Logs connection stats on every cron tick.
struct StatsLogger;

impl ServerHandler for StatsLogger {
    fn cron_handle(&mut self, server: &ServerHandle) {
        let conns = server.connections();
        let max_idle = conns
            .iter()
            .map(|c| c.idle)
            .max()
            .unwrap_or(Duration::ZERO);
        info!(
            connections = conns.len(),
            max_idle_ms = max_idle.as_millis() as u64,
            "Server stats"
        );
    }
}
