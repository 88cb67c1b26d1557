//! duplexrpc CLI — issue JSON-RPC calls and watch events from the terminal.
//!
//! Usage:
//! ```bash
//! # Single call over HTTP or WebSocket (picked from the URL scheme)
//! duplexrpc call --url http://127.0.0.1:8080/json_rpc --method get_info
//! duplexrpc call --url ws://127.0.0.1:8080/json_rpc --method get_balance --params '{"asset":"x"}'
//!
//! # HTTP batch
//! duplexrpc batch --url http://127.0.0.1:8080/json_rpc \
//!     --calls '[{"method":"get_info"},{"method":"get_height"}]'
//!
//! # Print notifications until Ctrl-C
//! duplexrpc listen --url ws://127.0.0.1:8080/json_rpc --event new_block
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use duplexrpc_core::{EventDescriptor, JsonRpcRequest, RawValue, ResultSlot, RpcTransport};
use duplexrpc_http::{HttpClient, HttpClientConfig};
use duplexrpc_ws::{WsClient, WsClientConfig};

#[derive(Parser)]
#[command(
    name = "duplexrpc",
    about = "Issue JSON-RPC 2.0 calls over HTTP or WebSocket",
    long_about = "
DuplexRPC CLI: single calls, HTTP batches and WebSocket event subscriptions.

ENVIRONMENT VARIABLES:
  DUPLEXRPC_URL   Default endpoint when --url is omitted
  RUST_LOG        Log filter (default: info, or debug with --verbose)
",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Endpoint {
    /// JSON-RPC endpoint: http(s):// or ws(s)://
    #[arg(long, env = "DUPLEXRPC_URL")]
    url: String,
    /// Per-call timeout in milliseconds (0 waits forever on WebSocket)
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
    /// Extra header as `Name: value` (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one JSON-RPC call and print its result
    Call {
        #[command(flatten)]
        endpoint: Endpoint,
        /// Method name
        #[arg(long)]
        method: String,
        /// JSON params (any JSON value)
        #[arg(long)]
        params: Option<String>,
    },

    /// Send an HTTP batch and print each slot
    Batch {
        #[command(flatten)]
        endpoint: Endpoint,
        /// JSON array of {"method": ..., "params": ...}
        #[arg(long)]
        calls: String,
    },

    /// Subscribe to an event over WebSocket and print notifications
    Listen {
        #[command(flatten)]
        endpoint: Endpoint,
        /// Event descriptor: bare name or JSON (e.g. '{"invoke_contract":{"contract":"..."}}')
        #[arg(long)]
        event: String,
        /// Stop after this many notifications
        #[arg(long)]
        count: Option<usize>,
    },
}

#[derive(Deserialize)]
struct BatchEntry {
    method: String,
    #[serde(default)]
    params: Option<Box<RawValue>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Call {
            endpoint,
            method,
            params,
        } => cmd_call(&endpoint, &method, params.as_deref()).await,
        Commands::Batch { endpoint, calls } => cmd_batch(&endpoint, &calls).await,
        Commands::Listen {
            endpoint,
            event,
            count,
        } => cmd_listen(&endpoint, &event, count).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn is_websocket(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

fn http_client(endpoint: &Endpoint) -> Result<HttpClient> {
    let config = HttpClientConfig {
        request_timeout: Duration::from_millis(endpoint.timeout_ms),
        headers: endpoint.headers.clone(),
    };
    Ok(HttpClient::new(&endpoint.url, config)?)
}

async fn ws_client(endpoint: &Endpoint) -> Result<WsClient> {
    let config = WsClientConfig {
        call_timeout: Duration::from_millis(endpoint.timeout_ms),
        headers: endpoint.headers.clone(),
    };
    Ok(WsClient::dial(&endpoint.url, config).await?)
}

fn parse_json(raw: &str, what: &str) -> Result<Box<RawValue>> {
    RawValue::from_string(raw.to_string()).with_context(|| format!("{what} is not valid JSON"))
}

fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

async fn cmd_call(endpoint: &Endpoint, method: &str, params: Option<&str>) -> Result<()> {
    let params = params.map(|p| parse_json(p, "--params")).transpose()?;

    let resp = if is_websocket(&endpoint.url) {
        let client = ws_client(endpoint).await?;
        let resp = client.send_raw(method, params).await;
        client.close().await?;
        resp?
    } else {
        http_client(endpoint)?.send_raw(method, params).await?
    };

    let result: Value = resp.decode()?;
    print_json(&result);
    Ok(())
}

async fn cmd_batch(endpoint: &Endpoint, calls: &str) -> Result<()> {
    if is_websocket(&endpoint.url) {
        bail!("batch requests are HTTP only");
    }
    let entries: Vec<BatchEntry> =
        serde_json::from_str(calls).context("--calls must be a JSON array of {method, params}")?;
    let requests: Vec<JsonRpcRequest> = entries
        .into_iter()
        .map(|e| JsonRpcRequest::new(0, e.method, e.params))
        .collect();

    let client = http_client(endpoint)?;
    let mut results: Vec<Option<Value>> = vec![None; requests.len()];
    let errors = {
        let mut slots: Vec<&mut dyn ResultSlot> = results
            .iter_mut()
            .map(|slot| slot as &mut dyn ResultSlot)
            .collect();
        client.batch_request(requests, &mut slots).await?
    };

    for (index, result) in results.iter().enumerate() {
        match result {
            Some(value) => println!("[{index}] {value}"),
            None => println!("[{index}] <no result>"),
        }
    }
    for err in &errors {
        eprintln!("error: {err}");
    }
    if !errors.is_empty() {
        bail!("{} of the batch calls failed", errors.len());
    }
    Ok(())
}

async fn cmd_listen(endpoint: &Endpoint, event: &str, count: Option<usize>) -> Result<()> {
    if !is_websocket(&endpoint.url) {
        bail!("listen needs a ws:// or wss:// endpoint");
    }
    let descriptor = match serde_json::from_str::<Value>(event) {
        Ok(value) => EventDescriptor::new(&value)?,
        Err(_) => EventDescriptor::new(event)?,
    };

    let client = ws_client(endpoint).await?;
    let rx = client.listen_event(&descriptor).await?;
    tracing::info!(event = %descriptor, "listening, Ctrl-C to stop");

    let mut seen = 0usize;
    loop {
        tokio::select! {
            resp = rx.recv() => {
                let Some(resp) = resp else {
                    tracing::warn!("subscription closed by the connection");
                    break;
                };
                match resp.decode::<Value>() {
                    Ok(value) => print_json(&value),
                    Err(e) => eprintln!("error: {e}"),
                }
                seen += 1;
                if count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(e) = client.close_event(&descriptor).await {
        tracing::warn!(error = %e, "unsubscribe failed");
    }
    client.close().await?;
    Ok(())
}
