//! # mrpc CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Serve the demo Arith service
//! mrpc serve -b 127.0.0.1:9000
//!
//! # Make an RPC call (outputs raw JSON)
//! mrpc call 127.0.0.1:9000 Arith.Add -a '{"num1": 1, "num2": 2}'
//!
//! # Give up after one second
//! mrpc call 127.0.0.1:9000 Arith.Divide -a '{"num1": 7, "num2": 2}' --timeout-ms 1000
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use mrpc_cli::arith::Arith;
use mrpc_client::{Client, ClientConfig};
use mrpc_common::codec::JSON_CODEC;
use mrpc_server::Server;

#[derive(FromArgs)]
/// mrpc - multiplexed RPC over a single connection
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
}

/// Arguments for serving the demo service.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// serve the demo Arith service
struct ServeArgs {
    /// address to bind to
    #[argh(option, short = 'b', default = "String::from(\"0.0.0.0:9000\")")]
    bind: String,
}

/// Arguments for making a single RPC call.
///
/// Outputs the reply as raw JSON on stdout, errors go to stderr with a
/// non-zero exit code. The call always uses the JSON codec so that any reply
/// can be printed without knowing its type.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call an RPC method on a server
struct CallArgs {
    /// address of the server
    #[argh(positional)]
    address: String,

    /// procedure to call, as Service.Method
    #[argh(positional)]
    service_method: String,

    /// JSON string containing the argument, defaults to `null`
    #[argh(option, short = 'a', long = "args", default = "String::from(\"null\")")]
    args: String,

    /// network to dial: tcp or unix
    #[argh(option, short = 'n', default = "String::from(\"tcp\")")]
    network: String,

    /// give up waiting for the reply after this many milliseconds
    #[argh(option, long = "timeout-ms")]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep stdout clean for `call` so it can be piped
    if !matches!(cli.command, Commands::Call(_)) {
        // Set default log level to INFO, but allow RUST_LOG env var to override
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

/// Executes the `serve` subcommand until Ctrl-C.
async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut server = Server::new();
    server.register(Arith)?;
    let server = Arc::new(server);

    tokio::select! {
        result = server.serve(&args.bind) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

/// Executes the `call` subcommand.
///
/// # Errors
///
/// Returns an error if:
/// - The args string is not valid JSON
/// - The connection to the server fails
/// - The RPC call itself fails or times out
async fn run_call(args: CallArgs) -> Result<()> {
    let argv: serde_json::Value = serde_json::from_str(&args.args)
        .map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))?;

    let config = ClientConfig::new().with_codec_type(JSON_CODEC);
    let client = Client::dial_with_config(&args.network, &args.address, config).await?;

    let reply: serde_json::Value = match args.timeout_ms {
        Some(ms) => {
            client
                .call_timeout(&args.service_method, &argv, Duration::from_millis(ms))
                .await?
        }
        None => client.call(&args.service_method, &argv).await?,
    };

    println!("{}", serde_json::to_string(&reply)?);

    client.close().await?;
    Ok(())
}
