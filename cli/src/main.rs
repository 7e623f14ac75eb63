//! `gateway` binary: loads config, starts tracing, picks a backend, and runs the server.

use clap::Parser;

const DEFAULT_ADDR: &str = "127.0.0.1:8765";

#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(about = "Gateway Protocol v3 server")]
struct Args {
    /// Address to listen on
    #[arg(short, long, value_name = "ADDR")]
    addr: Option<String>,

    /// Backend to drive chat turns with
    #[arg(long, value_name = "NAME", default_value = "demo")]
    backend: String,

    /// Backend base URL (ollama: default http://127.0.0.1:11434; openai: default
    /// https://api.openai.com/v1)
    #[arg(long, value_name = "URL")]
    backend_url: Option<String>,

    /// Model name to request from the backend
    #[arg(long, value_name = "NAME")]
    model: Option<String>,

    /// API key for the backend (openai only; falls back to OPENAI_API_KEY)
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,

    /// Exit after the first connection closes (used by tests)
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _ = config::load_and_apply("gateway", None);
    let _guard = cli::logging::init()?;

    let api_key = args.api_key.or_else(|| std::env::var("OPENAI_API_KEY").ok());
    let backend = cli::select_backend(&args.backend, args.backend_url, args.model, api_key)
        .map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    tracing::info!(backend = args.backend.as_str(), "selected backend");

    let addr = args.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());
    serve::run_serve(Some(&addr), args.once, Some(backend.build())).await
}
