//! tapeproxy CLI

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use tapeproxy::config::Config;
use tapeproxy::network::{HttpClient, NetworkHandler};
use tapeproxy::proxy::ProxyService;
use tapeproxy::session::SessionManager;
use tapeproxy::storage::FileStore;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = &args[1];

    let result = match command.as_str() {
        "serve" => {
            let config_path = args.get(2).map(PathBuf::from);
            serve(config_path.as_deref())
        }
        "stats" => {
            if args.len() < 3 {
                eprintln!("Usage: tapeproxy stats <recording.json>");
                process::exit(1);
            }
            show_stats(Path::new(&args[2]))
        }
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'tapeproxy' for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    eprintln!("tapeproxy v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: tapeproxy <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  serve [config.toml]       Run the record/playback proxy");
    eprintln!("  stats <recording.json>    Summarize a stored recording");
}

fn serve(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;

    runtime.block_on(async move {
        let store = Arc::new(FileStore::new(config.recording_dir.clone()));
        let sessions = Arc::new(SessionManager::new(
            store,
            config.session_defaults()?,
            config.limits.max_sessions,
        ));
        let upstream = HttpClient::new(
            config.limits.upstream_timeout(),
            config.limits.max_response_size,
        );
        let service = ProxyService::new(
            sessions,
            upstream,
            config.default_upstream.clone(),
            config.limits.clone(),
        );

        tracing::info!(
            "tapeproxy {} storing recordings in {}",
            env!("CARGO_PKG_VERSION"),
            config.recording_dir.display()
        );

        let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
        NetworkHandler::new(service, config.limits.max_connections)
            .run(addr)
            .await
            .with_context(|| format!("serving on {addr}"))
    })
}

fn show_stats(path: &Path) -> anyhow::Result<()> {
    let recording = FileStore::load_path(path)
        .with_context(|| format!("reading {}", path.display()))?;

    println!("Recording: {}", path.display());
    println!("Entries:   {}", recording.len());
    println!("Variables: {}", recording.variables.len());

    let mut methods: Vec<(String, usize)> = Vec::new();
    for entry in &recording.entries {
        match methods.iter_mut().find(|(m, _)| *m == entry.request.method) {
            Some((_, count)) => *count += 1,
            None => methods.push((entry.request.method.clone(), 1)),
        }
    }
    if !methods.is_empty() {
        println!();
        for (method, count) in methods {
            println!("  {method:<8} {count}");
        }
    }

    println!();
    for (index, entry) in recording.entries.iter().enumerate() {
        println!(
            "  {index:>4}  {} -> {}",
            entry.request.describe(),
            entry.response.status
        );
    }

    Ok(())
}
