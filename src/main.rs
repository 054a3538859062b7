use stream_core::{Collaborators, Engine, GraphConfig};
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod drain;
mod handler;
mod manager;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("stream_core", log::LevelFilter::Debug)
        .filter_module("lite_stream", log::LevelFilter::Debug)
        .init();
}

fn load_engine(path: &str) -> anyhow::Result<Engine> {
    let graph = GraphConfig::load(path)?;
    log::info!(
        "loaded graph {} from {} ({} elements, {} connections)",
        graph.graph_id,
        path,
        graph.elements.len(),
        graph.connections.len()
    );
    Ok(Engine::build(graph, Collaborators::default())?)
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();

    let mut engine = load_engine(config.graph_path()).unwrap_or_else(|e| {
        log::error!("Error loading graph {}: {:#}", config.graph_path(), e);
        std::process::exit(1);
    });

    let cancel = CancellationToken::new();

    drain::start_sink_drain(&engine, cancel.clone());
    if let Err(e) = engine.start().await {
        log::error!("Error starting graph {}: {}", engine.graph_id(), e);
        std::process::exit(1);
    }
    manager::register_sources(&engine).await;

    let cancel_clone = cancel.clone();
    api::start_api_server(config.listen().to_string(), cancel_clone);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    manager::clear_sources().await;
    engine.stop().await;
    std::process::exit(0);
}
