use std::sync::LazyLock;

pub struct ServerConfig {
    listen: String,
    graph_path: String,
}

impl ServerConfig {
    pub fn new(listen: &str, graph_path: &str) -> Self {
        Self {
            listen: listen.to_string(),
            graph_path: graph_path.to_string(),
        }
    }

    pub fn from_env() -> Self {
        let listen = std::env::var("LITE_STREAM_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".into());
        let graph_path =
            std::env::var("LITE_STREAM_GRAPH").unwrap_or_else(|_| "config/engine.json".into());
        Self::new(&listen, &graph_path)
    }

    pub fn listen(&self) -> &str {
        &self.listen
    }

    pub fn graph_path(&self) -> &str {
        &self.graph_path
    }
}

pub fn config() -> &'static ServerConfig {
    static CONFIG: LazyLock<ServerConfig> = LazyLock::new(ServerConfig::from_env);
    &CONFIG
}
