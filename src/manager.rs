use std::{
    collections::BTreeMap,
    sync::{Arc, LazyLock},
};

use stream_core::{Engine, frame::ElementId, source::SourceElement};
use tokio::sync::RwLock;

static SOURCE_MANAGER: LazyLock<RwLock<BTreeMap<ElementId, Arc<SourceElement>>>> =
    LazyLock::new(|| RwLock::new(BTreeMap::new()));

/// Publishes the engine's sources to the HTTP handlers.
pub(crate) async fn register_sources(engine: &Engine) {
    let mut sources = SOURCE_MANAGER.write().await;
    for id in engine.source_ids() {
        if let Some(source) = engine.source(id) {
            sources.insert(id, Arc::clone(source));
        }
    }
}

#[cfg(test)]
pub(crate) async fn register_source(source: Arc<SourceElement>) {
    SOURCE_MANAGER.write().await.insert(source.id(), source);
}

pub(crate) async fn clear_sources() {
    SOURCE_MANAGER.write().await.clear();
}

pub(crate) async fn get_source(id: ElementId) -> Option<Arc<SourceElement>> {
    SOURCE_MANAGER.read().await.get(&id).cloned()
}

pub(crate) async fn source_ids() -> Vec<ElementId> {
    SOURCE_MANAGER.read().await.keys().copied().collect()
}
