//! Graph configuration and the engine that wires elements together.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    channel::ChannelOutput,
    connector::{DEFAULT_DEPTH, OverflowPolicy},
    decoder::{DecoderFactory, DefaultDecoderFactory},
    distributor::Distributor,
    element::{ElementContext, ElementRunner, FrameConnector},
    error::{Error, Result},
    frame::{ElementId, PortId},
    sink::{DEFAULT_SINK_CAPACITY, FrameStream, SinkElement},
    source::{SourceConfig, SourceElement},
    transform::{FrameTransform, RegionTransform},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Source,
    Distributor,
    Sink,
}

fn default_thread_number() -> usize {
    1
}

#[derive(Clone, Debug, Deserialize)]
pub struct ElementConfig {
    pub id: ElementId,
    pub kind: ElementKind,
    #[serde(default = "default_thread_number")]
    pub thread_number: usize,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ConnectionConfig {
    pub src_element: ElementId,
    pub src_port: PortId,
    pub dst_element: ElementId,
    pub dst_port: PortId,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowKind {
    #[default]
    Drop,
    Block,
}

fn default_depth() -> usize {
    DEFAULT_DEPTH
}

fn default_block_timeout_ms() -> u64 {
    200
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default = "default_depth")]
    pub depth: usize,
    #[serde(default)]
    pub overflow: OverflowKind,
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            depth: default_depth(),
            overflow: OverflowKind::default(),
            block_timeout_ms: default_block_timeout_ms(),
        }
    }
}

impl ConnectorConfig {
    pub fn policy(&self) -> OverflowPolicy {
        match self.overflow {
            OverflowKind::Drop => OverflowPolicy::Drop,
            OverflowKind::Block => OverflowPolicy::Block {
                timeout: Duration::from_millis(self.block_timeout_ms),
            },
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub graph_id: u32,
    pub elements: Vec<ElementConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub connector: ConnectorConfig,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
struct SinkConfig {
    capacity: Option<usize>,
}

impl GraphConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("graph: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("graph {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    fn kinds(&self) -> HashMap<ElementId, ElementKind> {
        self.elements.iter().map(|e| (e.id, e.kind)).collect()
    }

    fn outputs_of(&self, id: ElementId) -> impl Iterator<Item = &ConnectionConfig> + '_ {
        self.connections.iter().filter(move |c| c.src_element == id)
    }

    fn inputs_of(&self, id: ElementId) -> impl Iterator<Item = &ConnectionConfig> + '_ {
        self.connections.iter().filter(move |c| c.dst_element == id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.elements.is_empty() {
            return Err(Error::config("graph has no elements"));
        }
        if self.connector.depth == 0 {
            return Err(Error::config("connector depth must be at least 1"));
        }

        let mut ids = BTreeSet::new();
        for element in &self.elements {
            if !ids.insert(element.id) {
                return Err(Error::config(format!("duplicate element id {}", element.id)));
            }
            if element.thread_number == 0 {
                return Err(Error::config(format!(
                    "element {} thread_number must be at least 1",
                    element.id
                )));
            }
        }

        let mut used_outputs = BTreeSet::new();
        let mut used_inputs = BTreeSet::new();
        for c in &self.connections {
            for id in [c.src_element, c.dst_element] {
                if !ids.contains(&id) {
                    return Err(Error::config(format!("connection references unknown element {}", id)));
                }
            }
            if c.src_element == c.dst_element {
                return Err(Error::config(format!("element {} is connected to itself", c.src_element)));
            }
            if !used_outputs.insert((c.src_element, c.src_port)) {
                return Err(Error::config(format!(
                    "output port {} of element {} is connected twice",
                    c.src_port, c.src_element
                )));
            }
            if !used_inputs.insert((c.dst_element, c.dst_port)) {
                return Err(Error::config(format!(
                    "input port {} of element {} is connected twice",
                    c.dst_port, c.dst_element
                )));
            }
        }

        for element in &self.elements {
            let inputs = self.inputs_of(element.id).count();
            let outputs = self.outputs_of(element.id).count();
            let problem = match element.kind {
                ElementKind::Source if inputs != 0 => Some("a source takes no inputs"),
                ElementKind::Source if outputs != 1 => Some("a source needs exactly one output"),
                ElementKind::Sink if inputs == 0 => Some("a sink needs at least one input"),
                ElementKind::Sink if outputs != 0 => Some("a sink has no outputs"),
                ElementKind::Distributor if inputs != 1 => Some("a distributor needs exactly one input"),
                ElementKind::Distributor if outputs == 0 => Some("a distributor needs outputs"),
                _ => None,
            };
            if let Some(problem) = problem {
                return Err(Error::config(format!("element {}: {}", element.id, problem)));
            }
        }
        Ok(())
    }
}

/// External implementations the engine hands to its elements.
#[derive(Clone)]
pub struct Collaborators {
    pub decoders: Arc<dyn DecoderFactory>,
    pub transform: Arc<dyn FrameTransform>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            decoders: Arc::new(DefaultDecoderFactory),
            transform: Arc::new(RegionTransform),
        }
    }
}

pub struct Engine {
    graph_id: u32,
    runners: Vec<ElementRunner>,
    sources: BTreeMap<ElementId, Arc<SourceElement>>,
    sinks: BTreeMap<ElementId, Arc<SinkElement>>,
    started: bool,
}

impl Engine {
    pub fn build(config: GraphConfig, collaborators: Collaborators) -> Result<Engine> {
        config.validate()?;
        let kinds = config.kinds();
        let lanes: HashMap<ElementId, usize> = config
            .elements
            .iter()
            .map(|e| {
                let lanes = match e.kind {
                    ElementKind::Sink => {
                        if e.thread_number != 1 {
                            log::warn!("sink {} runs a single lane, thread_number ignored", e.id);
                        }
                        1
                    }
                    _ => e.thread_number,
                };
                (e.id, lanes)
            })
            .collect();

        let policy = config.connector.policy();
        let connectors: Vec<(ConnectionConfig, Arc<FrameConnector>)> = config
            .connections
            .iter()
            .map(|c| {
                let connector = FrameConnector::new(lanes[&c.dst_element], config.connector.depth, policy);
                (*c, Arc::new(connector))
            })
            .collect();

        let mut engine = Engine {
            graph_id: config.graph_id,
            runners: Vec::new(),
            sources: BTreeMap::new(),
            sinks: BTreeMap::new(),
            started: false,
        };

        for element in &config.elements {
            let mut ctx = ElementContext::new(element.id, lanes[&element.id]);
            let mut all_to_sinks = true;
            let mut has_outputs = false;
            for (c, connector) in &connectors {
                if c.dst_element == element.id {
                    ctx = ctx.with_input(c.dst_port, Arc::clone(connector));
                }
                if c.src_element == element.id {
                    ctx = ctx.with_output(c.src_port, Arc::clone(connector));
                    has_outputs = true;
                    all_to_sinks &= kinds[&c.dst_element] == ElementKind::Sink;
                }
            }
            let ctx = ctx.with_sink(has_outputs && all_to_sinks);

            match element.kind {
                ElementKind::Source => {
                    let Some((c, connector)) = connectors.iter().find(|(c, _)| c.src_element == element.id)
                    else {
                        return Err(Error::config(format!("source {} has no output", element.id)));
                    };
                    let output = ChannelOutput::new(Arc::clone(connector))
                        .terminal(kinds[&c.dst_element] == ElementKind::Sink);
                    let source_config = SourceConfig::from_value(element.config.clone())?;
                    let source = SourceElement::new(
                        element.id,
                        &source_config,
                        Arc::clone(&collaborators.decoders),
                        output,
                    )?;
                    engine.sources.insert(element.id, Arc::new(source));
                }
                ElementKind::Distributor => {
                    let distributor =
                        Distributor::from_value(element.config.clone(), Arc::clone(&collaborators.transform))?;
                    if ctx.output(distributor.default_port()).is_none() {
                        return Err(Error::config(format!(
                            "distributor {} default port {} is not connected",
                            element.id,
                            distributor.default_port()
                        )));
                    }
                    engine.runners.push(ElementRunner::new(Arc::new(distributor), ctx));
                }
                ElementKind::Sink => {
                    let sink_config: SinkConfig = if element.config.is_null() {
                        SinkConfig::default()
                    } else {
                        serde_json::from_value(element.config.clone())
                            .map_err(|e| Error::config(format!("sink {}: {}", element.id, e)))?
                    };
                    let sink = Arc::new(SinkElement::new(
                        sink_config.capacity.unwrap_or(DEFAULT_SINK_CAPACITY),
                    ));
                    engine.sinks.insert(element.id, Arc::clone(&sink));
                    engine.runners.push(ElementRunner::new(sink, ctx));
                }
            }
        }

        log::info!(
            "graph {} built: {} sources, {} elements, {} connections",
            engine.graph_id,
            engine.sources.len(),
            engine.runners.len(),
            connectors.len()
        );
        Ok(engine)
    }

    pub fn graph_id(&self) -> u32 {
        self.graph_id
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Starts every element lane, then the configured channels of each source.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            log::warn!("graph {} already started", self.graph_id);
            return Ok(());
        }
        let mut failure = None;
        for runner in &mut self.runners {
            if let Err(e) = runner.start() {
                failure = Some((runner.context().id(), e));
                break;
            }
        }
        if let Some((id, e)) = failure {
            for runner in &mut self.runners {
                if runner.is_running() {
                    runner.stop().await;
                }
            }
            return Err(Error::config(format!("element {} failed to start: {:#}", id, e)));
        }
        self.started = true;
        for source in self.sources.values() {
            source.autostart().await;
        }
        log::info!("graph {} started", self.graph_id);
        Ok(())
    }

    /// Stops every channel, then every element lane.
    pub async fn stop(&mut self) {
        for source in self.sources.values() {
            source.shutdown().await;
        }
        for runner in &mut self.runners {
            if runner.is_running() {
                runner.stop().await;
            }
        }
        self.started = false;
        log::info!("graph {} stopped", self.graph_id);
    }

    pub fn source(&self, id: ElementId) -> Option<&Arc<SourceElement>> {
        self.sources.get(&id)
    }

    pub fn source_ids(&self) -> Vec<ElementId> {
        self.sources.keys().copied().collect()
    }

    pub fn sink_ids(&self) -> Vec<ElementId> {
        self.sinks.keys().copied().collect()
    }

    pub fn sink_stream(&self, id: ElementId) -> Option<FrameStream> {
        self.sinks.get(&id).map(|sink| sink.stream())
    }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod graph_test;
