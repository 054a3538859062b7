use stream_core::{Engine, frame::ElementId};
use tokio_stream::{StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;

/// Consumes every sink of the engine so terminal queues never back up. Frames are
/// only logged; a downstream consumer would hook in here.
pub(crate) fn start_sink_drain(engine: &Engine, cancel: CancellationToken) {
    let mut sinks = StreamMap::new();
    for id in engine.sink_ids() {
        if let Some(stream) = engine.sink_stream(id) {
            sinks.insert(id, stream);
        }
    }
    if sinks.is_empty() {
        log::warn!("graph {} has no sinks to drain", engine.graph_id());
        return;
    }

    tokio::spawn(async move {
        let mut received: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = sinks.next() => {
                    let Some((sink, frame)) = next else { break };
                    received += 1;
                    log_frame(sink, &frame);
                }
            }
        }
        log::info!("sink drain stopped after {} frames", received);
    });
}

fn log_frame(sink: ElementId, frame: &stream_core::frame::Frame) {
    if frame.end_of_stream && frame.is_original() {
        log::info!(
            "sink {}: channel {} finished after {} frames",
            sink,
            frame.stream_id,
            frame.sequence
        );
    } else {
        log::debug!(
            "sink {}: channel {} seq {} sub {:?}",
            sink,
            frame.stream_id,
            frame.sequence,
            frame.lineage
        );
    }
}
