//! Runs the requested engines concurrently over one document.

use crate::ocr::{Document, EngineResult, EngineResults, OcrEngine};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Aborts every task it still holds when dropped, so cancelling the caller
/// cancels in-flight engines.
struct AbortOnDrop(Vec<JoinHandle<EngineResult>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Run every engine on its own task and collect results in request order.
///
/// Always returns one entry per engine. A task that panics or is aborted is
/// reported as a `Failed` result for that engine.
pub async fn run_engines(
    engines: &[Arc<dyn OcrEngine>],
    document: Arc<Document>,
    language: &str,
) -> EngineResults {
    let mut tasks = AbortOnDrop(Vec::with_capacity(engines.len()));
    for engine in engines {
        let engine = Arc::clone(engine);
        let document = Arc::clone(&document);
        let language = language.to_string();
        tasks.0.push(tokio::spawn(async move {
            engine.run(&document, &language).await
        }));
    }

    debug!("Runner: {} engines started for {}", engines.len(), document.filename);

    let mut results = EngineResults::new();
    for (engine, handle) in engines.iter().zip(tasks.0.iter_mut()) {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!("Runner: engine {} task did not complete: {}", engine.name(), e);
                EngineResult::failed(
                    engine.name(),
                    language,
                    format!("Engine task did not complete: {}", e),
                )
            }
        };
        results.insert(result);
    }

    results
}
