//! The collection prompt and the bounded fan-out of chunked prompts.
//!
//! One captured page becomes many chat requests, one per HTML chunk. A
//! semaphore caps how many are in flight; every request flows through the
//! governor; responses are salvage-parsed into samples as they drain.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::LlmOptions;
use crate::conversation::{ConversationBuilder, StandardTurn};
use crate::governor::chat_with_backoff;
use crate::providers::ChatEngine;
use crate::salvage::{salvage, Sample};

static COLLECT_PROMPT: &str = include_str!("prompts/collect.txt");

/// Render the embedded collection prompt. The HTML lands last so page
/// content can never clobber the other slots.
fn render_collection_prompt(html: &str, task: &str, template: &str) -> String {
    COLLECT_PROMPT
        .replacen("{{task}}", task, 1)
        .replacen("{{template}}", template, 1)
        .replacen("{{html}}", html, 1)
}

/// Issue one chat request per chunk under a concurrency cap of
/// `options.workers` and return every salvaged sample.
///
/// Each chunk gets a clone of `base` with the rendered collection prompt as
/// its final turn. A conversation that fails to build or fails engine
/// validation here is a bug in the prompt plumbing and panics. Failed chunk
/// requests are logged and dropped; their siblings continue.
pub(crate) async fn prompt_pool(
    cancel: &CancellationToken,
    engine: Arc<dyn ChatEngine>,
    options: LlmOptions,
    task: &str,
    template: &str,
    base: &ConversationBuilder,
    chunks: Vec<String>,
) -> Vec<Sample> {
    let semaphore = Arc::new(Semaphore::new(usize::from(options.workers)));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();

    for (index, chunk) in chunks.into_iter().enumerate() {
        let mut builder = base.clone();
        builder.add_standard(StandardTurn::new(
            "user",
            render_collection_prompt(&chunk, task, template),
        ));

        let conversation = match builder.build() {
            Ok(conversation) => conversation,
            Err(err) => panic!("collection prompt conversation failed to build: {}", err),
        };

        if let Err(err) = engine.validate(&conversation) {
            panic!("collection prompt conversation failed engine validation: {}", err);
        }

        let engine = engine.clone();
        let semaphore = semaphore.clone();
        let result_tx = result_tx.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let result = chat_with_backoff(
                &cancel,
                engine.as_ref(),
                options.request_duration,
                options.try_limit,
                &conversation,
            )
            .await;

            let _ = result_tx.send((index, permit, result));
        });
    }

    // the workers hold the remaining senders; the channel closes when the
    // last one finishes
    drop(result_tx);

    let mut samples = Vec::new();

    // the permit rides along with its result and frees a pool slot once the
    // result has been drained here
    while let Some((index, _permit, result)) = result_rx.recv().await {
        match result {
            Ok(turn) => {
                let content = turn.content.unwrap_or_default();
                let parsed = salvage(&content);
                if parsed.is_empty() {
                    info!(chunk = index, "salvage found no records in the response");
                } else {
                    info!(chunk = index, records = parsed.len(), "salvaged records from the response");
                }
                samples.extend(parsed);
            }
            Err(err) => {
                warn!(chunk = index, error = %err, "chunk request failed");
            }
        }
    }

    samples
}
