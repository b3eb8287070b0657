//! The fetch orchestrator: fans seed URLs out to page scrapers under a
//! shared deadline and sample budget, then persists whatever was collected.
//!
//! Three signals race to end a session: the `maxRuntime` deadline, the
//! sample budget, and all URL jobs draining. Whichever fires first cancels
//! the parent token; the main loop falls through to persistence and returns
//! normally.

mod page;
mod prompts;

pub use page::{CapturedPage, ChromePageSource, PageSource};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{FetchOptions, LlmOptions, Settings};
use crate::providers::ChatEngine;
use crate::salvage::Sample;

/// Run a fetch session to completion and return the path of the written
/// artifact.
///
/// Persistence always happens: every exit path below runs through
/// [`write_samples`], whether the session ended by deadline, by budget, or
/// by running out of URLs.
pub async fn collect(
    engine: Arc<dyn ChatEngine>,
    source: Arc<dyn PageSource>,
    options: LlmOptions,
    fetch: FetchOptions,
    settings: &Settings,
) -> anyhow::Result<PathBuf> {
    info!(session = %settings.session_name, urls = fetch.urls.len(), "started fetch session");

    let cancel = CancellationToken::new();
    let samples: Arc<Mutex<Vec<Sample>>> =
        Arc::new(Mutex::new(Vec::with_capacity(usize::from(fetch.max_samples))));

    let deadline = cancel.clone();
    let max_runtime = u64::from(fetch.max_runtime);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(max_runtime)).await;
        info!("session deadline reached, cancelling");
        deadline.cancel();
    });

    let (url_tx, mut url_rx) = mpsc::channel::<String>(usize::from(fetch.workers));
    let seeds = fetch.urls.clone();
    let seed_count = seeds.len();
    tokio::spawn(async move {
        for url in seeds {
            if url_tx.send(url).await.is_err() {
                break;
            }
        }
    });

    let (done_tx, mut done_rx) = mpsc::channel::<()>(seed_count.max(1));
    let harvest = cancel.clone();
    tokio::spawn(async move {
        for _ in 0..seed_count {
            if done_rx.recv().await.is_none() {
                return;
            }
        }
        info!("all url jobs finished, cancelling");
        harvest.cancel();
    });

    let watcher = cancel.clone();
    let watched = samples.clone();
    let budget = usize::from(fetch.max_samples);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                _ = watcher.cancelled() => return,
                _ = ticker.tick() => {
                    if watched.lock().await.len() >= budget {
                        info!("sample budget satisfied, cancelling");
                        watcher.cancel();
                        return;
                    }
                }
            }
        }
    });

    let template_json = Arc::new(
        serde_json::to_string_pretty(&fetch.example_template)
            .context("failed to encode the example template")?,
    );
    let fetch = Arc::new(fetch);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = url_rx.recv() => match received {
                Some(url) => {
                    info!(url = %url, "fetching data from url");

                    let child = cancel.child_token();
                    let source = source.clone();
                    let engine = engine.clone();
                    let fetch = fetch.clone();
                    let template_json = template_json.clone();
                    let samples = samples.clone();
                    let done_tx = done_tx.clone();

                    tokio::spawn(async move {
                        let result = page::scrape_url(
                            child,
                            source,
                            engine,
                            options,
                            fetch,
                            template_json,
                            url.clone(),
                            samples,
                        )
                        .await;

                        if let Err(err) = result {
                            warn!(url = %url, error = %err, "received non critical error from scrape session");
                        }

                        let _ = done_tx.send(()).await;
                    });
                }
                None => {
                    cancel.cancelled().await;
                    break;
                }
            }
        }
    }

    let samples = samples.lock().await;
    let path = write_samples(&samples, &fetch.save_path, &settings.session_name)?;
    info!(path = %path.display(), samples = samples.len(), "fetch session finished");

    Ok(path)
}

/// Serialize the sample slice as pretty-printed JSON with four-space indent
/// to `<save_path>/<session_name>-fetched.json`, mode 0777.
fn write_samples(samples: &[Sample], save_path: &Path, session_name: &str) -> anyhow::Result<PathBuf> {
    let path = save_path.join(format!("{}-fetched.json", session_name));

    let mut encoded = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut encoded, formatter);
    samples
        .serialize(&mut serializer)
        .context("failed to encode the collected samples")?;

    std::fs::write(&path, &encoded)
        .with_context(|| format!("failed to write samples to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(path)
}
