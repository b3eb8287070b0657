//! Per-URL scraping: capture the rendered page, chunk it, and turn the
//! chunks into samples through the prompt pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::browser::BrowserSession;
use crate::chunk::split_by_len;
use crate::config::{FetchOptions, LlmOptions};
use crate::conversation::{ConversationBuilder, StandardTurn};
use crate::fetch::prompts::prompt_pool;
use crate::providers::ChatEngine;
use crate::salvage::Sample;

/// HTML is chunked at this many code points per prompt.
pub(crate) const CHUNK_LEN: usize = 160_000;

const SYSTEM_PROMPT: &str = "you are an expert webscraper specialized in collecting html data";

/// How long to let client-rendered content settle after navigation.
const SETTLE_TIME: Duration = Duration::from_secs(5);

/// What one page visit yields: the rendered HTML and a full-page screenshot.
pub struct CapturedPage {
    pub html: String,
    pub screenshot: Vec<u8>,
    pub screenshot_format: &'static str,
}

/// The capture side of a scrape. The production implementation drives a
/// browser; tests substitute canned pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn capture(&self, url: &str) -> anyhow::Result<CapturedPage>;
}

/// Captures pages with a fresh Chromium instance per URL.
pub struct ChromePageSource {
    pub headless: bool,
}

#[async_trait]
impl PageSource for ChromePageSource {
    async fn capture(&self, url: &str) -> anyhow::Result<CapturedPage> {
        let session = BrowserSession::launch(self.headless).await?;

        let captured = async {
            session.navigate(url).await?;
            session.settle(SETTLE_TIME).await;

            let html = session.outer_html("body").await?;
            let (screenshot, screenshot_format) = session.full_screenshot(100).await?;

            Ok(CapturedPage {
                html,
                screenshot,
                screenshot_format,
            })
        }
        .await;

        session.close().await;
        captured
    }
}

/// Scrape one URL: capture, chunk, prompt, and append the results to the
/// shared sample slice under its lock.
///
/// The child token cancels the capture mid-flight and reaches every chat
/// attempt through the governor.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn scrape_url(
    cancel: CancellationToken,
    source: Arc<dyn PageSource>,
    engine: Arc<dyn ChatEngine>,
    options: LlmOptions,
    fetch: Arc<FetchOptions>,
    template_json: Arc<String>,
    url: String,
    samples: Arc<Mutex<Vec<Sample>>>,
) -> anyhow::Result<()> {
    let captured = tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("scrape of {} cancelled", url),
        result = source.capture(&url) => result?,
    };

    debug!(
        url = %url,
        html_chars = captured.html.chars().count(),
        screenshot_bytes = captured.screenshot.len(),
        format = captured.screenshot_format,
        "captured page context"
    );

    let chunks = if captured.html.chars().count() < CHUNK_LEN {
        vec![captured.html]
    } else {
        split_by_len(&captured.html, CHUNK_LEN)
    };

    let mut builder = ConversationBuilder::new();
    builder.add_standard(StandardTurn::new("system", SYSTEM_PROMPT));

    let collected = prompt_pool(
        &cancel,
        engine,
        options,
        &fetch.task,
        &template_json,
        &builder,
        chunks,
    )
    .await;

    info!(url = %url, samples = collected.len(), "finished collecting page data");

    let mut guard = samples.lock().await;
    guard.extend(collected);

    Ok(())
}
