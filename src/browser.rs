//! Thin wrapper over a chromiumoxide browser for the handful of operations a
//! scrape needs: navigate, settle, read outer HTML, take a full screenshot.
//!
//! Each session owns its own browser process; the CDP event handler drains on
//! a background task for the life of the session.

use std::time::Duration;

use anyhow::Context;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tracing::{info, warn};

pub struct BrowserSession {
    browser: Browser,
    handler: tokio::task::JoinHandle<()>,
    page: Page,
}

/// Map a screenshot quality to the capture format: lossless PNG at 100,
/// JPEG below. Quality outside (0, 100] is a caller bug and panics.
fn screenshot_format(quality: u8) -> (CaptureScreenshotFormat, &'static str) {
    if quality == 0 {
        panic!("screenshot quality cannot be 0");
    }

    if quality > 100 {
        panic!("screenshot quality cannot exceed 100");
    }

    if quality < 100 {
        (CaptureScreenshotFormat::Jpeg, "jpeg")
    } else {
        (CaptureScreenshotFormat::Png, "png")
    }
}

impl BrowserSession {
    pub async fn launch(headless: bool) -> anyhow::Result<Self> {
        let mut builder = BrowserConfig::builder();

        if headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        builder = builder
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");

        let config = builder.build().map_err(|err| {
            anyhow::anyhow!(
                "failed to build browser config: {}. Is Chrome/Chromium installed?",
                err
            )
        })?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch browser. Make sure Chrome or Chromium is installed")?;

        let handler = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to open a page")?;

        info!(headless, "browser launched");

        Ok(Self {
            browser,
            handler,
            page,
        })
    }

    pub async fn navigate(&self, url: &str) -> anyhow::Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("failed to navigate to {}", url))?;
        Ok(())
    }

    /// Give client-rendered content time to appear.
    pub async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Outer HTML of the first element matching `selector`.
    pub async fn outer_html(&self, selector: &str) -> anyhow::Result<String> {
        let js = format!(
            "document.querySelector('{}').outerHTML",
            selector.replace('\'', "\\'")
        );

        let result = self
            .page
            .evaluate(js)
            .await
            .with_context(|| format!("failed to read outer html of '{}'", selector))?;

        result
            .into_value::<String>()
            .map_err(|err| anyhow::anyhow!("outer html of '{}' is not a string: {}", selector, err))
    }

    /// Full-page screenshot. Returns the image bytes and their format name.
    pub async fn full_screenshot(&self, quality: u8) -> anyhow::Result<(Vec<u8>, &'static str)> {
        let (format, ext) = screenshot_format(quality);

        let params = if ext == "jpeg" {
            ScreenshotParams::builder()
                .format(format)
                .quality(i64::from(quality))
                .full_page(true)
                .build()
        } else {
            ScreenshotParams::builder().format(format).full_page(true).build()
        };

        let bytes = self
            .page
            .screenshot(params)
            .await
            .context("failed to take a full page screenshot")?;

        Ok((bytes, ext))
    }

    pub async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser cleanly");
        }
        self.handler.abort();
    }
}
