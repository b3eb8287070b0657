//! The retry/timeout wrapper around a single chat call.
//!
//! Two budgets apply at once: the per-attempt deadline passed in here, and
//! the session-wide deadline carried by the parent cancellation token. Rate
//! limits and attempt timeouts are transient and snooze with doubling
//! backoff; every other failure is deterministic — retrying cannot change
//! the outcome — and returns immediately.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::conversation::{AssistantTurn, Conversation};
use crate::providers::ChatEngine;

/// Issue one logical chat request with up to `try_limit` attempts of
/// `attempt_secs` seconds each.
///
/// Each attempt races three events: the call resolving, the per-attempt
/// deadline, and the parent token. The snooze between attempt `i` and the
/// next is `2^i` seconds, skipped after the final attempt; the snooze itself
/// also yields to the parent token so a session deadline is never overshot.
pub async fn chat_with_backoff(
    cancel: &CancellationToken,
    engine: &dyn ChatEngine,
    attempt_secs: u16,
    try_limit: u8,
    conversation: &Conversation,
) -> anyhow::Result<AssistantTurn> {
    for attempt in 0..try_limit {
        info!(attempt, "executing chat request");

        tokio::select! {
            result = engine.chat(conversation) => match result {
                Ok(turn) => {
                    info!(attempt, "chat response received");
                    return Ok(turn);
                }
                Err(err) if err.is_rate_limit() => {
                    info!(attempt, "rate limit hit, snoozing");
                    if !snooze(cancel, attempt, try_limit).await {
                        anyhow::bail!("chat request cancelled by the session deadline");
                    }
                }
                Err(err) => {
                    warn!(attempt, error = %err, "chat request failed, not retrying");
                    return Err(err.into());
                }
            },
            _ = tokio::time::sleep(Duration::from_secs(u64::from(attempt_secs))) => {
                info!(attempt, "attempt deadline hit, snoozing");
                if !snooze(cancel, attempt, try_limit).await {
                    anyhow::bail!("chat request cancelled by the session deadline");
                }
            }
            _ = cancel.cancelled() => {
                info!("session deadline hit, cancelling chat request");
                anyhow::bail!("chat request cancelled by the session deadline");
            }
        }
    }

    warn!("try limit reached, chat request has failed");
    anyhow::bail!("reached the try limit for the chat request")
}

/// Sleep `2^attempt` seconds, skipped after the final attempt. Returns false
/// when the parent token fired during the sleep.
async fn snooze(cancel: &CancellationToken, attempt: u8, try_limit: u8) -> bool {
    if attempt + 1 >= try_limit {
        return true;
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(2u64.pow(u32::from(attempt)))) => true,
        _ = cancel.cancelled() => false,
    }
}
