//! Batch Executor (§4.5): a bounded worker pool that drives every proxy
//! endpoint through the protocol-appropriate probe, enriches the outcome,
//! and delivers one `ProbeResult` per attempt to a channel.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, Semaphore};

use crate::enrich::{enrich_http, enrich_udp};
use crate::model::{BatchConfig, LoopMode, ProbeResult, ProxyEndpoint, TargetSpec, Transport};
use crate::probe_http::probe_http;
use crate::probe_udp::probe_udp;

/// Spawns the whole batch in the background and returns a receiver that
/// yields exactly `total_attempts` Results, in completion order (§4.5,
/// §5). `total_attempts` is handed back so the caller — the Aggregator in
/// practice — knows how many sends to expect without racing channel
/// closure.
pub fn spawn_batch(endpoints: Vec<ProxyEndpoint>, config: BatchConfig) -> (mpsc::Receiver<ProbeResult>, usize) {
    let pass_count = config.loop_mode.pass_count() as usize;
    let total_attempts = endpoints.len() * pass_count.max(1);
    let (tx, rx) = mpsc::channel(total_attempts.max(1));

    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        match config.loop_mode {
            LoopMode::Single => {
                let items: Vec<(u32, ProxyEndpoint)> =
                    endpoints.into_iter().map(|e| (0, e)).collect();
                dispatch_pass(items, &config.target, config.timeout, config.transport, &semaphore, &tx).await;
            }
            LoopMode::Flatten { count } => {
                // "concatenate the input list loop times into one large
                // pass" (§4.5) — concurrency is bounded globally, not
                // per-repetition.
                let mut items = Vec::with_capacity(endpoints.len() * count as usize);
                for loop_index in 0..count {
                    items.extend(endpoints.iter().cloned().map(|e| (loop_index, e)));
                }
                dispatch_pass(items, &config.target, config.timeout, config.transport, &semaphore, &tx).await;
            }
            LoopMode::Intervaled { count, interval } => {
                for loop_index in 0..count {
                    let items: Vec<(u32, ProxyEndpoint)> =
                        endpoints.iter().cloned().map(|e| (loop_index, e)).collect();
                    dispatch_pass(items, &config.target, config.timeout, config.transport, &semaphore, &tx).await;
                    if loop_index + 1 < count {
                        tokio::time::sleep(interval).await;
                    }
                }
            }
        }
    });

    (rx, total_attempts)
}

/// Runs one pass over `items`, bounded by `semaphore`, and waits for every
/// worker in the pass to finish before returning — the barrier that makes
/// `Intervaled` loop boundaries strictly ordered (§5).
async fn dispatch_pass(
    items: Vec<(u32, ProxyEndpoint)>,
    target: &TargetSpec,
    timeout: Duration,
    transport: Transport,
    semaphore: &Arc<Semaphore>,
    tx: &mpsc::Sender<ProbeResult>,
) {
    let mut futs = FuturesUnordered::new();
    for (loop_index, endpoint) in items {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closed");
        let target = target.clone();
        let tx = tx.clone();
        futs.push(tokio::spawn(async move {
            let _permit = permit;
            let mut result = match transport {
                Transport::Tcp => probe_http(&endpoint, &target, timeout).await,
                Transport::Udp => probe_udp(&endpoint, &target, timeout).await,
            };
            result.loop_index = loop_index;
            match transport {
                Transport::Tcp => enrich_http(&mut result),
                Transport::Udp => enrich_udp(&mut result),
            }
            // Receiver side controls the channel's lifetime; if it's gone
            // the batch is being abandoned and there's nothing else to do.
            let _ = tx.send(result).await;
        }));
    }
    while futs.next().await.is_some() {}
}
