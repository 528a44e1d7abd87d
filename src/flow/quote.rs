use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::{Address, U256};
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::repository::LedgerRepository;

/// Router quote for one `(token_in, token_out, amount_in)` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteResult {
    /// Request number; later requests supersede earlier ones.
    pub generation: u64,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    /// `None` when there is no quote: zero input, no liquidity, or a failed read.
    pub amount_out: Option<U256>,
}

/// Keeps the latest swap quote, last write wins.
///
/// Each `request` aborts the one in flight and only a result whose generation is still
/// current gets published, so a slow answer to an old input can never overwrite the
/// answer to a newer one.
#[derive(Clone)]
pub struct QuoteRefresher {
    inner: Arc<QuoteInner>,
}

struct QuoteInner {
    ledger: Arc<dyn LedgerRepository>,
    router: Address,
    generation: AtomicU64,
    latest: watch::Sender<QuoteResult>,
    in_flight: Mutex<Option<AbortHandle>>,
}

impl QuoteInner {
    fn publish(&self, result: QuoteResult) -> bool {
        self.latest.send_if_modified(|current| {
            if result.generation != self.generation.load(Ordering::SeqCst)
                || result.generation < current.generation
            {
                return false;
            }
            *current = result;
            true
        })
    }

    fn supersede(&self) -> u64 {
        if let Some(task) = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl QuoteRefresher {
    pub fn new(ledger: Arc<dyn LedgerRepository>, router: Address) -> Self {
        let (latest, _) = watch::channel(QuoteResult::default());
        Self {
            inner: Arc::new(QuoteInner {
                ledger,
                router,
                generation: AtomicU64::new(0),
                latest,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Starts a quote and returns its generation. Must be called within a Tokio runtime.
    pub fn request(&self, token_in: Address, token_out: Address, amount_in: U256) -> u64 {
        let generation = self.inner.supersede();

        let mut result = QuoteResult {
            generation,
            token_in,
            token_out,
            amount_in,
            amount_out: None,
        };

        if amount_in.is_zero() {
            self.inner.publish(result);
            return generation;
        }

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let path = vec![token_in, token_out];
            result.amount_out = match inner.ledger.amounts_out(inner.router, amount_in, path).await {
                Ok(amounts) => amounts.last().copied().filter(|out| !out.is_zero()),
                Err(e) => {
                    tracing::warn!("Quote {} failed: {}", generation, e);
                    None
                }
            };

            if !inner.publish(result) {
                tracing::debug!("Quote {} superseded, discarding", generation);
            }
        });

        *self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());

        generation
    }

    pub fn latest(&self) -> QuoteResult {
        self.inner.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QuoteResult> {
        self.inner.latest.subscribe()
    }

    /// Waits until `generation` (or a newer request) has been published.
    pub async fn wait_for(&self, generation: u64) -> QuoteResult {
        let mut rx = self.inner.latest.subscribe();
        match rx.wait_for(|q| q.generation >= generation).await {
            Ok(result) => result.clone(),
            Err(_) => self.latest(),
        }
    }

    /// Drops the current quote and anything in flight.
    pub fn clear(&self) {
        let generation = self.inner.supersede();
        self.inner.publish(QuoteResult {
            generation,
            ..QuoteResult::default()
        });
    }
}
