//! Sliding-window reassembly of out-of-order chunk fetches.
//!
//! Chunks are fetched (and decrypted) in parallel, up to `window` at a time,
//! and may complete in any order. Output is strictly ascending by chunk
//! index. Every chunk that has been started but not yet emitted counts
//! against the window, whether it is still in flight or parked in the
//! reorder buffer, so at most `window` chunks of plaintext are ever held.

use std::collections::BTreeMap;
use std::future::Future;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use relaycrypt_core::{TransferError, TransferResult};

type Fetch<'a> = BoxFuture<'a, (u32, TransferResult<Bytes>)>;

pub struct ReorderingAssembler<'a, F> {
    fetch: F,
    total_chunks: u32,
    window: u32,
    next_fetch: u32,
    next_yield: u32,
    buffer: BTreeMap<u32, Bytes>,
    in_flight: FuturesUnordered<Fetch<'a>>,
    done: bool,
}

impl<'a, F, Fut> ReorderingAssembler<'a, F>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = TransferResult<Bytes>> + Send + 'a,
{
    /// `fetch(i)` must yield the plaintext of chunk `i`. A window of 0 is
    /// treated as 1.
    pub fn new(total_chunks: u32, window: usize, fetch: F) -> Self {
        Self {
            fetch,
            total_chunks,
            window: u32::try_from(window.max(1)).unwrap_or(u32::MAX),
            next_fetch: 0,
            next_yield: 0,
            buffer: BTreeMap::new(),
            in_flight: FuturesUnordered::new(),
            done: false,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Index of the next chunk to be emitted.
    pub fn next_yield(&self) -> u32 {
        self.next_yield
    }

    /// Chunks that arrived ahead of `next_yield`.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn fill_window(&mut self) {
        while self.next_fetch < self.total_chunks && self.next_fetch - self.next_yield < self.window
        {
            let index = self.next_fetch;
            let fut = (self.fetch)(index);
            self.in_flight.push(Box::pin(async move { (index, fut.await) }));
            self.next_fetch += 1;
        }
    }

    /// Next chunk in index order, `None` once every chunk has been emitted.
    ///
    /// The first fetch failure is returned once and ends the stream; chunks
    /// still in flight are dropped.
    pub async fn next_chunk(&mut self) -> Option<TransferResult<Bytes>> {
        loop {
            if self.done || self.next_yield >= self.total_chunks {
                self.done = true;
                return None;
            }

            if let Some(chunk) = self.buffer.remove(&self.next_yield) {
                self.next_yield += 1;
                return Some(Ok(chunk));
            }

            self.fill_window();

            match self.in_flight.next().await {
                Some((index, Ok(chunk))) => {
                    self.buffer.insert(index, chunk);
                }
                Some((_, Err(err))) => return Some(Err(self.fail(err))),
                None => {
                    let err = TransferError::Protocol(format!(
                        "chunk {} never arrived",
                        self.next_yield
                    ));
                    return Some(Err(self.fail(err)));
                }
            }
        }
    }

    fn fail(&mut self, err: TransferError) -> TransferError {
        self.done = true;
        self.buffer.clear();
        self.in_flight.clear();
        err
    }

    pub fn into_stream(self) -> impl Stream<Item = TransferResult<Bytes>> + 'a
    where
        F: 'a,
    {
        futures::stream::unfold(self, |mut assembler| async move {
            let item = assembler.next_chunk().await?;
            Some((item, assembler))
        })
    }
}

impl<F> std::fmt::Debug for ReorderingAssembler<'_, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReorderingAssembler")
            .field("total_chunks", &self.total_chunks)
            .field("window", &self.window)
            .field("next_fetch", &self.next_fetch)
            .field("next_yield", &self.next_yield)
            .field("buffered", &self.buffer.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn chunk(i: u32) -> Bytes {
        Bytes::from(i.to_be_bytes().to_vec())
    }

    fn delayed(i: u32, delay_ms: u64) -> impl Future<Output = TransferResult<Bytes>> + Send {
        async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(chunk(i))
        }
    }

    #[tokio::test]
    async fn zero_chunks_end_immediately() {
        let mut assembler =
            ReorderingAssembler::new(0, 4, |i| async move { Ok::<_, TransferError>(chunk(i)) });
        assert!(assembler.next_chunk().await.is_none());
        assert!(assembler.next_chunk().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reverse_arrival_is_reordered() {
        let delays = [50u64, 40, 30, 20, 10];
        let mut assembler = ReorderingAssembler::new(5, 5, |i| delayed(i, delays[i as usize]));

        let mut out = Vec::new();
        while let Some(item) = assembler.next_chunk().await {
            out.push(item.unwrap());
        }
        assert_eq!(out, (0..5).map(chunk).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn short_circuits_on_awaited_chunk() {
        // chunk 0 lands first while 1 is still slow; 0 must be emitted
        // without waiting for 1
        let delays = [5u64, 1_000, 10];
        let mut assembler = ReorderingAssembler::new(3, 3, |i| delayed(i, delays[i as usize]));

        let started = tokio::time::Instant::now();
        assert_eq!(assembler.next_chunk().await.unwrap().unwrap(), chunk(0));
        assert_eq!(started.elapsed(), Duration::from_millis(5));
        assert_eq!(assembler.in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_fatal_and_fuses() {
        let mut assembler = ReorderingAssembler::new(4, 2, |i| async move {
            if i == 1 {
                Err(TransferError::Integrity("tag mismatch".into()))
            } else {
                Ok(chunk(i))
            }
        });

        let mut ok = 0;
        let mut errors = 0;
        while let Some(item) = assembler.next_chunk().await {
            match item {
                Ok(_) => ok += 1,
                Err(err) => {
                    assert!(matches!(err, TransferError::Integrity(_)));
                    errors += 1;
                }
            }
        }
        assert_eq!(errors, 1);
        assert!(ok <= 1, "nothing past the failed chunk may be emitted");
        assert_eq!(assembler.in_flight(), 0);
        assert_eq!(assembler.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_adapter_yields_in_order() {
        let stream =
            ReorderingAssembler::new(4, 2, |i| delayed(i, 10 * u64::from(4 - i))).into_stream();
        let out: Vec<Bytes> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(out, (0..4).map(chunk).collect::<Vec<_>>());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn ordered_and_window_bounded(
            delays in proptest::collection::vec(0u64..50, 0..40),
            window in 1usize..6,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let total = delays.len() as u32;
            let started = Arc::new(AtomicUsize::new(0));
            let emitted = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));

            let out = rt.block_on({
                let started = started.clone();
                let emitted = emitted.clone();
                let peak = peak.clone();
                let delays = delays.clone();
                async move {
                    let mut assembler = ReorderingAssembler::new(total, window, |i| {
                        let outstanding = started.fetch_add(1, Ordering::SeqCst) + 1
                            - emitted.load(Ordering::SeqCst);
                        peak.fetch_max(outstanding, Ordering::SeqCst);
                        delayed(i, delays[i as usize])
                    });
                    let mut out = Vec::new();
                    while let Some(item) = assembler.next_chunk().await {
                        out.push(item.unwrap());
                        emitted.fetch_add(1, Ordering::SeqCst);
                        prop_assert!(assembler.buffered() <= window);
                    }
                    Ok::<_, TestCaseError>(out)
                }
            })?;

            prop_assert_eq!(out, (0..total).map(chunk).collect::<Vec<_>>());
            prop_assert_eq!(started.load(Ordering::SeqCst), delays.len());
            prop_assert!(peak.load(Ordering::SeqCst) <= window);
        }
    }
}
