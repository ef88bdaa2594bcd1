use futures::stream::{self, Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::PowerTrackError;
use super::client::PowerTrackApi;
use super::types::{CountBucket, Page, Rule};

/// Caller-side bounds on a result stream, checked between pages. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamLimits {
    pub max_results: Option<u64>,
    pub max_pages: Option<u32>,
}

impl StreamLimits {
    fn reached(&self, pages: u32, results: u64) -> bool {
        self.max_pages.is_some_and(|max| pages >= max)
            || self.max_results.is_some_and(|max| results >= max)
    }

    fn remaining(&self, results: u64) -> usize {
        self.max_results
            .map(|max| usize::try_from(max.saturating_sub(results)).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Default)]
struct Cursor {
    next: Option<String>,
    pages: u32,
    results: u64,
    exhausted: bool,
}

/// Lazily paginates a rule. Consumed by [`ResultStream::stream`], so it cannot be replayed.
pub struct ResultStream<'a, C> {
    api: &'a C,
    rule: &'a Rule,
    limits: StreamLimits,
}

impl<'a, C: PowerTrackApi> ResultStream<'a, C> {
    pub fn new(api: &'a C, rule: &'a Rule, limits: StreamLimits) -> Self {
        Self { api, rule, limits }
    }

    /// Yield records page by page until the server stops returning a `next` cursor or a limit is hit.
    ///
    /// The page that crosses `max_results` is truncated so exactly `max_results` records come out.
    pub fn stream<T: DeserializeOwned + 'a>(
        self,
    ) -> impl Stream<Item = Result<T, PowerTrackError>> + 'a {
        let Self { api, rule, limits } = self;

        stream::try_unfold(Cursor::default(), move |mut cursor| async move {
            if cursor.exhausted || limits.reached(cursor.pages, cursor.results) {
                debug!(
                    pages = cursor.pages,
                    results = cursor.results,
                    "result stream finished"
                );
                return Ok::<_, PowerTrackError>(None);
            }

            let page: Page<T> = api.fetch_page(rule, cursor.next.as_deref()).await?;
            let mut results = page.results;
            results.truncate(limits.remaining(cursor.results));

            cursor.pages += 1;
            cursor.results += results.len() as u64;
            cursor.exhausted = page.next.is_none();
            cursor.next = page.next;

            let records = stream::iter(results.into_iter().map(Ok::<T, PowerTrackError>));
            Ok(Some((records, cursor)))
        })
        .try_flatten()
    }
}

/// Collect every count bucket for a counts rule, in server order.
pub async fn collect_counts<C: PowerTrackApi>(
    api: &C,
    rule: &Rule,
    max_results: Option<u64>,
) -> Result<Vec<CountBucket>, PowerTrackError> {
    let limits = StreamLimits {
        max_results,
        max_pages: None,
    };
    let buckets: Vec<CountBucket> = ResultStream::new(api, rule, limits)
        .stream()
        .try_collect()
        .await?;

    info!(buckets = buckets.len(), "counts collected");
    Ok(buckets)
}
