//! Candidate pools
//!
//! Four independent gatherers run concurrently each discovery cycle:
//! 1. **library** - the participant's liked songs, genres back-filled on the fly
//! 2. **similar** - related tracks seeded from liked songs
//! 3. **artist** - top tracks of preferred artists, resolved to playable ids
//! 4. **wildcard** - regional charts, or a generic popularity search
//!
//! A pool that fails or times out contributes nothing; the others carry on.

pub mod artist;
pub mod library;
pub mod similar;
pub mod wildcard;

pub use artist::ArtistPool;
pub use library::LibraryPool;
pub use similar::SimilarPool;
pub use wildcard::WildcardPool;

use async_trait::async_trait;
use cadence_common::models::{ChannelId, DiscoverySource, ParticipantId};
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::candidate::SongCandidate;
use crate::engine::SourceWeights;

/// What a pool needs to know about the current cycle
#[derive(Debug, Clone)]
pub struct PoolContext {
    pub channel: ChannelId,
    /// Participant whose turn it is
    pub user: ParticipantId,
    /// Content ids that must not be proposed
    pub exclude: Arc<HashSet<String>>,
    /// Upper bound on candidates per pool
    pub limit: usize,
}

impl PoolContext {
    pub fn is_excluded(&self, content_id: &str) -> bool {
        self.exclude.contains(content_id)
    }
}

/// One source of discovery candidates
#[async_trait]
pub trait CandidatePool: Send + Sync {
    fn source(&self) -> DiscoverySource;

    async fn gather(&self, ctx: &PoolContext) -> anyhow::Result<Vec<SongCandidate>>;
}

/// Candidates produced by one pool
#[derive(Debug, Clone)]
pub struct PoolOutput {
    pub source: DiscoverySource,
    pub candidates: Vec<SongCandidate>,
}

/// Runs every enabled pool concurrently with per-pool error isolation
pub struct PoolGatherer {
    pools: Vec<Arc<dyn CandidatePool>>,
    timeout: Duration,
}

impl PoolGatherer {
    pub fn new(pools: Vec<Arc<dyn CandidatePool>>, timeout: Duration) -> Self {
        Self { pools, timeout }
    }

    /// Gather from every pool whose weight is positive
    ///
    /// Disabled pools are not called at all. Failed and timed-out pools are logged
    /// and omitted from the result.
    pub async fn gather_all(&self, ctx: &PoolContext, weights: &SourceWeights) -> Vec<PoolOutput> {
        let futures = self
            .pools
            .iter()
            .filter(|pool| weights.is_enabled(pool.source()))
            .map(|pool| {
                let pool = Arc::clone(pool);
                let timeout = self.timeout;
                async move {
                    let source = pool.source();
                    let start = Instant::now();
                    match tokio::time::timeout(timeout, pool.gather(ctx)).await {
                        Ok(Ok(mut candidates)) => {
                            candidates.truncate(ctx.limit);
                            debug!(
                                pool = %source,
                                channel_id = %ctx.channel,
                                count = candidates.len(),
                                elapsed_ms = start.elapsed().as_millis() as u64,
                                "Pool gathered candidates"
                            );
                            Some(PoolOutput { source, candidates })
                        }
                        Ok(Err(e)) => {
                            warn!(
                                pool = %source,
                                channel_id = %ctx.channel,
                                error = %e,
                                "Pool failed, continuing without it"
                            );
                            None
                        }
                        Err(_) => {
                            warn!(
                                pool = %source,
                                channel_id = %ctx.channel,
                                timeout_ms = timeout.as_millis() as u64,
                                "Pool timed out, continuing without it"
                            );
                            None
                        }
                    }
                }
            });

        join_all(futures).await.into_iter().flatten().collect()
    }

    pub fn count(&self) -> usize {
        self.pools.len()
    }
}

/// Up to `n` distinct items chosen uniformly at random
pub(crate) fn sample<T: Clone>(items: &[T], n: usize) -> Vec<T> {
    let mut rng = rand::thread_rng();
    items.choose_multiple(&mut rng, n).cloned().collect()
}

/// One item chosen uniformly at random
pub(crate) fn pick<T: Clone>(items: &[T]) -> Option<T> {
    let mut rng = rand::thread_rng();
    items.choose(&mut rng).cloned()
}

#[cfg(test)]
pub mod mock {
    use super::*;

    /// Pool returning fixed candidates, failing, or hanging
    pub struct MockPool {
        pub source: DiscoverySource,
        pub ids: Vec<&'static str>,
        pub should_fail: bool,
        pub hang: bool,
    }

    impl MockPool {
        pub fn new(source: DiscoverySource, ids: Vec<&'static str>) -> Self {
            Self {
                source,
                ids,
                should_fail: false,
                hang: false,
            }
        }

        pub fn failing(source: DiscoverySource) -> Self {
            Self {
                should_fail: true,
                ..Self::new(source, vec![])
            }
        }

        pub fn hanging(source: DiscoverySource) -> Self {
            Self {
                hang: true,
                ..Self::new(source, vec![])
            }
        }
    }

    #[async_trait]
    impl CandidatePool for MockPool {
        fn source(&self) -> DiscoverySource {
            self.source
        }

        async fn gather(&self, _ctx: &PoolContext) -> anyhow::Result<Vec<SongCandidate>> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.should_fail {
                anyhow::bail!("mock pool failure");
            }
            Ok(self
                .ids
                .iter()
                .map(|id| {
                    SongCandidate::new(*id, *id, "Mock Artist", self.source, self.source.as_str(), vec![], None, 0.5)
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockPool;
    use super::*;

    fn ctx() -> PoolContext {
        PoolContext {
            channel: ChannelId(1),
            user: ParticipantId(1),
            exclude: Arc::new(HashSet::new()),
            limit: 20,
        }
    }

    #[tokio::test]
    async fn test_gather_all_isolates_failures() {
        let gatherer = PoolGatherer::new(
            vec![
                Arc::new(MockPool::new(DiscoverySource::Library, vec!["a", "b"])),
                Arc::new(MockPool::failing(DiscoverySource::Similar)),
                Arc::new(MockPool::hanging(DiscoverySource::Artist)),
                Arc::new(MockPool::new(DiscoverySource::Wildcard, vec!["c"])),
            ],
            Duration::from_millis(50),
        );

        let outputs = gatherer.gather_all(&ctx(), &SourceWeights::default()).await;
        let sources: Vec<_> = outputs.iter().map(|o| o.source).collect();
        assert_eq!(sources, vec![DiscoverySource::Library, DiscoverySource::Wildcard]);
        assert_eq!(outputs.iter().map(|o| o.candidates.len()).sum::<usize>(), 3);
    }

    #[tokio::test]
    async fn test_zero_weight_pool_is_skipped() {
        let gatherer = PoolGatherer::new(
            vec![
                Arc::new(MockPool::hanging(DiscoverySource::Library)),
                Arc::new(MockPool::new(DiscoverySource::Similar, vec!["s"])),
            ],
            Duration::from_secs(30),
        );
        let weights = SourceWeights {
            library: 0,
            ..SourceWeights::default()
        };

        let start = Instant::now();
        let outputs = gatherer.gather_all(&ctx(), &weights).await;
        assert!(start.elapsed() < Duration::from_secs(5), "disabled pool must not be awaited");
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].source, DiscoverySource::Similar);
    }

    #[tokio::test]
    async fn test_limit_truncates_pool_output() {
        let gatherer = PoolGatherer::new(
            vec![Arc::new(MockPool::new(DiscoverySource::Wildcard, vec!["a", "b", "c", "d"]))],
            Duration::from_secs(1),
        );
        let mut context = ctx();
        context.limit = 2;
        let outputs = gatherer.gather_all(&context, &SourceWeights::default()).await;
        assert_eq!(outputs[0].candidates.len(), 2);
    }

    #[test]
    fn test_sample_never_exceeds_input() {
        let items = vec![1, 2, 3];
        assert_eq!(sample(&items, 2).len(), 2);
        assert_eq!(sample(&items, 10).len(), 3);
        assert!(pick::<i32>(&[]).is_none());
    }
}
