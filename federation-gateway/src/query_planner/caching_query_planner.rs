use std::sync::Arc;

use tracing::Instrument;

use super::NormalizedOperation;
use super::QueryPlan;
use super::QueryPlanner;
use crate::cache::DedupCache;
use crate::error::PlanningError;

/// The default number of plans kept in memory.
pub const DEFAULT_CACHE_LIMIT: usize = 512;

type PlanResult = Result<Arc<QueryPlan>, PlanningError>;

/// A query planner wrapper that caches results.
///
/// Plans are keyed by the signature of the normalized operation, so queries
/// differing only in formatting or fragment layout share a plan. Planning
/// errors are cached too. Concurrent requests for the same signature wait
/// for a single planning run.
#[derive(Clone)]
pub struct CachingQueryPlanner {
    cache: Arc<DedupCache<String, PlanResult>>,
    delegate: QueryPlanner,
}

impl CachingQueryPlanner {
    /// Creates a new query planner that caches the results of another [`QueryPlanner`].
    pub fn new(delegate: QueryPlanner, cache_limit: usize) -> CachingQueryPlanner {
        CachingQueryPlanner {
            cache: Arc::new(DedupCache::new(cache_limit)),
            delegate,
        }
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.delegate
    }

    pub async fn plan(&self, query: &str, operation_name: Option<&str>) -> PlanResult {
        let operation =
            NormalizedOperation::parse(self.delegate.supergraph(), query, operation_name)?;
        let key = operation.signature();
        let span = tracing::debug_span!("plan_cache", signature = %key);
        self.plan_with_key(key, operation).instrument(span).await
    }

    async fn plan_with_key(&self, key: String, operation: NormalizedOperation) -> PlanResult {
        loop {
            let entry = self.cache.get(key.clone()).await;
            if entry.is_first() {
                tracing::debug!("plan cache miss");
                let result = self.delegate.plan_operation(operation).map(Arc::new);
                entry.insert(result.clone()).await;
                return result;
            }
            // `None` means the planning run we waited on was abandoned
            if let Some(result) = entry.get().await {
                tracing::trace!("plan cache hit");
                return result;
            }
        }
    }
}
