//! Memoizing planner wrapper keyed by problem fingerprint.

use super::{Planner, PlannerResponse};
use crate::compiler::CompiledProblem;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::time::Duration;

/// Caches responses of an inner planner. Timeouts are never cached.
pub struct CachedPlanner<P> {
    inner: P,
    cache: RefCell<FxHashMap<String, PlannerResponse>>,
}

impl<P: Planner> CachedPlanner<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
    }
}

impl<P: Planner> Planner for CachedPlanner<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn plan(&self, problem: &CompiledProblem, timeout: Duration) -> PlannerResponse {
        let key = problem.fingerprint();
        if let Some(hit) = self.cache.borrow().get(&key) {
            tracing::debug!(fingerprint = %key, "planner cache hit");
            return hit.clone();
        }
        let response = self.inner.plan(problem, timeout);
        if !response.is_timeout {
            self.cache.borrow_mut().insert(key, response.clone());
        }
        response
    }
}
