//! Per-query outcome taxonomy for observability.
//!
//! The pipeline in [`crate::resolver::DnsResolver::resolve`] settles into one
//! of a fixed set of terminal outcomes; dashboards built against this crate
//! key on these labels rather than on response codes alone, since a single
//! rcode (e.g. `NOERROR`) can arise from a local answer, a cache hit, or a
//! fresh upstream exchange, and those have very different cost/latency
//! profiles worth telling apart.
//!
//! `resolve` stashes the outcome of the query it is currently serving into a
//! [`tokio::task_local!`] rather than changing its return type, since each
//! inbound query already runs on its own task (see `server.rs`'s per-request
//! spawn) and this keeps the pipeline's call graph untouched.

use std::cell::Cell;

/// The terminal state a query pipeline run settles into, per spec's outcome
/// taxonomy: local / blocked / cached / stale / upstream / upstream_error /
/// invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOutcome {
    /// Answered from the local static record store.
    Local,
    /// Answered with a blocklist response (NXDOMAIN or synthesized IP).
    Blocked,
    /// Answered from L0 or L1 cache within soft expiry.
    Cached,
    /// Answered from a cache entry past soft expiry but within grace,
    /// with a refresh enqueued in the background.
    Stale,
    /// Answered via a fresh upstream exchange.
    Upstream,
    /// All upstream candidates failed; answered with SERVFAIL.
    UpstreamError,
    /// Malformed request; answered with FORMERR/NOTIMPL/REFUSED.
    #[default]
    Invalid,
}

impl QueryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOutcome::Local => "local",
            QueryOutcome::Blocked => "blocked",
            QueryOutcome::Cached => "cached",
            QueryOutcome::Stale => "stale",
            QueryOutcome::Upstream => "upstream",
            QueryOutcome::UpstreamError => "upstream_error",
            QueryOutcome::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for QueryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

tokio::task_local! {
    /// Set by `server.rs` around each dispatch to `DnsResolver::resolve`,
    /// read back once the call returns to label the query-duration metric
    /// and (eventually) the analytics event record.
    pub static QUERY_OUTCOME: Cell<QueryOutcome>;
}

/// Record `outcome` for the currently-scoped query, if any. A no-op outside
/// a [`QUERY_OUTCOME`] scope (e.g. in unit tests that call `resolve`
/// directly), so callers never need to guard this.
pub fn set_outcome(outcome: QueryOutcome) {
    let _ = QUERY_OUTCOME.try_with(|cell| cell.set(outcome));
}
