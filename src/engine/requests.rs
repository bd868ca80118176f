//! Outstanding-request table
//!
//! One record per in-flight compile or query. The table is the only shared
//! mutable state between request issuers and the delivery path: issuers
//! allocate records and block on them, the dispatcher completes them. Each
//! record's state rides a `watch` channel, so exactly-once completion wakes
//! every current and future waiter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::EngineError;
use crate::models::{CompileResult, RemoteLocation, RequestId, Span};

/// Why every pending record was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Restarted,
    Terminated,
}

impl From<AbortReason> for EngineError {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::Restarted => EngineError::ProcessRestarted,
            AbortReason::Terminated => EngineError::ProcessTerminated,
        }
    }
}

/// Typed answer stored on a completed record.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Compile(CompileResult),
    Selection(Span),
    TypeInfo {
        span: Span,
        type_desc: Option<String>,
    },
    Location {
        span: Span,
        remote: Option<RemoteLocation>,
    },
}

impl RequestOutcome {
    pub fn as_compile(&self) -> Option<&CompileResult> {
        match self {
            Self::Compile(result) => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum RequestState {
    Pending,
    Completed(Arc<RequestOutcome>),
    Aborted(AbortReason),
}

/// Bookkeeping entry for one outstanding command. Owned by the table;
/// issuers and the dispatcher only ever hold references.
#[derive(Debug)]
pub struct RequestRecord {
    id: RequestId,
    target_file: String,
    state: watch::Sender<RequestState>,
}

impl RequestRecord {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn target_file(&self) -> &str {
        &self.target_file
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), RequestState::Pending)
    }

    /// Result, if the record has completed.
    pub fn outcome(&self) -> Option<Arc<RequestOutcome>> {
        match &*self.state.borrow() {
            RequestState::Completed(outcome) => Some(Arc::clone(outcome)),
            _ => None,
        }
    }
}

#[derive(Default)]
struct TableInner {
    records: HashMap<RequestId, Arc<RequestRecord>>,
    /// parse id -> target file, bound when a compile completes. Survives
    /// record removal so later queries can still resolve their file.
    parse_files: HashMap<String, String>,
    /// target file -> most recent parse id, for issuing follow-up queries.
    latest_parse: HashMap<String, String>,
}

pub struct RequestTable {
    inner: Mutex<TableInner>,
    next_id: AtomicU64,
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        // The table stays usable even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a Pending record for `target_file` and return its fresh id.
    pub fn allocate(&self, target_file: impl Into<String>) -> RequestId {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (state, _) = watch::channel(RequestState::Pending);
        let record = Arc::new(RequestRecord {
            id,
            target_file: target_file.into(),
            state,
        });
        self.lock().records.insert(id, record);
        id
    }

    pub fn lookup(&self, id: RequestId) -> Option<Arc<RequestRecord>> {
        self.lock().records.get(&id).cloned()
    }

    /// Transition Pending -> Completed and wake all waiters. Returns false
    /// when the record is missing or already settled, so duplicate delivery
    /// is a no-op.
    pub fn complete(&self, id: RequestId, outcome: RequestOutcome) -> bool {
        let Some(record) = self.lookup(id) else {
            return false;
        };
        let mut slot = Some(Arc::new(outcome));
        record.state.send_if_modified(|state| {
            if matches!(state, RequestState::Pending)
                && let Some(outcome) = slot.take()
            {
                *state = RequestState::Completed(outcome);
                true
            } else {
                false
            }
        })
    }

    /// Abort every Pending record and wake its waiters with a failure.
    /// Parse bindings die with the session: a fresh process will not
    /// recognize the old parse ids.
    pub fn abort_all(&self, reason: AbortReason) {
        let records: Vec<_> = {
            let mut inner = self.lock();
            inner.parse_files.clear();
            inner.latest_parse.clear();
            inner.records.values().cloned().collect()
        };

        let mut aborted = 0usize;
        for record in records {
            let changed = record.state.send_if_modified(|state| {
                if matches!(state, RequestState::Pending) {
                    *state = RequestState::Aborted(reason);
                    true
                } else {
                    false
                }
            });
            if changed {
                aborted += 1;
            }
        }
        if aborted > 0 {
            tracing::debug!("Aborted {} pending requests: {:?}", aborted, reason);
        }
    }

    /// Drop a record once the issuer has consumed its result. Without this
    /// the table grows without bound over a session.
    pub fn remove(&self, id: RequestId) -> Option<Arc<RequestRecord>> {
        self.lock().records.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Record that `parse_id` identifies the last successful parse of
    /// `target_file`. A later compile of the same file replaces the binding.
    pub fn bind_parse(&self, parse_id: impl Into<String>, target_file: impl Into<String>) {
        let parse_id = parse_id.into();
        let target_file = target_file.into();
        let mut inner = self.lock();
        if let Some(previous) = inner.latest_parse.insert(target_file.clone(), parse_id.clone()) {
            inner.parse_files.remove(&previous);
        }
        inner.parse_files.insert(parse_id, target_file);
    }

    pub fn file_for_parse(&self, parse_id: &str) -> Option<String> {
        self.lock().parse_files.get(parse_id).cloned()
    }

    pub fn last_parse_for(&self, file: &str) -> Option<String> {
        self.lock().latest_parse.get(file).cloned()
    }

    /// Block the calling task until the record settles.
    ///
    /// Completed -> the stored outcome. Aborted -> the abort reason as an
    /// error. Timeout -> `Timeout`, with the record left Pending; a late
    /// completion is absorbed by `complete`'s idempotence.
    pub async fn wait(
        &self,
        id: RequestId,
        timeout: Option<Duration>,
    ) -> Result<Arc<RequestOutcome>, EngineError> {
        let record = self
            .lookup(id)
            .ok_or(EngineError::UnknownRequest { id })?;
        let mut rx = record.state.subscribe();
        drop(record);

        let settled = async move {
            loop {
                let state = rx.borrow_and_update().clone();
                match state {
                    RequestState::Completed(outcome) => return Ok(outcome),
                    RequestState::Aborted(reason) => return Err(reason.into()),
                    RequestState::Pending => {
                        if rx.changed().await.is_err() {
                            // Record removed while still pending.
                            return Err(EngineError::ProcessTerminated);
                        }
                    }
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, settled)
                .await
                .map_err(|_| EngineError::Timeout { id })?,
            None => settled.await,
        }
    }
}
