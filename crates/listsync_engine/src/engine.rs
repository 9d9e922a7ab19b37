use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use engine_logging::{engine_debug, engine_info, engine_warn};
use listsync_core::{
    compile_filter_params, offset_for_page, rebase_offset, validate_filter, wrap_rows,
    FilterState, ItemRecord, PageState, Params, RecordError, RecordMap, Selection, SteadyStatus,
};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::{ListConfig, Source};
use crate::error::EngineError;
use crate::poll::{PollRegistry, PollStep, PollTarget, PollingJob};
use crate::prefs::{PreferenceStore, LIST_LIMIT_KEY};
use crate::transport::{
    FailureKind, ListResponse, OperateResponse, ResponseBody, Transport, TransportError,
};

/// Mutating call on a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    PerformAction(String),
    Delete,
}

impl OperationKind {
    /// Calls that change which rows the list holds; the list is refetched
    /// instead of patched.
    fn reshapes_list(&self) -> bool {
        matches!(self, OperationKind::Create | OperationKind::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::PerformAction(action) => write!(f, "action {action}"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Mutating call on several records at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchKind {
    Update,
    PerformAction(String),
    Delete,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKind::Update => write!(f, "batch update"),
            BatchKind::PerformAction(action) => write!(f, "batch action {action}"),
            BatchKind::Delete => write!(f, "batch delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { rows: usize },
    /// A newer fetch started or the list was shut down meanwhile.
    Discarded,
}

struct ListState {
    records: RecordMap,
    page: PageState,
    /// Page size chosen by configuration or the last page size change.
    limit: u64,
    filter: FilterState,
    selection: Selection,
    polls: PollRegistry,
    loading: bool,
    fetch_seq: u64,
}

struct EngineInner {
    weak: Weak<EngineInner>,
    config: ListConfig,
    source: Source,
    preferences: Arc<dyn PreferenceStore>,
    context: CancellationToken,
    /// Runtime polling jobs are spawned on.
    runtime: Option<Handle>,
    state: Mutex<ListState>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.polls.cancel_all();
    }
}

/// Local mirror of one page of a remote resource list.
///
/// Each step (applying a fetch, patching after an operation, a poll
/// observation) runs under one lock, never across an await, so no step sees
/// another half-applied. Cloning yields another handle to the same list.
#[derive(Clone)]
pub struct ListEngine {
    inner: Arc<EngineInner>,
}

impl ListEngine {
    pub fn new(config: ListConfig, source: Source, preferences: Arc<dyn PreferenceStore>) -> Self {
        Self::with_context(config, source, preferences, CancellationToken::new())
    }

    /// Builds a list whose lifetime is bound to `context`.
    ///
    /// Once the token is cancelled, results of in-flight fetches are dropped
    /// and every polling job stops. Polling jobs run on the runtime current
    /// at construction, if any; see [`ListEngine::with_runtime`].
    pub fn with_context(
        config: ListConfig,
        source: Source,
        preferences: Arc<dyn PreferenceStore>,
        context: CancellationToken,
    ) -> Self {
        let runtime = Handle::try_current().ok();
        Self::build(config, source, preferences, context, runtime)
    }

    /// Like [`ListEngine::with_context`], spawning polling jobs on `runtime`.
    /// Lets a list built outside any runtime poll.
    pub fn with_runtime(
        config: ListConfig,
        source: Source,
        preferences: Arc<dyn PreferenceStore>,
        context: CancellationToken,
        runtime: Handle,
    ) -> Self {
        Self::build(config, source, preferences, context, Some(runtime))
    }

    fn build(
        config: ListConfig,
        source: Source,
        preferences: Arc<dyn PreferenceStore>,
        context: CancellationToken,
        runtime: Option<Handle>,
    ) -> Self {
        let state = ListState {
            records: RecordMap::new(),
            page: PageState::new(config.limit),
            limit: config.limit,
            filter: config.filter.clone(),
            selection: Selection::default(),
            polls: PollRegistry::default(),
            loading: false,
            fetch_seq: 0,
        };
        let inner = Arc::new_cyclic(|weak| EngineInner {
            weak: weak.clone(),
            config,
            source,
            preferences,
            context,
            runtime,
            state: Mutex::new(state),
        });
        Self { inner }
    }

    fn state(&self) -> MutexGuard<'_, ListState> {
        self.inner.lock_state()
    }

    pub fn config(&self) -> &ListConfig {
        &self.inner.config
    }

    /// Fetches one page and replaces the local records with it.
    ///
    /// A `limit` of 0 uses the effective page size. List-level failures are
    /// returned; a result arriving after a newer fetch or after shutdown is
    /// discarded silently.
    pub async fn fetch(&self, offset: u64, limit: u64) -> Result<FetchOutcome, EngineError> {
        let (seq, limit, params) = {
            let mut state = self.state();
            let limit = if limit == 0 {
                self.inner.effective_limit(&state)
            } else {
                limit
            };
            let params = self.inner.list_params(&state.filter, offset, limit)?;
            state.fetch_seq += 1;
            state.loading = true;
            (state.fetch_seq, limit, params)
        };

        engine_debug!("Fetching list offset={} limit={}", offset, limit);
        let result = self.inner.list(&params).await;

        let mut state = self.state();
        if state.fetch_seq == seq {
            state.loading = false;
        }
        if self.inner.context.is_cancelled() || state.fetch_seq != seq {
            engine_debug!("Discarding stale list response (fetch {})", seq);
            return Ok(FetchOutcome::Discarded);
        }
        let response = result?;

        state.polls.cancel_all();
        let rows = response.data.len();
        state.records = wrap_rows(response.data, &self.inner.config.id_key);
        state.page.apply_response(
            offset,
            limit,
            rows,
            response.total,
            response.limit,
            response.offset,
        );
        self.inner.check_steady_status(&mut state);
        engine_info!(
            "List applied: {} rows, offset {}, total {}",
            rows,
            state.page.offset,
            state.page.total
        );
        Ok(FetchOutcome::Applied { rows })
    }

    /// Refetches the current page with the current page size.
    pub async fn refresh(&self) -> Result<FetchOutcome, EngineError> {
        let (offset, limit) = {
            let state = self.state();
            (state.page.offset, self.inner.effective_limit(&state))
        };
        self.fetch(offset, limit).await
    }

    /// Stops polling and empties records, pagination and selection.
    ///
    /// A fetch still in flight is discarded when it completes.
    pub fn reset(&self) {
        let mut state = self.state();
        state.fetch_seq += 1;
        state.loading = false;
        state.polls.cancel_all();
        state.page.reset();
        state.records.clear();
        state.selection.clear();
    }

    /// Fetches the 1-based `page`.
    pub async fn change_page(&self, page: u64) -> Result<FetchOutcome, EngineError> {
        let limit = {
            let state = self.state();
            self.inner.effective_limit(&state)
        };
        self.fetch(offset_for_page(page, limit), limit).await
    }

    /// Switches to `size` rows per page and remembers the choice.
    ///
    /// The offset moves down to the nearest boundary of the new size.
    pub async fn change_page_size(&self, size: u64) -> Result<FetchOutcome, EngineError> {
        if size == 0 {
            return Err(EngineError::InvalidArguments(
                "page size must be positive".to_string(),
            ));
        }
        if let Err(err) = self.inner.preferences.store(LIST_LIMIT_KEY, size) {
            engine_warn!("Failed to remember page size {}: {}", size, err);
        }
        let offset = {
            let mut state = self.state();
            state.limit = size;
            rebase_offset(state.page.offset, size)
        };
        self.fetch(offset, size).await
    }

    /// Replaces the filter and fetches the first page from scratch.
    pub async fn change_filter(&self, filter: FilterState) -> Result<FetchOutcome, EngineError> {
        validate_filter(&filter, &self.inner.config.filter_options)?;
        self.state().filter = filter;
        self.reset();
        self.fetch(0, 0).await
    }

    pub fn select(&self, rows: Vec<Value>) {
        let selection = Selection::from_rows(rows, &self.inner.config.id_key);
        self.state().selection = selection;
    }

    pub fn clear_selection(&self) {
        self.state().selection.clear();
    }

    pub fn allow_batch_delete(&self) -> bool {
        self.state().selection.allow_batch_delete()
    }

    /// Runs a mutating call on one record and mirrors its outcome locally.
    ///
    /// Create and delete refetch the page; a failed refetch is returned even
    /// though the call itself went through. Other kinds patch the record from
    /// the response and, when `expected` is given, poll it until steady.
    /// A failed call is also recorded on the affected record.
    pub async fn single_operate(
        &self,
        kind: OperationKind,
        id: Option<&str>,
        payload: Value,
        expected: Option<SteadyStatus>,
    ) -> Result<OperateResponse, EngineError> {
        let transport = self.inner.require_transport()?;
        if kind != OperationKind::Delete {
            require_object(&payload)?;
        }
        let id = match (&kind, id) {
            (OperationKind::Create, _) => String::new(),
            (_, Some(id)) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(EngineError::InvalidArguments(format!("{kind} requires an id")));
            }
        };

        engine_debug!("Running {} on {:?}", kind, id);
        let result = match &kind {
            OperationKind::Create => transport.create(&payload).await,
            OperationKind::Update => transport.update(&id, &payload).await,
            OperationKind::PerformAction(action) => {
                transport.perform_action(&id, action, &payload).await
            }
            OperationKind::Delete => transport.delete(&id).await,
        };
        let ids = if kind == OperationKind::Create {
            Vec::new()
        } else {
            vec![id]
        };
        let response = self.settle_call(&kind.to_string(), &ids, result)?;

        if kind.reshapes_list() {
            self.refresh().await?;
            return Ok(response);
        }
        self.apply_response(&ids, &response, expected);
        Ok(response)
    }

    /// Runs a mutating call on several records; `ids` defaults to the
    /// current selection. Each id succeeds or fails on its own, and a call
    /// that fails as a whole marks every id. Batch delete refetches the page.
    pub async fn batch_operate(
        &self,
        kind: BatchKind,
        ids: Option<Vec<String>>,
        payload: Value,
        expected: Option<SteadyStatus>,
    ) -> Result<OperateResponse, EngineError> {
        let transport = self.inner.require_transport()?;
        if kind != BatchKind::Delete {
            require_object(&payload)?;
        }
        let ids = ids.unwrap_or_else(|| self.state().selection.ids().to_vec());
        if ids.is_empty() {
            return Err(EngineError::InvalidArguments(format!(
                "{kind} requires at least one id"
            )));
        }

        engine_debug!("Running {} on {} records", kind, ids.len());
        let result = match &kind {
            BatchKind::Update => transport.batch_update(&ids, &payload).await,
            BatchKind::PerformAction(action) => {
                transport.batch_perform_action(&ids, action, &payload).await
            }
            BatchKind::Delete => transport.batch_delete(&ids).await,
        };
        let response = self.settle_call(&kind.to_string(), &ids, result)?;

        if kind == BatchKind::Delete {
            self.refresh().await?;
            return Ok(response);
        }
        self.apply_response(&ids, &response, expected);
        Ok(response)
    }

    pub async fn single_update(
        &self,
        id: &str,
        data: Value,
        expected: Option<SteadyStatus>,
    ) -> Result<OperateResponse, EngineError> {
        self.single_operate(OperationKind::Update, Some(id), data, expected)
            .await
    }

    pub async fn single_perform_action(
        &self,
        action: &str,
        id: &str,
        data: Value,
        expected: Option<SteadyStatus>,
    ) -> Result<OperateResponse, EngineError> {
        let kind = OperationKind::PerformAction(action.to_string());
        self.single_operate(kind, Some(id), data, expected).await
    }

    pub async fn batch_update(
        &self,
        ids: Option<Vec<String>>,
        data: Value,
        expected: Option<SteadyStatus>,
    ) -> Result<OperateResponse, EngineError> {
        self.batch_operate(BatchKind::Update, ids, data, expected)
            .await
    }

    pub async fn batch_perform_action(
        &self,
        action: &str,
        ids: Option<Vec<String>>,
        data: Value,
        expected: Option<SteadyStatus>,
    ) -> Result<OperateResponse, EngineError> {
        let kind = BatchKind::PerformAction(action.to_string());
        self.batch_operate(kind, ids, data, expected).await
    }

    /// (Re)starts polling `id` until it reaches `expected`.
    ///
    /// An empty expectation stops any running poll instead. May be called
    /// from any thread; the job runs on the list's runtime.
    pub fn wait_status(&self, id: &str, expected: SteadyStatus) -> Result<(), EngineError> {
        self.inner.require_transport()?;
        let mut state = self.state();
        if expected.is_empty() {
            state.polls.cancel(id);
            return Ok(());
        }
        self.inner.start_poll(&mut state, id, expected);
        Ok(())
    }

    /// Stops polling `id`; returns whether a job was running.
    pub fn cancel_poll(&self, id: &str) -> bool {
        self.state().polls.cancel(id)
    }

    /// Stops every polling job.
    pub fn clear_polls(&self) {
        self.state().polls.cancel_all();
    }

    /// Tears the list down: in-flight fetches are discarded and every
    /// polling job stops. The list cannot be used afterwards.
    pub fn shutdown(&self) {
        self.inner.context.cancel();
        self.clear_polls();
    }

    pub fn records(&self) -> RecordMap {
        self.state().records.clone()
    }

    /// Records in the order the server returned them.
    pub fn rows(&self) -> Vec<ItemRecord> {
        let mut rows: Vec<_> = self.state().records.values().cloned().collect();
        rows.sort_by_key(|record| record.index);
        rows
    }

    pub fn record(&self, id: &str) -> Option<ItemRecord> {
        self.state().records.get(id).cloned()
    }

    pub fn page(&self) -> PageState {
        self.state().page
    }

    /// Page size the next fetch will use.
    pub fn limit(&self) -> u64 {
        let state = self.state();
        self.inner.effective_limit(&state)
    }

    pub fn filter(&self) -> FilterState {
        self.state().filter.clone()
    }

    pub fn selection(&self) -> Selection {
        self.state().selection.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    pub fn is_polling(&self, id: &str) -> bool {
        self.state().polls.contains(id)
    }

    pub fn active_polls(&self) -> usize {
        self.state().polls.len()
    }

    /// Writes a failed call onto each affected record before handing the
    /// error back.
    fn settle_call(
        &self,
        what: &str,
        ids: &[String],
        result: Result<OperateResponse, TransportError>,
    ) -> Result<OperateResponse, EngineError> {
        result.map_err(|err| {
            engine_warn!("{} failed: {}", what, err);
            let mut state = self.state();
            for id in ids {
                set_error(&mut state.records, id, err.to_record_error());
            }
            EngineError::from(err)
        })
    }

    /// Patches every affected record, then arms polling for them.
    fn apply_response(
        &self,
        ids: &[String],
        response: &OperateResponse,
        expected: Option<SteadyStatus>,
    ) {
        let mut state = self.state();
        match &response.body {
            ResponseBody::Batch(results) => {
                for result in results {
                    if result.is_success() {
                        upsert(&mut state.records, &result.id, result.data.clone());
                    } else {
                        let error =
                            RecordError::new(Some(result.status), failure_message(&result.data));
                        set_error(&mut state.records, &result.id, error);
                    }
                }
            }
            ResponseBody::Single(data) => {
                if let Some(id) = ids.first() {
                    if response.status < 400 {
                        upsert(&mut state.records, id, data.clone());
                    } else {
                        let error =
                            RecordError::new(Some(response.status), failure_message(data));
                        set_error(&mut state.records, id, error);
                    }
                }
            }
        }

        let Some(expected) = expected.filter(|spec| !spec.is_empty()) else {
            return;
        };
        for id in ids {
            self.inner.start_poll(&mut state, id, expected.clone());
        }
    }
}

impl EngineInner {
    fn lock_state(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_transport(&self) -> Result<Arc<dyn Transport>, EngineError> {
        self.source.transport().cloned().ok_or(EngineError::NoTransport)
    }

    /// Remembered page size if any, else the configured one.
    fn effective_limit(&self, state: &ListState) -> u64 {
        self.preferences
            .load(LIST_LIMIT_KEY)
            .filter(|limit| *limit > 0)
            .unwrap_or(state.limit)
    }

    /// Caller parameters shared by list and single-record requests.
    fn option_params(&self) -> Params {
        self.config.base_params.resolve()
    }

    fn list_params(
        &self,
        filter: &FilterState,
        offset: u64,
        limit: u64,
    ) -> Result<Params, EngineError> {
        let mut params = Params::new();
        if let Some(scope) = &self.config.scope {
            params.insert("scope".to_string(), json!(scope));
        }
        params.extend(self.option_params());
        params.insert("limit".to_string(), json!(limit));
        if offset > 0 {
            params.insert("offset".to_string(), json!(offset));
        }
        Ok(compile_filter_params(params, filter, &self.config.filter_options)?)
    }

    async fn list(&self, params: &Params) -> Result<ListResponse, TransportError> {
        match &self.source {
            Source::Transport(transport) => transport.list(params).await,
            Source::Fetcher(fetcher) => fetcher.fetch(params).await,
        }
    }

    /// Arms polling for every freshly fetched record that is not yet steady.
    fn check_steady_status(&self, state: &mut ListState) {
        let Some(spec) = self.config.steady_status.as_ref().filter(|spec| !spec.is_empty()) else {
            return;
        };
        if self.source.transport().is_none() {
            return;
        }
        let pending: Vec<String> = state
            .records
            .values()
            .filter(|record| !record.is_steady(spec))
            .map(|record| record.id.clone())
            .collect();
        for id in pending {
            self.start_poll(state, &id, spec.clone());
        }
    }

    /// Replaces any running poll for `id` with a fresh one.
    fn start_poll(&self, state: &mut ListState, id: &str, expected: SteadyStatus) {
        if self.context.is_cancelled() {
            return;
        }
        if self.source.transport().is_none() {
            engine_debug!("Not polling {}: list has no transport", id);
            return;
        }
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            engine_warn!("Not polling {}: no Tokio runtime available", id);
            return;
        };
        let (generation, cancel) = state.polls.arm(id, &self.context);
        let job = PollingJob {
            id: id.to_string(),
            expected,
            interval: self.config.refresh_interval,
            generation,
            cancel,
        };
        let target: Weak<dyn PollTarget> = self.weak.clone();
        job.spawn(&runtime, target);
    }
}

#[async_trait::async_trait]
impl PollTarget for EngineInner {
    async fn fetch_one(&self, id: &str) -> Result<Value, TransportError> {
        let Some(transport) = self.source.transport() else {
            return Err(TransportError::new(
                FailureKind::Unsupported,
                "list has no transport bound",
            ));
        };
        transport.get(id, &self.option_params()).await
    }

    fn settle(&self, id: &str, generation: u64, data: Value, expected: &SteadyStatus) -> PollStep {
        let mut state = self.lock_state();
        if !state.polls.is_current(id, generation) {
            return PollStep::Done;
        }
        let steady = listsync_core::is_steady(&data, expected);
        upsert(&mut state.records, id, data);
        if steady {
            engine_debug!("Poll {}: reached steady status", id);
            state.polls.release(id, generation);
            PollStep::Done
        } else {
            PollStep::Continue
        }
    }

    fn fail(&self, id: &str, generation: u64, error: TransportError) {
        let mut state = self.lock_state();
        if state.polls.release(id, generation) {
            set_error(&mut state.records, id, error.to_record_error());
        }
    }

    async fn resource_gone(&self, id: &str, generation: u64) {
        if !self.lock_state().polls.release(id, generation) {
            return;
        }
        let Some(inner) = self.weak.upgrade() else {
            return;
        };
        if let Err(err) = (ListEngine { inner }).refresh().await {
            engine_warn!("Refresh after {} disappeared failed: {}", id, err);
        }
    }
}

fn require_object(payload: &Value) -> Result<(), EngineError> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(EngineError::InvalidArguments(format!(
            "payload must be a JSON object, got {payload}"
        )))
    }
}

/// Replaces a record's data, creating the record when it is not cached.
/// New records sort after every cached one.
fn upsert(records: &mut RecordMap, id: &str, data: Value) {
    if let Some(record) = records.get_mut(id) {
        record.replace_data(data);
        return;
    }
    let index = records
        .values()
        .map(|record| record.index + 1)
        .max()
        .unwrap_or(0);
    records.insert(id.to_string(), ItemRecord::new(id, data, index));
}

fn set_error(records: &mut RecordMap, id: &str, error: RecordError) {
    match records.get_mut(id) {
        Some(record) => record.set_error(error),
        None => engine_warn!("Dropping error for uncached record {}: {}", id, error),
    }
}

fn failure_message(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("details").or_else(|| map.get("message")) {
            Some(Value::String(text)) => text.clone(),
            _ => data.to_string(),
        },
        Value::Null => "operation failed".to_string(),
        other => other.to_string(),
    }
}
