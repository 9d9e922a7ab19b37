#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use listsync_core::Params;
use listsync_engine::{ListResponse, OperateResponse, Transport, TransportError};
use serde_json::Value;
use tokio::sync::Notify;

/// In-memory transport answering from scripted responses.
#[derive(Default)]
pub struct ScriptedTransport {
    list_response: Mutex<ListResponse>,
    list_params: Mutex<Vec<Params>>,
    list_gate: Mutex<Option<Arc<Notify>>>,
    list_failure: Mutex<Option<TransportError>>,
    /// Per-id answers for `get`; the last answer repeats.
    gets: Mutex<HashMap<String, VecDeque<Result<Value, TransportError>>>>,
    get_calls: Mutex<HashMap<String, usize>>,
    operate_response: Mutex<Option<OperateResponse>>,
    operate_failure: Mutex<Option<TransportError>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_list(&self, rows: Vec<Value>, total: Option<u64>) {
        *self.list_response.lock().unwrap() = ListResponse {
            data: rows,
            total,
            limit: None,
            offset: None,
        };
    }

    pub fn set_list_response(&self, response: ListResponse) {
        *self.list_response.lock().unwrap() = response;
    }

    /// Makes the next list calls wait until the returned gate is notified.
    pub fn hold_lists(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn release_lists(&self) {
        *self.list_gate.lock().unwrap() = None;
    }

    pub fn script_get(&self, id: &str, answers: Vec<Result<Value, TransportError>>) {
        self.gets
            .lock()
            .unwrap()
            .insert(id.to_string(), answers.into_iter().collect());
    }

    pub fn set_operate(&self, response: OperateResponse) {
        *self.operate_response.lock().unwrap() = Some(response);
    }

    /// Makes every mutating call fail with `error` until cleared with `None`.
    pub fn fail_operations(&self, error: Option<TransportError>) {
        *self.operate_failure.lock().unwrap() = error;
    }

    /// Makes list calls fail with `error` until cleared with `None`.
    pub fn fail_lists(&self, error: Option<TransportError>) {
        *self.list_failure.lock().unwrap() = error;
    }

    pub fn list_calls(&self) -> usize {
        self.list_params.lock().unwrap().len()
    }

    pub fn last_list_params(&self) -> Params {
        self.list_params
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no list call recorded")
    }

    pub fn get_calls(&self, id: &str) -> usize {
        self.get_calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<OperateResponse, TransportError> {
        self.calls.lock().unwrap().push(call);
        if let Some(error) = self.operate_failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .operate_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| OperateResponse::single(200, Value::Null)))
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn list(&self, params: &Params) -> Result<ListResponse, TransportError> {
        self.list_params.lock().unwrap().push(params.clone());
        let gate = self.list_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.list_failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.list_response.lock().unwrap().clone())
    }

    async fn get(&self, id: &str, _params: &Params) -> Result<Value, TransportError> {
        *self.get_calls.lock().unwrap().entry(id.to_string()).or_default() += 1;
        let mut gets = self.gets.lock().unwrap();
        let Some(answers) = gets.get_mut(id) else {
            return Err(TransportError::status(404));
        };
        if answers.len() > 1 {
            return answers.pop_front().expect("non-empty");
        }
        answers
            .front()
            .cloned()
            .unwrap_or_else(|| Err(TransportError::status(404)))
    }

    async fn create(&self, _data: &Value) -> Result<OperateResponse, TransportError> {
        self.record("create".to_string())
    }

    async fn update(&self, id: &str, _data: &Value) -> Result<OperateResponse, TransportError> {
        self.record(format!("update {id}"))
    }

    async fn batch_update(
        &self,
        ids: &[String],
        _data: &Value,
    ) -> Result<OperateResponse, TransportError> {
        self.record(format!("batch_update {}", ids.join(",")))
    }

    async fn perform_action(
        &self,
        id: &str,
        action: &str,
        _data: &Value,
    ) -> Result<OperateResponse, TransportError> {
        self.record(format!("{action} {id}"))
    }

    async fn batch_perform_action(
        &self,
        ids: &[String],
        action: &str,
        _data: &Value,
    ) -> Result<OperateResponse, TransportError> {
        self.record(format!("batch_{action} {}", ids.join(",")))
    }

    async fn delete(&self, id: &str) -> Result<OperateResponse, TransportError> {
        self.record(format!("delete {id}"))
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<OperateResponse, TransportError> {
        self.record(format!("batch_delete {}", ids.join(",")))
    }
}

/// Waits until `cond` holds, failing the test after about five seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub fn init_logging() {
    engine_logging::initialize_for_tests();
}
