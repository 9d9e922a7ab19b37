//! Listsync engine: remote transport, convergence polling and the list
//! orchestrator.
mod config;
mod engine;
mod error;
mod http;
mod poll;
mod prefs;
mod transport;

pub use config::{ListConfig, Source};
pub use engine::{BatchKind, FetchOutcome, ListEngine, OperationKind};
pub use error::EngineError;
pub use http::{ReqwestTransport, TransportSettings};
pub use prefs::{
    FilePreferences, MemoryPreferences, PersistError, PreferenceStore, LIST_LIMIT_KEY,
};
pub use transport::{
    BatchResult, FailureKind, ListFetcher, ListResponse, OperateResponse, ResponseBody, Transport,
    TransportError,
};
