use std::sync::Arc;
use std::time::Duration;

use listsync_core::{BaseParams, FilterOptions, FilterState, SteadyStatus};

use crate::http::{ReqwestTransport, TransportSettings};
use crate::transport::{ListFetcher, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct ListConfig {
    /// Field holding each row's identity.
    pub id_key: String,
    /// Page size used until the user picks one.
    pub limit: u64,
    /// Records not matching this after a fetch are polled.
    pub steady_status: Option<SteadyStatus>,
    pub filter_options: FilterOptions,
    pub filter: FilterState,
    /// Delay between two polls of the same record. Polling has no attempt
    /// cap: a record that never settles is polled until cancelled.
    pub refresh_interval: Duration,
    /// Sent as the `scope` parameter of list requests.
    pub scope: Option<String>,
    pub base_params: BaseParams,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            id_key: "id".to_string(),
            limit: 20,
            steady_status: None,
            filter_options: FilterOptions::new(),
            filter: FilterState::new(),
            refresh_interval: Duration::from_secs(10),
            scope: None,
            base_params: BaseParams::None,
        }
    }
}

/// Where the list gets its rows from.
#[derive(Clone)]
pub enum Source {
    Transport(Arc<dyn Transport>),
    /// Read-only list fed by a caller-supplied function.
    Fetcher(Arc<dyn ListFetcher>),
}

impl Source {
    /// Binds the named resource over HTTP.
    pub fn remote(resource: &str, settings: TransportSettings) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(resource, settings)?;
        Ok(Source::Transport(Arc::new(transport)))
    }

    pub(crate) fn transport(&self) -> Option<&Arc<dyn Transport>> {
        match self {
            Source::Transport(transport) => Some(transport),
            Source::Fetcher(_) => None,
        }
    }
}
