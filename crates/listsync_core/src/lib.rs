//! Listsync core: pure data model for a paginated, filtered resource list.
mod filter;
mod page;
mod params;
mod record;
mod selection;
mod steady;

pub use filter::{
    compile_filter_params, validate_filter, FilterError, FilterOption, FilterOptions, FilterState,
    Formatter,
};
pub use page::{offset_for_page, rebase_offset, PageState};
pub use params::{merge_filter_expressions, BaseParams, Params, FILTER_PARAM};
pub use record::{identity_of, wrap_rows, ItemRecord, RecordError, RecordMap};
pub use selection::Selection;
pub use steady::{is_steady, lookup_path, Expected, SteadyStatus};
