pub mod aggregate;
pub mod config;
pub mod error;
pub mod memory;
pub mod options;
pub mod paginate;
pub mod pipeline;
pub mod query;
pub mod result;
pub mod schema;
pub mod store;
pub mod value;

pub use config::PagerConfig;
pub use error::{Error, Result};
pub use memory::{CollectionStore, MemoryDb};
pub use options::{
    CriteriaConverter, CriteriaWrapper, Identity, Limit, PaginateOptions, ResolvedOptions,
    Setting, SortConverter,
};
pub use paginate::Paginator;
pub use result::{Aggregated, Callback, PagedResult, Pending};
pub use schema::{Schema, SchemaDef};
pub use store::{FindRequest, Store};
