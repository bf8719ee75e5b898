//! Domain types for the stock pool

pub mod bar;
pub mod ids;
pub mod namespace;
pub mod record;
pub mod signal;
pub mod value;

pub use bar::Bar;
pub use ids::{CycleKey, CycleKeyError, EntityId};
pub use namespace::Namespace;
pub use record::{
    ApplyReport, EntityRecord, NamespaceMap, NamespacePatch, PoolRecord, StrategyResult,
    DEPRECATED_POOL_FIELDS,
};
pub use signal::{Action, FusionResult, Signal};
pub use value::{
    lenient_value, FundamentalDetail, SentimentDetail, StrategyValue, TechnicalDetail,
};
