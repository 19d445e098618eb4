// SPDX-License-Identifier: PMPL-1.0-or-later
//! Cistern query engine.
//!
//! Executes structured [`QueryDesc`]s against an
//! [`EventCollection`](cistern_events::EventCollection): a bounded range
//! scan over timestamp-prefixed keys, followed by filtering, grouping,
//! aggregation and optional time bucketing.
//!
//! ```no_run
//! use cistern_events::{CisternConfig, CollectionRegistry};
//! use cistern_query::{Aggregate, ColumnDesc, FilterDesc, QueryDesc, QueryEngine};
//!
//! let registry = CollectionRegistry::new(CisternConfig::default()).unwrap();
//! let flows = registry.open("flows").unwrap();
//! let desc = QueryDesc::new()
//!     .with_column(ColumnDesc::aggregated(Aggregate::Sum, "bytes"))
//!     .with_filter(FilterDesc::new("port", "=", 443))
//!     .with_group_by("src");
//! let result = QueryEngine::new().execute(&flows, desc).unwrap();
//! println!("{}", serde_json::to_string_pretty(&result).unwrap());
//! ```

pub mod aggregate;
pub mod compare;
pub mod desc;
pub mod engine;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod result;

pub use desc::{Aggregate, ColumnDesc, FilterDesc, QueryDesc, TimeRange};
pub use engine::QueryEngine;
pub use error::{QueryError, QueryResult};
pub use filter::{Condition, Filter};
pub use metrics::{MetricDefinition, MetricKind, MetricRegistry, MetricState};
pub use result::{ResultSet, GROUP_ID_FIELD};
