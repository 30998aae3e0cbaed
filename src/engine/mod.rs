// FILE: src/engine/mod.rs
//! Building generations and reading them back.

pub mod builder;
pub mod filter;
pub mod query;

pub use builder::{BuildOutcome, BuildWarning, IndexBuilder, RootSummary, WarningKind};
pub use filter::{CompareOp, Field, Filter, Literal};
pub use query::{
    DuplicateGroup, GroupBucket, GroupKey, OrderKey, Query, QueryOutput, QueryService, ResultSet,
};
