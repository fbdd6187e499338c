//! Storage ports for validation codes

pub mod ports;

pub use ports::{
    BackendAdapter, CodeFilter, CodeKey, CodeStore, Consistency, Served, WriteCondition,
    WriteOutcome,
};
