//! Query assembly.
//!
//! Turns a dataset and a [`QueryRequest`](crate::model::QueryRequest) into
//! parameterised data and count statements. Execution lives in
//! [`upstream`](crate::upstream).

pub mod assembler;

pub use assembler::{
    build_limit, normalize_pagination, AssembledQuery, QueryAssembler, COMPUTED_SQL_TTL,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, PREVIEW_LIMIT,
};
