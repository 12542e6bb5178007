//! # Demo Errors

use almoner_core::CoreError;
use almoner_query::QueryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Domain error: {0}")]
    Core(#[from] CoreError),

    /// The cache returned something the walkthrough did not expect.
    #[error("Unexpected state: {0}")]
    Unexpected(String),
}

pub type DemoResult<T> = Result<T, DemoError>;
