//! Time-series query surface consumed by the evaluator.

mod prometheus;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

pub use self::prometheus::{PrometheusDatasource, PrometheusProvider};
use crate::error::QueryError;

/// One series sample returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    /// Unix seconds; 0 when the datasource did not report one.
    pub timestamp: i64,
}

impl Vector {
    pub fn new(labels: BTreeMap<String, String>, value: f64) -> Self {
        Self {
            labels,
            value,
            timestamp: 0,
        }
    }
}

/// Raw query outcome; warnings are turned into errors by the evaluator.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub vectors: Vec<Vector>,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait Datasource: Send + Sync {
    async fn query(&self, expr: &str, ts: i64) -> Result<QueryResult, QueryError>;
}

/// Resolves a cluster name to a live datasource client.
pub trait DatasourceProvider: Send + Sync {
    fn get(&self, cluster: &str) -> Option<Arc<dyn Datasource>>;
}
