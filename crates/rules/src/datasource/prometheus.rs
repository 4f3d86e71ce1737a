//! Prometheus HTTP API client (`/api/v1/query`).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use vigil_cache::SnapshotCache;
use vigil_core::DatasourceInfo;

use super::{Datasource, DatasourceProvider, QueryResult, Vector};
use crate::error::QueryError;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum ApiData {
    Vector(Vec<InstantSample>),
    Matrix(Vec<RangeSeries>),
    Scalar((f64, String)),
    String((f64, String)),
}

#[derive(Debug, Deserialize)]
struct InstantSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

fn sample(labels: BTreeMap<String, String>, (ts, raw): (f64, String)) -> Result<Vector, QueryError> {
    let value = raw
        .parse::<f64>()
        .map_err(|_| QueryError::Decode(format!("invalid sample value {raw:?}")))?;
    Ok(Vector {
        labels,
        value,
        timestamp: ts as i64,
    })
}

fn into_vectors(data: ApiData) -> Result<Vec<Vector>, QueryError> {
    match data {
        ApiData::Vector(samples) => samples
            .into_iter()
            .map(|s| sample(s.metric, s.value))
            .collect(),
        // a range result alerts on the newest point of each series
        ApiData::Matrix(series) => series
            .into_iter()
            .filter_map(|s| {
                let last = s.values.into_iter().last()?;
                Some(sample(s.metric, last))
            })
            .collect(),
        ApiData::Scalar(point) => Ok(vec![sample(BTreeMap::new(), point)?]),
        ApiData::String(_) => Err(QueryError::Decode("string results cannot alert".into())),
    }
}

pub struct PrometheusDatasource {
    base_url: String,
    basic_auth: Option<(String, String)>,
    client: reqwest::Client,
}

impl PrometheusDatasource {
    pub fn new(info: &DatasourceInfo) -> Result<Self, QueryError> {
        let timeout = if info.timeout_ms == 0 {
            DEFAULT_TIMEOUT_MS
        } else {
            info.timeout_ms
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout))
            .build()
            .map_err(|e| QueryError::Transport(e.to_string()))?;
        let basic_auth = (!info.basic_auth_user.is_empty())
            .then(|| (info.basic_auth_user.clone(), info.basic_auth_pass.clone()));
        Ok(Self {
            base_url: info.url.trim_end_matches('/').to_string(),
            basic_auth,
            client,
        })
    }
}

#[async_trait]
impl Datasource for PrometheusDatasource {
    async fn query(&self, expr: &str, ts: i64) -> Result<QueryResult, QueryError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .query(&[("query", expr.to_string()), ("time", ts.to_string())]);
        if let Some((user, pass)) = &self.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        // Prometheus reports query errors as 4xx with a JSON body
        let parsed: ApiResponse = match serde_json::from_str(&body) {
            Ok(p) => p,
            Err(_) if !status.is_success() => {
                return Err(QueryError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
            Err(e) => return Err(QueryError::Decode(e.to_string())),
        };

        if parsed.status != "success" {
            return Err(QueryError::Status {
                status: status.as_u16(),
                body: parsed.error,
            });
        }

        let vectors = match parsed.data {
            Some(data) => into_vectors(data)?,
            None => Vec::new(),
        };
        Ok(QueryResult {
            vectors,
            warnings: parsed.warnings,
        })
    }
}

/// Builds and memoizes a client per datasource, rebuilding it when the
/// datasource row changes.
pub struct PrometheusProvider {
    datasources: Arc<SnapshotCache<DatasourceInfo>>,
    clients: RwLock<HashMap<i64, (i64, Arc<PrometheusDatasource>)>>,
}

impl PrometheusProvider {
    pub fn new(datasources: Arc<SnapshotCache<DatasourceInfo>>) -> Self {
        Self {
            datasources,
            clients: RwLock::new(HashMap::new()),
        }
    }
}

impl DatasourceProvider for PrometheusProvider {
    fn get(&self, cluster: &str) -> Option<Arc<dyn Datasource>> {
        let info = self
            .datasources
            .snapshot()
            .values()
            .find(|d| d.name == cluster && !d.disabled)
            .cloned()?;

        {
            let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
            if let Some((update_at, client)) = clients.get(&info.id) {
                if *update_at == info.update_at {
                    return Some(client.clone() as Arc<dyn Datasource>);
                }
            }
        }

        match PrometheusDatasource::new(&info) {
            Ok(client) => {
                let client = Arc::new(client);
                debug!(cluster, datasource_id = info.id, "prometheus client built");
                self.clients
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(info.id, (info.update_at, client.clone()));
                Some(client as Arc<dyn Datasource>)
            }
            Err(e) => {
                warn!(cluster, error = %e, "failed to build prometheus client");
                None
            }
        }
    }
}
