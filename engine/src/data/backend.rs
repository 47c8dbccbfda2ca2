//! Search backend capability
//!
//! The engine consumes the document store only through [`SearchBackend::search`]:
//! a boolean query over one or more indices, optional aggregations and sort,
//! and a page window.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::documents::CdmDocument;
use super::error::DataError;
use super::filters::BoolQuery;
use super::index::{Collection, IndexTarget};

/// One search against the backend
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub collection: Collection,
    pub index: IndexTarget,
    pub query: BoolQuery,
    pub aggregations: Option<Value>,
    pub sort: Vec<Value>,
    pub size: usize,
    pub offset: usize,
    /// Restrict `_source` to these fields
    pub source: Option<Vec<String>>,
}

impl SearchRequest {
    pub fn new(collection: Collection, index: IndexTarget, query: BoolQuery) -> Self {
        Self {
            collection,
            index,
            query,
            aggregations: None,
            sort: Vec::new(),
            size: 0,
            offset: 0,
            source: None,
        }
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn sort(mut self, sort: Vec<Value>) -> Self {
        self.sort = sort;
        self
    }

    pub fn aggregations(mut self, aggregations: Value) -> Self {
        self.aggregations = Some(aggregations);
        self
    }

    pub fn source(mut self, fields: &[&str]) -> Self {
        self.source = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Request body for the `_search` endpoint
    pub fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), self.query.to_json());
        body.insert("size".to_string(), json!(self.size));
        body.insert("track_total_hits".to_string(), json!(true));
        if self.offset > 0 {
            body.insert("from".to_string(), json!(self.offset));
        }
        if !self.sort.is_empty() {
            body.insert("sort".to_string(), Value::Array(self.sort.clone()));
        }
        if let Some(aggregations) = &self.aggregations {
            body.insert("aggs".to_string(), aggregations.clone());
        }
        if let Some(source) = &self.source {
            body.insert("_source".to_string(), json!(source));
        }
        Value::Object(body)
    }
}

/// One matched document
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Concrete index the document was read from
    pub index: String,
    pub source: Value,
}

impl Hit {
    pub fn project<T: CdmDocument>(&self) -> Result<T, DataError> {
        T::project(&self.source)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub total: u64,
    pub hits: Vec<Hit>,
    pub aggregations: Option<Value>,
}

impl SearchResponse {
    /// Validate and unpack a raw `_search` response body
    pub fn from_json(body: Value) -> Result<Self, DataError> {
        let Value::Object(mut root) = body else {
            return Err(DataError::backend_shape("search response", "not an object"));
        };
        let Some(hits) = root.remove("hits") else {
            return Err(DataError::missing_keys(
                "search response",
                &["hits"],
                root.keys().cloned().collect(),
            ));
        };
        let Some(list) = hits.get("hits").and_then(Value::as_array) else {
            return Err(DataError::backend_shape(
                "search response",
                "hits.hits is missing or not an array",
            ));
        };

        let parsed = list
            .iter()
            .map(|hit| {
                let index = hit.get("_index").and_then(Value::as_str).ok_or_else(|| {
                    DataError::backend_shape("search hit", "missing _index")
                })?;
                let source = hit.get("_source").cloned().ok_or_else(|| {
                    DataError::backend_shape("search hit", "missing _source")
                })?;
                Ok(Hit {
                    index: index.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, DataError>>()?;

        let total = match hits.get("total") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::Object(total)) => total.get("value").and_then(Value::as_u64),
            _ => None,
        }
        .unwrap_or(parsed.len() as u64);

        Ok(Self {
            total,
            hits: parsed,
            aggregations: root.remove("aggregations"),
        })
    }

    /// Named aggregation result
    pub fn aggregation(&self, name: &str) -> Result<&Value, DataError> {
        self.aggregations
            .as_ref()
            .and_then(|aggs| aggs.get(name))
            .ok_or_else(|| {
                DataError::backend_shape("search response", format!("missing aggregation {}", name))
            })
    }

    /// Project every hit into a typed document
    pub fn documents<T: CdmDocument>(&self) -> Result<Vec<T>, DataError> {
        self.hits.iter().map(Hit::project).collect()
    }
}

/// Search backend trait
///
/// Implemented by the OpenSearch HTTP client and by the in-memory test backend.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Execute one search
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, DataError>;

    /// Backend name for logging and errors
    fn backend_name(&self) -> &'static str;

    /// Release backend resources
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_includes_window_and_optional_sections() {
        let request = SearchRequest::new(
            Collection::Run,
            IndexTarget::Single("cdmv8dev-run".to_string()),
            BoolQuery::new(),
        )
        .size(25)
        .offset(50)
        .sort(vec![json!({ "run.begin": { "order": "desc" } })])
        .source(&["run"]);
        let body = request.body();
        assert_eq!(body["size"], json!(25));
        assert_eq!(body["from"], json!(50));
        assert_eq!(body["sort"][0]["run.begin"]["order"], json!("desc"));
        assert_eq!(body["_source"], json!(["run"]));
        assert!(body.get("aggs").is_none());
    }

    #[test]
    fn body_omits_zero_offset() {
        let request = SearchRequest::new(
            Collection::Tag,
            IndexTarget::Pattern("cdm-v9dev-tag@*".to_string()),
            BoolQuery::new(),
        )
        .aggregations(json!({ "n": { "terms": { "field": "tag.name" } } }));
        let body = request.body();
        assert!(body.get("from").is_none());
        assert_eq!(body["aggs"]["n"]["terms"]["field"], json!("tag.name"));
    }

    #[test]
    fn parses_response_with_object_total() {
        let response = SearchResponse::from_json(json!({
            "hits": {
                "total": { "value": 7, "relation": "eq" },
                "hits": [{ "_index": "cdmv8dev-run", "_source": { "run": { "id": "r1" } } }]
            },
            "aggregations": { "x": { "value": 1.0 } }
        }))
        .unwrap();
        assert_eq!(response.total, 7);
        assert_eq!(response.hits[0].index, "cdmv8dev-run");
        assert_eq!(response.aggregation("x").unwrap()["value"], json!(1.0));
        assert!(response.aggregation("y").is_err());
    }

    #[test]
    fn missing_hits_reports_present_keys() {
        let err = SearchResponse::from_json(json!({ "took": 3, "error": "boom" })).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected search response shape: missing required keys: required [hits], present [error, took]"
        );
    }

    #[test]
    fn hit_without_source_is_rejected() {
        let err = SearchResponse::from_json(json!({
            "hits": { "hits": [{ "_index": "cdmv8dev-run" }] }
        }))
        .unwrap_err();
        assert!(matches!(err, DataError::BackendShape { .. }));
    }
}
