//! In-memory search backend for tests
//!
//! Routes are matched in registration order; the first route whose collection
//! (and optional predicate) matches answers the request. Unmatched requests get
//! an empty hit list. Every request is recorded.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::backend::{SearchBackend, SearchRequest, SearchResponse};
use super::error::DataError;
use super::index::Collection;

type Predicate = Box<dyn Fn(&SearchRequest) -> bool + Send + Sync>;

struct Route {
    collection: Collection,
    predicate: Option<Predicate>,
    response: Result<Value, String>,
}

#[derive(Default)]
pub struct MockBackend {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<SearchRequest>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer every search on `collection` with `response`
    pub fn on(&self, collection: Collection, response: Value) -> &Self {
        self.routes.lock().push(Route {
            collection,
            predicate: None,
            response: Ok(response),
        });
        self
    }

    /// Answer searches on `collection` that satisfy `predicate`
    pub fn on_when(
        &self,
        collection: Collection,
        predicate: impl Fn(&SearchRequest) -> bool + Send + Sync + 'static,
        response: Value,
    ) -> &Self {
        self.routes.lock().push(Route {
            collection,
            predicate: Some(Box::new(predicate)),
            response: Ok(response),
        });
        self
    }

    /// Answer searches on `collection` with a backend-unavailable error
    pub fn fail(&self, collection: Collection, reason: &str) -> &Self {
        self.routes.lock().push(Route {
            collection,
            predicate: None,
            response: Err(reason.to_string()),
        });
        self
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_for(&self, collection: Collection) -> Vec<SearchRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.collection == collection)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SearchBackend for MockBackend {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, DataError> {
        self.requests.lock().push(request.clone());

        let routes = self.routes.lock();
        let route = routes.iter().find(|route| {
            route.collection == request.collection
                && route.predicate.as_ref().is_none_or(|p| p(request))
        });
        match route.map(|r| &r.response) {
            Some(Ok(body)) => SearchResponse::from_json(body.clone()),
            Some(Err(reason)) => Err(DataError::backend_unavailable("mock", reason.clone())),
            None => SearchResponse::from_json(hits_response("", Vec::new())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}

/// Raw search response holding `docs`, all read from `index`
pub fn hits_response(index: &str, docs: Vec<Value>) -> Value {
    let hits: Vec<Value> = docs
        .into_iter()
        .map(|doc| json!({ "_index": index, "_source": doc }))
        .collect();
    json!({ "hits": { "total": { "value": hits.len() }, "hits": hits } })
}

/// Raw search response with only aggregation results
pub fn agg_response(total: u64, aggregations: Value) -> Value {
    json!({ "hits": { "total": { "value": total }, "hits": [] }, "aggregations": aggregations })
}

/// Does the rendered query mention `needle` anywhere
pub fn query_contains(request: &SearchRequest, needle: &str) -> bool {
    request.query.to_json().to_string().contains(needle)
}

/// Whether the request carries an aggregation named `name`
pub fn has_aggregation(request: &SearchRequest, name: &str) -> bool {
    request
        .aggregations
        .as_ref()
        .is_some_and(|aggs| aggs.get(name).is_some())
}
