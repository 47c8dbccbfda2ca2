//! Per-operation query context

use std::sync::Arc;

use serde_json::json;

use crate::data::documents::CdmDocument;
use crate::data::{
    Collection, FullId, IndexResolver, IndexTarget, SearchBackend, SearchRequest, SearchResponse,
};

use super::error::QueryError;

/// Backend handle plus the resolved schema generation
#[derive(Clone)]
pub struct QueryContext {
    backend: Arc<dyn SearchBackend>,
    indices: IndexResolver,
    page_size: usize,
}

impl QueryContext {
    pub fn new(backend: Arc<dyn SearchBackend>, indices: IndexResolver, page_size: usize) -> Self {
        Self {
            backend,
            indices,
            page_size,
        }
    }

    pub fn indices(&self) -> &IndexResolver {
        &self.indices
    }

    /// Maximum documents fetched by one search
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, QueryError> {
        Ok(self.backend.search(&request).await?)
    }

    /// Every document matching `request`, read in windows of `page_size`
    ///
    /// Pages advance by offset until the reported total is reached. Requests
    /// without a sort are ordered by `_doc` so windows do not overlap.
    pub async fn search_all<T: CdmDocument>(
        &self,
        request: SearchRequest,
    ) -> Result<Vec<T>, QueryError> {
        let request = if request.sort.is_empty() {
            request.sort(vec![json!({ "_doc": { "order": "asc" } })])
        } else {
            request
        };

        let mut docs: Vec<T> = Vec::new();
        let mut offset = request.offset;
        loop {
            let page = request.clone().size(self.page_size).offset(offset);
            let response = self.search(page).await?;
            let fetched = response.hits.len();
            docs.extend(response.documents::<T>()?);
            offset += fetched;

            if docs.len() as u64 >= response.total {
                break;
            }
            if fetched == 0 {
                tracing::warn!(
                    collection = %request.collection,
                    total = response.total,
                    fetched = docs.len(),
                    "Backend ran out of hits before the reported total"
                );
                break;
            }
            tracing::debug!(
                collection = %request.collection,
                total = response.total,
                fetched = docs.len(),
                "Fetching next page"
            );
        }
        Ok(docs)
    }

    /// Index target for `collection` scoped by the first FullID found in `scope`
    ///
    /// `scope` is ordered run, iteration, sample; ids of one entity tree share a
    /// shard, so any FullID pins the search. Without one every index of the
    /// active generation is searched.
    pub fn scoped_target(
        &self,
        collection: Collection,
        scope: &[Option<&EntityRef>],
    ) -> Result<IndexTarget, QueryError> {
        let full = scope.iter().flatten().find_map(|entity| entity.full.as_ref());
        self.indices.resolve(collection, None, None, full)
    }
}

/// Entity id as supplied by a caller: a plain raw id or a FullID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub raw: String,
    pub full: Option<FullId>,
}

impl EntityRef {
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        if FullId::is_full(text) {
            let full = FullId::decode(text)?;
            Ok(Self {
                raw: full.raw.clone(),
                full: Some(full),
            })
        } else {
            Ok(Self {
                raw: text.to_string(),
                full: None,
            })
        }
    }

    pub fn parse_opt(text: Option<&str>) -> Result<Option<Self>, QueryError> {
        text.map(Self::parse).transpose()
    }
}
