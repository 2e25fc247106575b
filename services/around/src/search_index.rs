use crate::config::SearchConfig;
use crate::models::{GeoQuery, Post, User};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

const POST_DOC_TYPE: &str = "post";
const USER_DOC_TYPE: &str = "user";

/// Searchable index holding posts and, as a separate document type, user
/// credentials.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create the index with a geo-point mapping if it does not exist.
    /// Returns `true` when this call created it.
    async fn ensure_schema(&self) -> Result<bool>;

    /// Whether the index exists
    async fn index_exists(&self) -> Result<bool>;

    /// Upsert a post; visible to searches as soon as this returns
    async fn index_post(&self, id: &str, post: &Post) -> Result<()>;

    /// Posts whose location lies within the query radius
    async fn search_near(&self, query: &GeoQuery) -> Result<PostHits>;

    /// Post stored under `id`, if any
    async fn get_post(&self, id: &str) -> Result<Option<Post>>;

    /// Remove a post; an absent id is not an error
    async fn delete_post(&self, id: &str) -> Result<()>;

    /// Exact-match lookup on the (already normalized) username
    async fn find_user_by_name(&self, username: &str) -> Result<Option<User>>;

    async fn index_user(&self, user: &User) -> Result<()>;
}

/// Matching posts, decoded one by one as the sequence is consumed.
///
/// Sources that do not decode as a [`Post`] are skipped.
#[derive(Debug)]
pub struct PostHits {
    sources: std::vec::IntoIter<Value>,
    total: u64,
}

impl PostHits {
    pub fn from_sources(sources: Vec<Value>, total: u64) -> Self {
        Self {
            sources: sources.into_iter(),
            total,
        }
    }

    pub fn from_posts(posts: Vec<Post>) -> Self {
        let total = posts.len() as u64;
        let sources = posts
            .into_iter()
            .filter_map(|p| serde_json::to_value(p).ok())
            .collect();
        Self::from_sources(sources, total)
    }

    /// Total hits reported by the backend
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Iterator for PostHits {
    type Item = Post;

    fn next(&mut self) -> Option<Post> {
        loop {
            let source = self.sources.next()?;
            match serde_json::from_value::<Post>(source) {
                Ok(post) => return Some(post),
                Err(e) => warn!(error = %e, "Skipping search hit that is not a post"),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.sources.len()))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    took: u64,
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Count(u64),
    Object { value: u64 },
}

impl TotalHits {
    fn value(&self) -> u64 {
        match self {
            TotalHits::Count(n) => *n,
            TotalHits::Object { value } => *value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_source")]
    source: Value,
}

/// Elasticsearch-compatible index reached over its REST API
pub struct ElasticIndex {
    client: Client,
    base_url: Url,
    index: String,
    max_hits: usize,
}

impl ElasticIndex {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .with_context(|| format!("Invalid search index URL: {}", config.url))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build search index HTTP client")?;

        info!(url = %base_url, index = %config.index, "Search index client initialized");

        Ok(Self {
            client,
            base_url,
            index: config.index.clone(),
            max_hits: config.max_hits,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Search index URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .push(&self.index)
            .extend(segments);
        Ok(url)
    }

    async fn put_document(&self, id: &str, body: Value) -> Result<()> {
        let mut url = self.url(&["_doc", id])?;
        url.query_pairs_mut().append_pair("refresh", "true");

        self.client
            .put(url)
            .json(&body)
            .send()
            .await
            .context("Failed to reach search index")?
            .error_for_status()
            .context("Search index rejected document")?;

        Ok(())
    }

    async fn search(&self, body: Value) -> Result<SearchResponse> {
        let url = self.url(&["_search"])?;

        self.client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("Failed to reach search index")?
            .error_for_status()
            .context("Search index query failed")?
            .json::<SearchResponse>()
            .await
            .context("Failed to decode search response")
    }
}

/// Index mapping; `location` must be a geo_point so the backend builds a
/// spatial index instead of two plain numbers.
pub fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "doc_type": { "type": "keyword" },
                "username": { "type": "keyword" },
                "user": { "type": "keyword" },
                "message": { "type": "text" },
                "location": { "type": "geo_point" }
            }
        }
    })
}

/// Query body for a geo-distance search over posts
pub fn geo_distance_query(query: &GeoQuery, size: usize) -> Value {
    json!({
        "size": size,
        "query": {
            "bool": {
                "filter": [
                    { "term": { "doc_type": POST_DOC_TYPE } },
                    {
                        "geo_distance": {
                            "distance": query.radius.to_string(),
                            "location": {
                                "lat": query.center.lat,
                                "lon": query.center.lon
                            }
                        }
                    }
                ]
            }
        }
    })
}

fn user_query(username: &str) -> Value {
    json!({
        "size": 1,
        "query": {
            "bool": {
                "filter": [
                    { "term": { "doc_type": USER_DOC_TYPE } },
                    { "term": { "username": username } }
                ]
            }
        }
    })
}

impl GetResponse {
    fn into_post(self) -> Option<Post> {
        let source = self.source.filter(|_| self.found)?;
        if source.get("doc_type").and_then(Value::as_str) == Some(USER_DOC_TYPE) {
            return None;
        }
        serde_json::from_value(source)
            .map_err(|e| warn!(error = %e, "Indexed document is not a post"))
            .ok()
    }
}

fn tagged(mut document: Value, doc_type: &str) -> Value {
    if let Value::Object(ref mut fields) = document {
        fields.insert("doc_type".to_string(), Value::from(doc_type));
    }
    document
}

fn user_document_id(username: &str) -> String {
    format!("user:{}", username)
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    #[instrument(skip(self), fields(index = %self.index))]
    async fn ensure_schema(&self) -> Result<bool> {
        if self.index_exists().await? {
            debug!("Index already exists");
            return Ok(false);
        }

        let response = self
            .client
            .put(self.url(&[])?)
            .json(&index_mapping())
            .send()
            .await
            .context("Failed to reach search index")?;

        let status = response.status();
        if status.is_success() {
            info!("Created index with geo_point mapping");
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            debug!("Index was created concurrently");
            return Ok(false);
        }

        Err(anyhow!("Failed to create index {}: {} {}", self.index, status, body))
    }

    async fn index_exists(&self) -> Result<bool> {
        let response = self
            .client
            .head(self.url(&[])?)
            .send()
            .await
            .context("Failed to reach search index")?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(anyhow!("Unexpected status {} checking index {}", status, self.index)),
        }
    }

    #[instrument(skip(self, post), fields(post_id = %id))]
    async fn index_post(&self, id: &str, post: &Post) -> Result<()> {
        let document = tagged(serde_json::to_value(post)?, POST_DOC_TYPE);
        self.put_document(id, document).await?;

        info!(message = %post.message, "Post is saved to index");
        Ok(())
    }

    #[instrument(skip(self), fields(radius = %query.radius))]
    async fn search_near(&self, query: &GeoQuery) -> Result<PostHits> {
        let response = self
            .search(geo_distance_query(query, self.max_hits))
            .await?;

        let total = response
            .hits
            .total
            .as_ref()
            .map(TotalHits::value)
            .unwrap_or(response.hits.hits.len() as u64);

        info!(took_ms = response.took, total_hits = total, "Geo query finished");

        let sources = response.hits.hits.into_iter().map(|h| h.source).collect();
        Ok(PostHits::from_sources(sources, total))
    }

    #[instrument(skip(self), fields(post_id = %id))]
    async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        let response = self
            .client
            .get(self.url(&["_doc", id])?)
            .send()
            .await
            .context("Failed to reach search index")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let document = response
            .error_for_status()
            .context("Failed to fetch post from index")?
            .json::<GetResponse>()
            .await
            .context("Failed to decode index document")?;

        Ok(document.into_post())
    }

    #[instrument(skip(self), fields(post_id = %id))]
    async fn delete_post(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&["_doc", id])?)
            .send()
            .await
            .context("Failed to reach search index")?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Post already absent from index");
            return Ok(());
        }

        response
            .error_for_status()
            .context("Failed to delete post from index")?;

        info!("Post is deleted from index");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_user_by_name(&self, username: &str) -> Result<Option<User>> {
        let response = self.search(user_query(username)).await?;

        let user = response
            .hits
            .hits
            .into_iter()
            .next()
            .map(|hit| serde_json::from_value::<User>(hit.source))
            .transpose()
            .context("Failed to decode user document")?;

        Ok(user)
    }

    #[instrument(skip(self, user), fields(username = %user.username))]
    async fn index_user(&self, user: &User) -> Result<()> {
        let document = tagged(serde_json::to_value(user)?, USER_DOC_TYPE);
        self.put_document(&user_document_id(&user.username), document)
            .await
    }
}
