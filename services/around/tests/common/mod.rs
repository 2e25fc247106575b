//! In-memory backends and request helpers for driving the router in-process.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use around_service::config::{ApiConfig, AuthConfig};
use around_service::{
    create_router, AppState, BlobStore, CredentialStore, GeoQuery, GeoQueryService, Location,
    Mutation, Post, PostHits, PostIngestion, RecordStore, SearchIndex, TokenService, User,
};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use http_body_util::BodyExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const BUCKET: &str = "post-images";
pub const SECRET: &str = "integration-secret";

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance in kilometres (haversine)
pub fn haversine_km(a: Location, b: Location) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[derive(Default)]
struct IndexState {
    created: bool,
    creations: usize,
    posts: Vec<Post>,
    users: HashMap<String, User>,
}

/// Search index keeping documents in memory; distance <= radius is a match
#[derive(Default)]
pub struct InMemoryIndex {
    state: Mutex<IndexState>,
    calls: AtomicUsize,
}

impl InMemoryIndex {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn creations(&self) -> usize {
        self.state.lock().unwrap().creations
    }

    pub fn posts(&self) -> Vec<Post> {
        self.state.lock().unwrap().posts.clone()
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn ensure_schema(&self) -> Result<bool> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        if state.created {
            return Ok(false);
        }
        state.created = true;
        state.creations += 1;
        Ok(true)
    }

    async fn index_exists(&self) -> Result<bool> {
        self.touch();
        Ok(self.state.lock().unwrap().created)
    }

    async fn index_post(&self, id: &str, post: &Post) -> Result<()> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        state.posts.retain(|p| p.id != id);
        state.posts.push(post.clone());
        Ok(())
    }

    async fn search_near(&self, query: &GeoQuery) -> Result<PostHits> {
        self.touch();
        let state = self.state.lock().unwrap();
        let matches = state
            .posts
            .iter()
            .filter(|p| haversine_km(query.center, p.location) <= query.radius.km())
            .cloned()
            .collect();
        Ok(PostHits::from_posts(matches))
    }

    async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        self.touch();
        let state = self.state.lock().unwrap();
        Ok(state.posts.iter().find(|p| p.id == id).cloned())
    }

    async fn delete_post(&self, id: &str) -> Result<()> {
        self.touch();
        self.state.lock().unwrap().posts.retain(|p| p.id != id);
        Ok(())
    }

    async fn find_user_by_name(&self, username: &str) -> Result<Option<User>> {
        self.touch();
        Ok(self.state.lock().unwrap().users.get(username).cloned())
    }

    async fn index_user(&self, user: &User) -> Result<()> {
        self.touch();
        self.state
            .lock()
            .unwrap()
            .users
            .insert(user.username.clone(), user.clone());
        Ok(())
    }
}

/// Blob store with a fixed set of existing buckets
pub struct InMemoryBlobStore {
    buckets: HashSet<String>,
    objects: Mutex<HashMap<(String, String), Bytes>>,
    calls: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn with_buckets(buckets: &[&str]) -> Self {
        Self {
            buckets: buckets.iter().map(|b| b.to_string()).collect(),
            objects: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn object(&self, bucket: &str, id: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store(
        &self,
        bucket: &str,
        object_id: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.buckets.contains(bucket) {
            return Err(anyhow!("bucket {} does not exist", bucket));
        }
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), object_id.to_string()), data);
        Ok(format!("memory://{}/{}", bucket, object_id))
    }

    async fn delete(&self, bucket: &str, object_id: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.buckets.contains(bucket) {
            return Err(anyhow!("bucket {} does not exist", bucket));
        }
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), object_id.to_string()));
        Ok(true)
    }
}

/// Record store keeping the last mutation per row
#[derive(Default)]
pub struct InMemoryRecordStore {
    rows: Mutex<HashMap<String, Mutation>>,
    calls: AtomicUsize,
}

impl InMemoryRecordStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn row(&self, key: &str) -> Option<Mutation> {
        self.rows.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn append(&self, post_id: &str, post: &Post) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.rows
            .lock()
            .unwrap()
            .insert(post_id.to_string(), Mutation::for_post(post, Utc::now()));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub index: Arc<InMemoryIndex>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub records: Arc<InMemoryRecordStore>,
    pub tokens: Arc<TokenService>,
}

pub struct TestAppBuilder {
    blobs: InMemoryBlobStore,
    require_media: bool,
}

impl TestAppBuilder {
    pub fn blobs(mut self, blobs: InMemoryBlobStore) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn require_media(mut self, require_media: bool) -> Self {
        self.require_media = require_media;
        self
    }

    pub fn build(self) -> TestApp {
        let index = Arc::new(InMemoryIndex::default());
        let blobs = Arc::new(self.blobs);
        let records = Arc::new(InMemoryRecordStore::default());

        let credentials = CredentialStore::new(index.clone());
        let tokens = Arc::new(TokenService::new(
            &AuthConfig::new(SECRET),
            credentials.clone(),
        ));
        let ingestion = Arc::new(PostIngestion::new(
            index.clone(),
            blobs.clone(),
            records.clone(),
            BUCKET,
            self.require_media,
        ));
        let geo = Arc::new(GeoQueryService::new(index.clone(), 200.0).unwrap());

        let state = AppState {
            tokens: tokens.clone(),
            credentials,
            ingestion,
            geo,
            index: index.clone(),
            records: records.clone(),
        };

        TestApp {
            router: create_router(state, &ApiConfig::default()),
            index,
            blobs,
            records,
            tokens,
        }
    }
}

pub fn test_app() -> TestAppBuilder {
    TestAppBuilder {
        blobs: InMemoryBlobStore::with_buckets(&[BUCKET]),
        require_media: false,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).unwrap()
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> TestResponse {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn signup(&self, username: &str, password: &str) -> TestResponse {
        self.post_json(
            "/signup",
            serde_json::json!({
                "username": username,
                "password": password,
                "age": 25,
                "gender": "female"
            }),
        )
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> TestResponse {
        self.post_json(
            "/login",
            serde_json::json!({ "username": username, "password": password }),
        )
        .await
    }

    pub fn token_for(&self, username: &str) -> String {
        self.tokens.issue(username).unwrap()
    }

    pub async fn create_post(
        &self,
        token: Option<&str>,
        fields: &[(&str, &str)],
        image: Option<(&str, &[u8])>,
    ) -> TestResponse {
        let (content_type, body) = multipart_body(fields, image);
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/post")
            .header(header::CONTENT_TYPE, content_type);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(request.body(Body::from(body)).unwrap()).await
    }

    pub async fn delete_post(&self, token: Option<&str>, id: &str) -> TestResponse {
        let mut request = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/post/{}", id));
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    pub async fn search(&self, token: Option<&str>, query: &str) -> TestResponse {
        let mut request = Request::builder()
            .method(Method::GET)
            .uri(format!("/search?{}", query));
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    pub async fn search_posts(&self, token: &str, query: &str) -> Vec<Post> {
        let response = self.search(Some(token), query).await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.text());
        response.json()
    }
}

const BOUNDARY: &str = "around-test-boundary";

/// Encode form fields and an optional `image` part as multipart/form-data
pub fn multipart_body(fields: &[(&str, &str)], image: Option<(&str, &[u8])>) -> (String, Vec<u8>) {
    let mut body = Vec::new();

    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }

    if let Some((content_type, data)) = image {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"image.jpg\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

pub fn post_at(id: &str, lat: f64, lon: f64) -> Post {
    Post {
        id: id.to_string(),
        user: "seed".to_string(),
        message: format!("post {}", id),
        location: Location { lat, lon },
        media_url: None,
    }
}
