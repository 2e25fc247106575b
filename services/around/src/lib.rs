//! Around Service
//!
//! Geo-aware post service. Authenticated clients submit a text+image post
//! tagged with a coordinate, and query the posts within a radius of a
//! coordinate.
//!
//! ## Features
//!
//! - **Session Tokens**: HMAC-signed, 24h tokens issued on login and checked
//!   before any mutating or searching handler runs
//! - **Post Ingestion**: one logical write fanned out to S3 (media),
//!   an Elasticsearch-compatible index (search) and a wide-column record
//!   table in PostgreSQL (audit)
//! - **Geo Search**: geo-distance queries against a `geo_point` mapping,
//!   200km radius by default
//!
//! ## Architecture
//!
//! ```text
//!  POST /signup, /login           POST /post                 GET /search
//!        │                            │                           │
//!        ▼                            ▼                           ▼
//! ┌──────────────┐            ┌──────────────┐            ┌──────────────┐
//! │ Credential   │◀───────────│ Token        │───────────▶│ Geo Query    │
//! │ Store        │            │ Service      │            │ Service      │
//! └──────────────┘            └──────────────┘            └──────────────┘
//!        │                            │                           │
//!        │                            ▼                           │
//!        │                    ┌──────────────┐                    │
//!        │                    │ Post         │                    │
//!        │                    │ Ingestion    │                    │
//!        │                    └──────────────┘                    │
//!        │                   ①  │    ②  │    ③  │                 │
//!        │                      ▼       │       ▼                 │
//!        │             ┌──────────┐     │   ┌──────────┐          │
//!        │             │ S3       │     │   │ Record   │          │
//!        │             │ Blobs    │     │   │ Store    │          │
//!        │             └──────────┘     ▼   └──────────┘          │
//!        │                      ┌──────────────┐                  │
//!        └─────────────────────▶│ Search Index │◀─────────────────┘
//!                               └──────────────┘
//! ```
//!
//! The three stores are written in order without a transaction; see
//! [`ingest`] for what each failure leaves behind.

pub mod api;
pub mod auth;
pub mod blob_store;
pub mod config;
pub mod credentials;
pub mod error;
pub mod geo_query;
pub mod ingest;
pub mod models;
pub mod record_store;
pub mod search_index;

pub use api::{create_router, start_api_server, AppState};
pub use auth::{AuthError, AuthUser, Claims, TokenService};
pub use blob_store::{BlobStore, S3BlobStore};
pub use config::Config;
pub use credentials::{CredentialStore, SignupError};
pub use error::ApiError;
pub use geo_query::{GeoQueryService, SearchError, SearchParams};
pub use ingest::{IngestError, MediaUpload, PostIngestion, PostSubmission, RemoveError};
pub use models::{GeoQuery, Location, Post, Radius, User};
pub use record_store::{Mutation, PgRecordStore, RecordStore};
pub use search_index::{ElasticIndex, PostHits, SearchIndex};
