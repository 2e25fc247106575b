use crate::models::{CoordinateError, GeoQuery, Location, Post, Radius, RadiusError};
use crate::search_index::SearchIndex;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(#[from] CoordinateError),

    #[error(transparent)]
    InvalidRadius(#[from] RadiusError),

    #[error("Search failed: {0:#}")]
    Backend(anyhow::Error),
}

impl SearchError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SearchError::Backend(_))
    }
}

/// Query string of `GET /search`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub lat: Option<String>,
    pub lon: Option<String>,
    /// Kilometres, numeric text without unit
    pub range: Option<String>,
}

/// Radius search over indexed posts
pub struct GeoQueryService {
    index: Arc<dyn SearchIndex>,
    default_radius: Radius,
}

impl GeoQueryService {
    pub fn new(index: Arc<dyn SearchIndex>, default_radius_km: f64) -> Result<Self, RadiusError> {
        Ok(Self {
            index,
            default_radius: Radius::from_km(default_radius_km)?,
        })
    }

    /// Translate raw parameters into a geo query. A missing or empty
    /// `range` falls back to the default radius.
    pub fn build_query(&self, params: &SearchParams) -> Result<GeoQuery, SearchError> {
        let center = Location::parse(params.lat.as_deref(), params.lon.as_deref())?;

        let radius = match params.range.as_deref().map(str::trim) {
            Some(range) if !range.is_empty() => Radius::parse_km(range)?,
            _ => self.default_radius,
        };

        Ok(GeoQuery { center, radius })
    }

    /// Posts within the radius, in index order. No match is an empty result.
    #[instrument(skip(self))]
    pub async fn search(&self, params: &SearchParams) -> Result<Vec<Post>, SearchError> {
        let query = self.build_query(params)?;

        info!(
            lat = query.center.lat,
            lon = query.center.lon,
            radius = %query.radius,
            "Search received"
        );

        let hits = self
            .index
            .search_near(&query)
            .await
            .map_err(SearchError::Backend)?;

        let posts: Vec<Post> = hits
            .inspect(|p| {
                debug!(user = %p.user, message = %p.message, lat = p.location.lat, lon = p.location.lon, "Post found")
            })
            .collect();

        metrics::counter!("around.searches").increment(1);
        info!(found = posts.len(), "Search finished");

        Ok(posts)
    }
}
