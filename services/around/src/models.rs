use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A coordinate in double-precision degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// Rejected coordinate input
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinateError {
    #[error("Missing {0}")]
    Missing(&'static str),

    #[error("Malformed {field}: {value:?}")]
    Malformed { field: &'static str, value: String },

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

impl Location {
    /// Build a location, enforcing -90 <= lat <= 90 and -180 <= lon <= 180
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::OutOfRange {
                field: "lat",
                value: lat,
            });
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::OutOfRange {
                field: "lon",
                value: lon,
            });
        }
        Ok(Self { lat, lon })
    }

    /// Parse textual form fields. Malformed text is rejected instead of
    /// being coerced to zero.
    pub fn parse(lat: Option<&str>, lon: Option<&str>) -> Result<Self, CoordinateError> {
        let lat = parse_degrees("lat", lat)?;
        let lon = parse_degrees("lon", lon)?;
        Self::new(lat, lon)
    }
}

fn parse_degrees(field: &'static str, value: Option<&str>) -> Result<f64, CoordinateError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(CoordinateError::Missing(field))?;

    value.parse::<f64>().map_err(|_| CoordinateError::Malformed {
        field,
        value: value.to_string(),
    })
}

/// A geo-tagged post. Each backing store holds a projection of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user: String,
    pub message: String,
    pub location: Location,
    #[serde(rename = "url", default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

/// Credential record, stored in the search index next to posts
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Absent fields read as empty and are rejected by signup validation
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub age: i32,
    #[serde(default)]
    pub gender: String,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("age", &self.age)
            .field("gender", &self.gender)
            .finish()
    }
}

/// Lower-case a username; identity is case-insensitive.
pub fn normalize_username(username: &str) -> String {
    username.to_lowercase()
}

/// Search radius in kilometres. Displays with its unit suffix, e.g. `200km`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Radius {
    km: f64,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid range {0:?}: expected a positive number of kilometres")]
pub struct RadiusError(pub String);

impl Radius {
    pub fn from_km(km: f64) -> Result<Self, RadiusError> {
        if km.is_finite() && km > 0.0 {
            Ok(Self { km })
        } else {
            Err(RadiusError(km.to_string()))
        }
    }

    /// Parse the caller's numeric `range` text; the unit is never part of it.
    pub fn parse_km(value: &str) -> Result<Self, RadiusError> {
        let km = value
            .trim()
            .parse::<f64>()
            .map_err(|_| RadiusError(value.to_string()))?;
        Self::from_km(km).map_err(|_| RadiusError(value.to_string()))
    }

    pub fn km(&self) -> f64 {
        self.km
    }
}

impl fmt::Display for Radius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}km", self.km)
    }
}

/// One radius search; lives for the duration of a single call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoQuery {
    pub center: Location,
    pub radius: Radius,
}
