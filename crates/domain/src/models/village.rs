//! Village (map pin) domain model.
//!
//! A village has a small set of required fields and an optional group of
//! visit/contact details. Untrusted input arrives as a [`VillageDocument`]
//! and only becomes a [`Village`] through [`Village::from_document`].

use chrono::{DateTime, NaiveDate};
use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use validator::Validate;

/// Visit status of a village.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VillageStatus {
    Visited,
    NotVisited,
    Planned,
}

impl VillageStatus {
    pub const ALL: [VillageStatus; 3] = [
        VillageStatus::Visited,
        VillageStatus::NotVisited,
        VillageStatus::Planned,
    ];

    /// Converts to the stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            VillageStatus::Visited => "visited",
            VillageStatus::NotVisited => "not-visited",
            VillageStatus::Planned => "planned",
        }
    }

    /// Parses the stored string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "visited" => Some(VillageStatus::Visited),
            "not-visited" => Some(VillageStatus::NotVisited),
            "planned" => Some(VillageStatus::Planned),
            _ => None,
        }
    }
}

impl std::fmt::Display for VillageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, VillageValidationError> {
        let point = Self { lat, lng };
        point.check_range()?;
        Ok(point)
    }

    fn check_range(&self) -> Result<(), VillageValidationError> {
        shared::validation::validate_latitude(self.lat)
            .map_err(|e| VillageValidationError::from_validator("location.lat", &e))?;
        shared::validation::validate_longitude(self.lng)
            .map_err(|e| VillageValidationError::from_validator("location.lng", &e))?;
        Ok(())
    }

    /// Great-circle distance in meters.
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        Point::new(self.lng, self.lat).haversine_distance(&Point::new(other.lng, other.lat))
    }
}

/// Parent or guardian contact attached to a village.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_interaction: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_visit_target: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Optional visit and contact details.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VillageDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_visit: Option<NaiveDate>,
    /// Single-contact fields written by older clients, before `parents`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_history: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_visit_target: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tehsil: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<u64>,
}

/// A validated village record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Village {
    pub id: String,
    pub name: String,
    pub status: VillageStatus,
    pub location: GeoPoint,
    #[serde(flatten)]
    pub details: VillageDetails,
    #[serde(default)]
    pub parents: Vec<Parent>,
}

/// Rejection reasons at the validation boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VillageValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid `{field}`: {message}")]
    Invalid { field: String, message: String },

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("document id `{found}` does not match `{expected}`")]
    IdMismatch { expected: String, found: String },
}

impl VillageValidationError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    fn from_validator(field: &str, err: &validator::ValidationError) -> Self {
        let message = err
            .message
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| err.code.to_string());
        Self::invalid(field, message)
    }
}

impl From<validator::ValidationErrors> for VillageValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| (field.to_string(), errs.first().cloned()))
            .collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        match fields.into_iter().next() {
            Some((field, Some(err))) => Self::from_validator(&field, &err),
            Some((field, None)) => Self::invalid(field, "invalid value"),
            None => Self::Malformed("validation failed".to_string()),
        }
    }
}

/// Location as it appears in an untrusted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationDocument {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// Parent record as it appears in an untrusted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentDocument {
    pub name: Option<String>,
    pub contact: Option<String>,
    pub last_interaction: Option<String>,
    pub next_visit_target: Option<String>,
    pub notes: Option<String>,
}

/// Raw village document: every field optional, dates as strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VillageDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[validate(length(max = 200, message = "Name must be at most 200 characters"))]
    pub name: Option<String>,
    pub status: Option<String>,
    pub location: Option<LocationDocument>,
    pub last_visit: Option<String>,
    #[validate(length(max = 200, message = "Parent name must be at most 200 characters"))]
    pub parents_name: Option<String>,
    #[validate(length(max = 100, message = "Contact must be at most 100 characters"))]
    pub parents_contact: Option<String>,
    #[validate(length(max = 10000, message = "Interaction history is too long"))]
    pub interaction_history: Option<String>,
    pub next_visit_target: Option<String>,
    #[validate(length(max = 10000, message = "Notes are too long"))]
    pub notes: Option<String>,
    #[validate(length(max = 100, message = "Tehsil must be at most 100 characters"))]
    pub tehsil: Option<String>,
    pub population: Option<i64>,
    pub parents: Option<Vec<ParentDocument>>,
}

/// Empty or whitespace-only text is stored as absent.
fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (date part kept).
fn parse_date(field: &str, value: Option<String>) -> Result<Option<NaiveDate>, VillageValidationError> {
    let Some(raw) = non_blank(value) else {
        return Ok(None);
    };
    if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| Some(dt.date_naive()))
        .map_err(|_| VillageValidationError::invalid(field, "expected a YYYY-MM-DD date"))
}

impl ParentDocument {
    fn into_parent(self, index: usize) -> Result<Parent, VillageValidationError> {
        let name = non_blank(self.name).ok_or_else(|| {
            VillageValidationError::invalid(format!("parents[{}].name", index), "name is required")
        })?;
        if name.chars().count() > 200 {
            return Err(VillageValidationError::invalid(
                format!("parents[{}].name", index),
                "name must be at most 200 characters",
            ));
        }
        Ok(Parent {
            name,
            contact: non_blank(self.contact),
            last_interaction: parse_date(
                &format!("parents[{}].lastInteraction", index),
                self.last_interaction,
            )?,
            next_visit_target: parse_date(
                &format!("parents[{}].nextVisitTarget", index),
                self.next_visit_target,
            )?,
            notes: non_blank(self.notes),
        })
    }
}

impl VillageDocument {
    /// Parses a JSON payload; type mismatches are reported as `Malformed`.
    pub fn from_json(value: Value) -> Result<Self, VillageValidationError> {
        serde_json::from_value(value).map_err(|e| VillageValidationError::Malformed(e.to_string()))
    }
}

impl Village {
    /// Validates a raw document for the pin `id`.
    pub fn from_document(
        id: &str,
        document: VillageDocument,
    ) -> Result<Self, VillageValidationError> {
        shared::validation::validate_document_id(id)
            .map_err(|e| VillageValidationError::from_validator("id", &e))?;
        if let Some(found) = document.id.as_deref() {
            if found != id {
                return Err(VillageValidationError::IdMismatch {
                    expected: id.to_string(),
                    found: found.to_string(),
                });
            }
        }
        document.validate()?;

        let name = non_blank(document.name).ok_or(VillageValidationError::MissingField("name"))?;
        let status_raw = document
            .status
            .ok_or(VillageValidationError::MissingField("status"))?;
        let status = VillageStatus::parse(&status_raw).ok_or_else(|| {
            VillageValidationError::invalid(
                "status",
                format!(
                    "`{}` is not one of visited, not-visited, planned",
                    status_raw
                ),
            )
        })?;
        let location = document
            .location
            .ok_or(VillageValidationError::MissingField("location"))?;
        let lat = location
            .lat
            .ok_or(VillageValidationError::MissingField("location.lat"))?;
        let lng = location
            .lng
            .ok_or(VillageValidationError::MissingField("location.lng"))?;
        let location = GeoPoint::new(lat, lng)?;

        let population = match document.population {
            Some(p) if p < 0 => {
                return Err(VillageValidationError::invalid(
                    "population",
                    "population must not be negative",
                ))
            }
            Some(p) => Some(p as u64),
            None => None,
        };

        let details = VillageDetails {
            last_visit: parse_date("lastVisit", document.last_visit)?,
            parents_name: non_blank(document.parents_name),
            parents_contact: non_blank(document.parents_contact),
            interaction_history: non_blank(document.interaction_history),
            next_visit_target: parse_date("nextVisitTarget", document.next_visit_target)?,
            notes: non_blank(document.notes),
            tehsil: non_blank(document.tehsil),
            population,
        };

        let parents = document
            .parents
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, parent)| parent.into_parent(index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: id.to_string(),
            name,
            status,
            location,
            details,
            parents,
        })
    }

    /// Validates a JSON payload for the pin `id`.
    pub fn from_json(id: &str, value: Value) -> Result<Self, VillageValidationError> {
        Self::from_document(id, VillageDocument::from_json(value)?)
    }

    /// Serializes to the wire/document shape.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Applies a partial update: top-level keys overwrite, `null` clears.
    ///
    /// The result goes through the same validation as a full document, so a
    /// patch that clears a required field is rejected.
    pub fn merge_patch(&self, patch: &Value) -> Result<Self, VillageValidationError> {
        let Value::Object(fields) = patch else {
            return Err(VillageValidationError::Malformed(
                "patch must be a JSON object".to_string(),
            ));
        };
        let Value::Object(mut merged) = self.to_json() else {
            return Err(VillageValidationError::Malformed(
                "village did not serialize to an object".to_string(),
            ));
        };

        for (key, value) in fields {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }

        Self::from_json(&self.id, Value::Object(merged))
    }

    /// Every contact for this village, legacy single-contact fields included.
    pub fn contacts(&self) -> Vec<Parent> {
        let mut contacts = self.parents.clone();
        if let Some(name) = &self.details.parents_name {
            if !contacts.iter().any(|p| &p.name == name) {
                contacts.push(Parent {
                    name: name.clone(),
                    contact: self.details.parents_contact.clone(),
                    ..Parent::default()
                });
            }
        }
        contacts
    }
}
