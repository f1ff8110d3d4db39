//! Common validation utilities.

use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

/// Longest accepted project or pin id.
pub const MAX_DOCUMENT_ID_LENGTH: usize = 128;

lazy_static! {
    // Document ids become path segments (`projects/{id}/pins/{id}`).
    static ref DOCUMENT_ID: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap();
}

/// Validates that a latitude value is within valid range (-90 to 90).
pub fn validate_latitude(lat: f64) -> Result<(), ValidationError> {
    if lat.is_finite() && (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        let mut err = ValidationError::new("latitude_range");
        err.message = Some("Latitude must be between -90 and 90".into());
        Err(err)
    }
}

/// Validates that a longitude value is within valid range (-180 to 180).
pub fn validate_longitude(lng: f64) -> Result<(), ValidationError> {
    if lng.is_finite() && (-180.0..=180.0).contains(&lng) {
        Ok(())
    } else {
        let mut err = ValidationError::new("longitude_range");
        err.message = Some("Longitude must be between -180 and 180".into());
        Err(err)
    }
}

/// Validates a project or pin id.
pub fn validate_document_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_DOCUMENT_ID_LENGTH {
        let mut err = ValidationError::new("document_id_length");
        err.message = Some(
            format!("Id must be 1-{} characters", MAX_DOCUMENT_ID_LENGTH).into(),
        );
        return Err(err);
    }
    if !DOCUMENT_ID.is_match(id) {
        let mut err = ValidationError::new("document_id_format");
        err.message = Some(
            "Id may only contain letters, digits, '-' and '_' and must start with a letter or digit"
                .into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Validates that a display name is not blank.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be blank".into());
        Err(err)
    } else {
        Ok(())
    }
}
