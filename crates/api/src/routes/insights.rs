//! Dashboard, contact directory and proximity views over a project's pins.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use domain::models::{GeoPoint, Village};
use domain::services::{contact_directory, villages_near, ContactEntry, VisitSummary};

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;
use crate::routes::pins::load_villages;
use crate::routes::projects::owned_project;

/// GET /api/v1/projects/:project_id/summary
pub async fn summary(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(project_id): Path<String>,
) -> Result<Json<VisitSummary>, ApiError> {
    owned_project(&state, auth.user_id, &project_id).await?;
    let (villages, _) = load_villages(&state, &project_id).await?;
    Ok(Json(VisitSummary::from_villages(
        &villages,
        Utc::now().date_naive(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct ContactsQuery {
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactsResponse {
    pub contacts: Vec<ContactEntry>,
    pub total: usize,
}

/// GET /api/v1/projects/:project_id/contacts?q=
pub async fn contacts(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(project_id): Path<String>,
    Query(query): Query<ContactsQuery>,
) -> Result<Json<ContactsResponse>, ApiError> {
    owned_project(&state, auth.user_id, &project_id).await?;
    let (villages, _) = load_villages(&state, &project_id).await?;
    let contacts = contact_directory(&villages, query.q.as_deref());
    Ok(Json(ContactsResponse {
        total: contacts.len(),
        contacts,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct NearbyQuery {
    #[validate(range(min = -90.0, max = 90.0, message = "lat must be between -90 and 90"))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "lng must be between -180 and 180"))]
    pub lng: f64,
    #[validate(range(min = 1.0, max = 500000.0, message = "radius must be 1-500000 meters"))]
    #[serde(default = "default_radius")]
    pub radius: f64,
}

fn default_radius() -> f64 {
    10_000.0
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyVillage {
    #[serde(flatten)]
    pub village: Village,
    pub distance_meters: f64,
}

/// GET /api/v1/projects/:project_id/nearby?lat=&lng=&radius=
///
/// Pins within `radius` meters (default 10 km), nearest first.
pub async fn nearby(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(project_id): Path<String>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyVillage>>, ApiError> {
    query.validate()?;
    owned_project(&state, auth.user_id, &project_id).await?;

    let center = GeoPoint::new(query.lat, query.lng)?;
    let (villages, _) = load_villages(&state, &project_id).await?;
    let near = villages_near(&villages, &center, query.radius)
        .into_iter()
        .map(|(village, distance)| NearbyVillage {
            village: village.clone(),
            distance_meters: distance.round(),
        })
        .collect();
    Ok(Json(near))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearby_query_validation() {
        let ok = NearbyQuery {
            lat: 26.9,
            lng: 75.8,
            radius: 5000.0,
        };
        assert!(ok.validate().is_ok());

        let bad_lat = NearbyQuery {
            lat: 91.0,
            lng: 75.8,
            radius: 5000.0,
        };
        assert!(bad_lat.validate().is_err());

        let bad_radius = NearbyQuery {
            lat: 26.9,
            lng: 75.8,
            radius: 0.0,
        };
        assert!(bad_radius.validate().is_err());
    }

    #[test]
    fn test_nearby_query_default_radius() {
        let query: NearbyQuery = serde_json::from_str(r#"{"lat": 1.0, "lng": 2.0}"#).unwrap();
        assert_eq!(query.radius, 10_000.0);
    }
}
