//! Pin endpoints and the live pin stream.
//!
//! Writes go straight to the store; clients see their own change when it
//! comes back on the stream, like everyone else's.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use domain::models::{SnapshotBatch, Village, VillageDocument};
use domain::services::{StoreError, StoreEvent, SubscriptionHandle, SubscriptionRegistry};
use shared::crypto::random_document_id;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;
use crate::middleware::metrics::{record_stream_closed, record_stream_opened};
use crate::routes::projects::owned_project;

const PIN_ID_LENGTH: usize = 20;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPinsResponse {
    pub pins: Vec<Village>,
    pub total: usize,
    /// Stored documents that no longer pass validation.
    pub skipped: usize,
}

/// Every valid pin in the project, ordered by id.
pub async fn load_villages(
    state: &AppState,
    project_id: &str,
) -> Result<(Vec<Village>, usize), ApiError> {
    let rows = state.pins.list_for_project(project_id).await?;
    let mut villages = Vec::with_capacity(rows.len());
    let mut skipped = 0;

    for row in rows {
        let pin_id = row.pin_id.clone();
        match Village::try_from(row) {
            Ok(village) => villages.push(village),
            Err(e) => {
                skipped += 1;
                warn!(
                    project_id = %project_id,
                    pin_id = %pin_id,
                    error = %e,
                    "Skipping invalid stored pin"
                );
            }
        }
    }
    Ok((villages, skipped))
}

/// GET /api/v1/projects/:project_id/pins
pub async fn list_pins(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(project_id): Path<String>,
) -> Result<Json<ListPinsResponse>, ApiError> {
    owned_project(&state, auth.user_id, &project_id).await?;
    let (pins, skipped) = load_villages(&state, &project_id).await?;
    Ok(Json(ListPinsResponse {
        total: pins.len(),
        pins,
        skipped,
    }))
}

/// POST /api/v1/projects/:project_id/pins
///
/// Uses the body's `id` when present, otherwise generates one.
pub async fn create_pin(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(project_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Village>), ApiError> {
    owned_project(&state, auth.user_id, &project_id).await?;

    let document = VillageDocument::from_json(body)?;
    let pin_id = match document.id.clone() {
        Some(id) => {
            if state.pins.find(&project_id, &id).await?.is_some() {
                return Err(ApiError::Conflict(format!("Pin {} already exists", id)));
            }
            id
        }
        None => random_document_id(PIN_ID_LENGTH),
    };

    let village = Village::from_document(&pin_id, document)?;
    state.store.write(&project_id, &village).await?;

    info!(project_id = %project_id, pin_id = %pin_id, "Pin created");
    Ok((StatusCode::CREATED, Json(village)))
}

/// PUT /api/v1/projects/:project_id/pins/:pin_id
///
/// Replaces the whole document, creating the pin if it does not exist.
pub async fn put_pin(
    State(state): State<AppState>,
    auth: UserAuth,
    Path((project_id, pin_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Village>, ApiError> {
    owned_project(&state, auth.user_id, &project_id).await?;

    let village = Village::from_document(&pin_id, VillageDocument::from_json(body)?)?;
    state.store.write(&project_id, &village).await?;

    debug!(project_id = %project_id, pin_id = %pin_id, "Pin saved");
    Ok(Json(village))
}

/// DELETE /api/v1/projects/:project_id/pins/:pin_id
pub async fn delete_pin(
    State(state): State<AppState>,
    auth: UserAuth,
    Path((project_id, pin_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    owned_project(&state, auth.user_id, &project_id).await?;
    state.store.delete(&project_id, &pin_id).await?;

    info!(project_id = %project_id, pin_id = %pin_id, "Pin deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Registers an open stream for its user; dropping the stream forgets it
/// and decrements the open-stream gauge.
struct StreamGuard {
    streams: Arc<SubscriptionRegistry<Uuid>>,
    user_id: Uuid,
    subscription_id: Uuid,
}

impl StreamGuard {
    fn open(
        streams: Arc<SubscriptionRegistry<Uuid>>,
        user_id: Uuid,
        handle: SubscriptionHandle,
    ) -> Self {
        let subscription_id = handle.id();
        streams.register(user_id, handle);
        record_stream_opened();
        Self {
            streams,
            user_id,
            subscription_id,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.streams.release(&self.user_id, self.subscription_id);
        record_stream_closed();
    }
}

/// GET /api/v1/projects/:project_id/pins/stream
///
/// Server-sent events: one `snapshot` with the full pin set, then a `change`
/// per delta batch. A store failure is sent as an `error` event and ends the
/// stream; a client reconnects to resynchronise. Closing the connection or
/// signing out unsubscribes.
pub async fn stream_pins(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(project_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    owned_project(&state, auth.user_id, &project_id).await?;

    let subscription = state.store.subscribe(&project_id).await?;
    let guard = StreamGuard::open(state.streams.clone(), auth.user_id, subscription.handle());
    info!(
        user_id = %auth.user_id,
        project_id = %project_id,
        subscription_id = %subscription.handle().id(),
        "Pin stream opened"
    );

    let events = stream::unfold(
        Some((subscription, guard)),
        |open| async move {
            let (mut subscription, guard) = open?;
            match subscription.next_event().await? {
                StoreEvent::Snapshot(batch) => {
                    Some((Ok(batch_event(&batch)), Some((subscription, guard))))
                }
                StoreEvent::Error(err) => {
                    warn!(project_id = %subscription.project_id(), error = %err, "Pin stream failed");
                    // Dropping the subscription here unsubscribes.
                    Some((Ok(error_event(&err)), None))
                }
            }
        },
    );

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(state.config.store.keep_alive())))
}

fn batch_event(batch: &SnapshotBatch) -> Event {
    let name = if batch.is_initial() { "snapshot" } else { "change" };
    match Event::default().event(name).json_data(batch) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Failed to encode pin batch");
            Event::default()
                .event("error")
                .data(r#"{"error":"internal_error","message":"Failed to encode batch","retryable":true}"#)
        }
    }
}

fn error_event(err: &StoreError) -> Event {
    let code = ApiError::from(err.clone()).code();
    let payload = json!({
        "error": code,
        "message": err.to_string(),
        "retryable": err.is_retryable(),
    });
    Event::default().event("error").data(payload.to_string())
}

/// Ends every pin stream the user has open. Returns how many were live.
pub fn close_streams_for(state: &AppState, user_id: Uuid) -> usize {
    state.streams.cancel_owner(&user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use domain::models::PinChange;
    use std::time::Duration;

    async fn render(events: Vec<Event>) -> String {
        let body = Sse::new(stream::iter(events.into_iter().map(Ok::<_, Infallible>)))
            .into_response()
            .into_body();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn name_of(frame: &str) -> Option<&str> {
        frame
            .lines()
            .find_map(|line| line.strip_prefix("event:"))
            .map(str::trim)
    }

    fn data_of(frame: &str) -> Value {
        let data = frame
            .lines()
            .find_map(|line| line.strip_prefix("data:"))
            .unwrap();
        serde_json::from_str(data.trim()).unwrap()
    }

    #[test]
    fn test_generated_pin_id_is_valid() {
        let id = random_document_id(PIN_ID_LENGTH);
        assert!(shared::validation::validate_document_id(&id).is_ok());
    }

    #[tokio::test]
    async fn test_closed_project_renders_final_error() {
        let text = render(vec![error_event(&StoreError::ProjectClosed("p1".to_string()))]).await;

        assert_eq!(name_of(&text), Some("error"));
        let data = data_of(&text);
        assert_eq!(data["error"], "gone");
        assert_eq!(data["retryable"], false);
        assert_eq!(data["message"], "Project p1 was closed");
    }

    #[tokio::test]
    async fn test_timeout_renders_retryable_error() {
        let text = render(vec![error_event(&StoreError::Timeout(Duration::from_secs(5)))]).await;

        let data = data_of(&text);
        assert_eq!(data["error"], "service_unavailable");
        assert_eq!(data["retryable"], true);
    }

    #[tokio::test]
    async fn test_batches_render_as_snapshot_then_change() {
        let initial = SnapshotBatch::initial(vec![]);
        let delta = SnapshotBatch::delta(vec![PinChange::removed("v1", 3)]);
        let text = render(vec![batch_event(&initial), batch_event(&delta)]).await;

        let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(name_of(frames[0]), Some("snapshot"));
        assert_eq!(data_of(frames[0])["kind"], "initial");
        assert_eq!(name_of(frames[1]), Some("change"));
        let delta = data_of(frames[1]);
        assert_eq!(delta["kind"], "delta");
        assert_eq!(delta["changes"][0]["pinId"], "v1");
        assert_eq!(delta["changes"][0]["kind"], "removed");
    }

    #[test]
    fn test_dropped_stream_leaves_registry() {
        let streams = Arc::new(SubscriptionRegistry::new());
        let user_id = Uuid::new_v4();
        let handle = SubscriptionHandle::new("p1");

        let guard = StreamGuard::open(streams.clone(), user_id, handle);
        assert_eq!(streams.active_count(&user_id), 1);

        drop(guard);
        assert_eq!(streams.owner_count(), 0);
        assert_eq!(streams.cancel_owner(&user_id), 0);
    }
}
