//! Map search and pin placement state for one session.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::GeoPoint;

/// A location resolved by the geocoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeResult {
    pub label: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SearchState {
    #[default]
    Idle,
    SearchOpen,
    ResultDisplayed(GeocodeResult),
    PlacingPin,
}

/// Search modal and placement mode, scoped to the selected project.
///
/// Exactly one [`SearchState`] is active at a time. Search can only be
/// opened while a project is selected.
#[derive(Debug, Clone, Default)]
pub struct MapSearchSession {
    current_project_id: Option<String>,
    state: SearchState,
}

impl MapSearchSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    pub fn current_project_id(&self) -> Option<&str> {
        self.current_project_id.as_deref()
    }

    /// Selecting a different project (or none) drops any search in progress.
    pub fn select_project(&mut self, project_id: Option<String>) {
        if self.current_project_id != project_id {
            debug!(project_id = ?project_id, "Map search project changed");
            self.current_project_id = project_id;
            self.state = SearchState::Idle;
        }
    }

    /// Opens the search modal with no result shown.
    /// Returns `false` (and does nothing) when no project is selected.
    pub fn open_search(&mut self) -> bool {
        if self.current_project_id.is_none() {
            return false;
        }
        self.state = SearchState::SearchOpen;
        true
    }

    /// Shows a geocode result. Ignored unless the modal is open and waiting.
    pub fn resolve_location(&mut self, result: GeocodeResult) -> bool {
        if self.state != SearchState::SearchOpen {
            return false;
        }
        self.state = SearchState::ResultDisplayed(result);
        true
    }

    pub fn clear_result(&mut self) {
        if matches!(self.state, SearchState::ResultDisplayed(_)) {
            self.state = SearchState::Idle;
        }
    }

    pub fn close_search(&mut self) {
        if self.is_search_modal_open() {
            self.state = SearchState::Idle;
        }
    }

    /// Enters pin placement from any state.
    pub fn trigger_map_search_control(&mut self) {
        self.state = SearchState::PlacingPin;
    }

    /// Finishes placement, returning the chosen point.
    pub fn complete_placement(&mut self, point: GeoPoint) -> Option<GeoPoint> {
        if self.state != SearchState::PlacingPin {
            return None;
        }
        self.state = SearchState::Idle;
        Some(point)
    }

    pub fn cancel_placement(&mut self) {
        if self.state == SearchState::PlacingPin {
            self.state = SearchState::Idle;
        }
    }

    pub fn is_search_modal_open(&self) -> bool {
        matches!(
            self.state,
            SearchState::SearchOpen | SearchState::ResultDisplayed(_)
        )
    }

    pub fn location_for_modal_display(&self) -> Option<&GeocodeResult> {
        match &self.state {
            SearchState::ResultDisplayed(result) => Some(result),
            _ => None,
        }
    }

    pub fn is_map_search_control_visible(&self) -> bool {
        self.state == SearchState::PlacingPin
    }
}
