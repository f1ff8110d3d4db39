//! Read-only views over a project's villages: dashboard summary, contact
//! directory and proximity lookup.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::models::{GeoPoint, Parent, Village, VillageStatus};

/// Visits due within this many days count as upcoming.
pub const UPCOMING_WINDOW_DAYS: i64 = 14;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitSummary {
    pub total: usize,
    pub visited: usize,
    pub not_visited: usize,
    pub planned: usize,
    /// Share of villages visited, 0-100 with one decimal.
    pub coverage_percent: f64,
    /// Ids whose next visit target is before `today`.
    pub overdue: Vec<String>,
    /// Ids with a next visit target in `[today, today + 14 days]`.
    pub upcoming: Vec<String>,
    pub total_population: u64,
}

impl VisitSummary {
    pub fn from_villages<'a>(villages: impl IntoIterator<Item = &'a Village>, today: NaiveDate) -> Self {
        let horizon = today + Duration::days(UPCOMING_WINDOW_DAYS);
        let mut summary = Self::default();

        for village in villages {
            summary.total += 1;
            match village.status {
                VillageStatus::Visited => summary.visited += 1,
                VillageStatus::NotVisited => summary.not_visited += 1,
                VillageStatus::Planned => summary.planned += 1,
            }
            summary.total_population = summary
                .total_population
                .saturating_add(village.details.population.unwrap_or(0));

            if let Some(target) = next_target(village) {
                if target < today {
                    summary.overdue.push(village.id.clone());
                } else if target <= horizon {
                    summary.upcoming.push(village.id.clone());
                }
            }
        }

        if summary.total > 0 {
            let ratio = summary.visited as f64 / summary.total as f64;
            summary.coverage_percent = (ratio * 1000.0).round() / 10.0;
        }
        summary
    }
}

/// Earliest follow-up date across the village and its contacts.
fn next_target(village: &Village) -> Option<NaiveDate> {
    std::iter::once(village.details.next_visit_target)
        .chain(village.parents.iter().map(|p| p.next_visit_target))
        .flatten()
        .min()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactEntry {
    pub village_id: String,
    pub village_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tehsil: Option<String>,
    pub status: VillageStatus,
    #[serde(flatten)]
    pub parent: Parent,
}

/// Every contact across `villages`, sorted by contact name then village.
///
/// `query` matches case-insensitively against contact name, phone, village
/// name and tehsil.
pub fn contact_directory<'a>(
    villages: impl IntoIterator<Item = &'a Village>,
    query: Option<&str>,
) -> Vec<ContactEntry> {
    let needle = query
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());

    let mut entries: Vec<ContactEntry> = villages
        .into_iter()
        .flat_map(|village| {
            village.contacts().into_iter().map(move |parent| ContactEntry {
                village_id: village.id.clone(),
                village_name: village.name.clone(),
                tehsil: village.details.tehsil.clone(),
                status: village.status,
                parent,
            })
        })
        .filter(|entry| match &needle {
            Some(needle) => matches_query(entry, needle),
            None => true,
        })
        .collect();

    entries.sort_by(|a, b| {
        a.parent
            .name
            .to_lowercase()
            .cmp(&b.parent.name.to_lowercase())
            .then_with(|| a.village_name.cmp(&b.village_name))
    });
    entries
}

fn matches_query(entry: &ContactEntry, needle: &str) -> bool {
    [
        Some(entry.parent.name.as_str()),
        entry.parent.contact.as_deref(),
        Some(entry.village_name.as_str()),
        entry.tehsil.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(needle))
}

/// Villages within `radius_meters` of `center`, nearest first.
pub fn villages_near<'a>(
    villages: impl IntoIterator<Item = &'a Village>,
    center: &GeoPoint,
    radius_meters: f64,
) -> Vec<(&'a Village, f64)> {
    let mut near: Vec<_> = villages
        .into_iter()
        .map(|village| (village, village.location.distance_meters(center)))
        .filter(|(_, distance)| *distance <= radius_meters)
        .collect();
    near.sort_by(|a, b| a.1.total_cmp(&b.1));
    near
}
