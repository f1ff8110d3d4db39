//! Applies store snapshot batches to the local village cache.
//!
//! The remote store is authoritative; this cache only ever changes in
//! response to store events. Each pin's last applied version is kept, so a
//! change that is not newer than what the cache has already seen (a
//! duplicate, or a delta that raced the initial snapshot) is dropped.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::models::{ChangeKind, PinChange, SnapshotBatch, Village, VillageValidationError};

/// Result of applying one change.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOutcome {
    Inserted,
    Updated,
    Evicted,
    /// Removal of a pin the cache did not hold; only the tombstone is kept.
    AlreadyAbsent,
    Stale,
    Rejected(VillageValidationError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedChange {
    pub pin_id: String,
    pub version: i64,
    pub reason: VillageValidationError,
}

/// Summary of one applied batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Ids inserted or updated, in application order.
    pub applied: Vec<String>,
    pub evicted: Vec<String>,
    pub stale: usize,
    pub rejected: Vec<RejectedChange>,
    /// The batch replaced the whole cache.
    pub reset: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Local `pin id -> Village` mapping for one project.
#[derive(Debug, Clone, Default)]
pub struct VillageCache {
    villages: BTreeMap<String, Village>,
    versions: HashMap<String, i64>,
}

impl VillageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pin_id: &str) -> Option<&Village> {
        self.villages.get(pin_id)
    }

    pub fn len(&self) -> usize {
        self.villages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.villages.is_empty()
    }

    pub fn villages(&self) -> &BTreeMap<String, Village> {
        &self.villages
    }

    /// Last version applied for `pin_id`, tombstones included.
    pub fn version_of(&self, pin_id: &str) -> Option<i64> {
        self.versions.get(pin_id).copied()
    }

    pub fn clear(&mut self) {
        self.villages.clear();
        self.versions.clear();
    }

    /// Applies a batch in order. One bad change never stops the rest.
    pub fn apply_batch(&mut self, batch: &SnapshotBatch) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if batch.is_initial() {
            self.clear();
            report.reset = true;
        }

        for change in &batch.changes {
            match self.apply_change(change) {
                ChangeOutcome::Inserted | ChangeOutcome::Updated => {
                    report.applied.push(change.pin_id.clone())
                }
                ChangeOutcome::Evicted => report.evicted.push(change.pin_id.clone()),
                ChangeOutcome::AlreadyAbsent => {}
                ChangeOutcome::Stale => report.stale += 1,
                ChangeOutcome::Rejected(reason) => {
                    warn!(
                        pin_id = %change.pin_id,
                        version = change.version,
                        error = %reason,
                        "Rejected pin change"
                    );
                    report.rejected.push(RejectedChange {
                        pin_id: change.pin_id.clone(),
                        version: change.version,
                        reason,
                    });
                }
            }
        }

        debug!(
            applied = report.applied.len(),
            evicted = report.evicted.len(),
            stale = report.stale,
            rejected = report.rejected.len(),
            reset = report.reset,
            "Applied snapshot batch"
        );
        report
    }

    pub fn apply_change(&mut self, change: &PinChange) -> ChangeOutcome {
        if let Some(seen) = self.versions.get(&change.pin_id) {
            if change.version <= *seen {
                return ChangeOutcome::Stale;
            }
        }

        let outcome = match change.kind {
            ChangeKind::Removed => match self.villages.remove(&change.pin_id) {
                Some(_) => ChangeOutcome::Evicted,
                None => ChangeOutcome::AlreadyAbsent,
            },
            ChangeKind::Added | ChangeKind::Modified => match self.resolve(change) {
                Ok(village) => {
                    match self.villages.insert(change.pin_id.clone(), village) {
                        Some(_) => ChangeOutcome::Updated,
                        None => ChangeOutcome::Inserted,
                    }
                }
                Err(reason) => return ChangeOutcome::Rejected(reason),
            },
        };

        self.versions.insert(change.pin_id.clone(), change.version);
        outcome
    }

    /// Builds the new record: a `modified` change merges into the cached
    /// record when there is one; otherwise the payload must be complete.
    fn resolve(&self, change: &PinChange) -> Result<Village, VillageValidationError> {
        let payload = change
            .payload
            .as_ref()
            .ok_or_else(|| VillageValidationError::Malformed("change has no payload".to_string()))?;

        match (change.kind, self.villages.get(&change.pin_id)) {
            (ChangeKind::Modified, Some(existing)) => existing.merge_patch(payload),
            _ => Village::from_json(&change.pin_id, payload.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VillageStatus;
    use fake::faker::address::en::CityName;
    use fake::Fake;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;

    fn alpha_added(version: i64) -> PinChange {
        PinChange::patch(
            "v1",
            json!({"id": "v1", "name": "Alpha", "status": "planned", "location": {"lat": 10.0, "lng": 20.0}}),
            version,
        )
        .with_kind(ChangeKind::Added)
    }

    trait WithKind {
        fn with_kind(self, kind: ChangeKind) -> Self;
    }

    impl WithKind for PinChange {
        fn with_kind(mut self, kind: ChangeKind) -> Self {
            self.kind = kind;
            self
        }
    }

    #[test]
    fn test_added_modified_removed_scenario() {
        let mut cache = VillageCache::new();

        cache.apply_batch(&SnapshotBatch::delta(vec![alpha_added(1)]));
        assert_eq!(cache.len(), 1);
        let v1 = cache.get("v1").unwrap();
        assert_eq!(v1.name, "Alpha");
        assert_eq!(v1.status, VillageStatus::Planned);
        assert_eq!(v1.location.lat, 10.0);
        assert_eq!(v1.location.lng, 20.0);

        cache.apply_batch(&SnapshotBatch::delta(vec![PinChange::patch(
            "v1",
            json!({"status": "visited"}),
            2,
        )]));
        let v1 = cache.get("v1").unwrap();
        assert_eq!(v1.status, VillageStatus::Visited);
        assert_eq!(v1.name, "Alpha");
        assert_eq!(v1.location.lat, 10.0);
        assert_eq!(v1.location.lng, 20.0);

        let report = cache.apply_batch(&SnapshotBatch::delta(vec![PinChange::removed("v1", 3)]));
        assert_eq!(report.evicted, vec!["v1".to_string()]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_modified_for_unknown_id_is_upserted() {
        let mut cache = VillageCache::new();
        let outcome = cache.apply_change(&alpha_added(4).with_kind(ChangeKind::Modified));
        assert_eq!(outcome, ChangeOutcome::Inserted);
        assert_eq!(cache.get("v1").unwrap().name, "Alpha");
    }

    #[test]
    fn test_partial_modified_for_unknown_id_is_rejected() {
        let mut cache = VillageCache::new();
        let outcome = cache.apply_change(&PinChange::patch("v9", json!({"status": "visited"}), 1));
        assert!(matches!(outcome, ChangeOutcome::Rejected(_)));
        assert_eq!(cache.version_of("v9"), None);
    }

    #[test]
    fn test_removed_record_does_not_reappear() {
        let mut cache = VillageCache::new();
        cache.apply_change(&alpha_added(1));
        cache.apply_change(&PinChange::removed("v1", 2));

        // Late duplicates of earlier writes.
        assert_eq!(cache.apply_change(&alpha_added(1)), ChangeOutcome::Stale);
        assert_eq!(
            cache.apply_change(&PinChange::patch("v1", json!({"status": "visited"}), 2)),
            ChangeOutcome::Stale
        );
        assert!(cache.get("v1").is_none());

        assert_eq!(cache.apply_change(&alpha_added(5)), ChangeOutcome::Inserted);
        assert!(cache.get("v1").is_some());
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let mut cache = VillageCache::new();
        let change = alpha_added(3);
        assert_eq!(cache.apply_change(&change), ChangeOutcome::Inserted);
        assert_eq!(cache.apply_change(&change), ChangeOutcome::Stale);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_malformed_record_does_not_abort_batch() {
        let mut cache = VillageCache::new();
        let batch = SnapshotBatch::initial(vec![
            PinChange::patch("bad", json!({"name": "No location", "status": "planned"}), 1)
                .with_kind(ChangeKind::Added),
            alpha_added(2),
            PinChange {
                kind: ChangeKind::Added,
                pin_id: "empty".to_string(),
                version: 3,
                payload: None,
            },
        ]);

        let report = cache.apply_batch(&batch);
        assert_eq!(report.applied, vec!["v1".to_string()]);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].pin_id, "bad");
        assert_eq!(
            report.rejected[0].reason,
            VillageValidationError::MissingField("location")
        );
        assert!(!report.is_clean());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_rejected_patch_keeps_previous_record() {
        let mut cache = VillageCache::new();
        cache.apply_change(&alpha_added(1));
        let outcome = cache.apply_change(&PinChange::patch("v1", json!({"location": null}), 2));
        assert!(matches!(outcome, ChangeOutcome::Rejected(_)));
        assert_eq!(cache.get("v1").unwrap().name, "Alpha");
        assert_eq!(cache.version_of("v1"), Some(1));
    }

    #[test]
    fn test_initial_batch_replaces_cache() {
        let mut cache = VillageCache::new();
        cache.apply_change(&alpha_added(1));
        cache.apply_change(&PinChange::removed("gone", 2));

        let beta = PinChange::patch(
            "v2",
            json!({"name": "Beta", "status": "not-visited", "location": {"lat": 0.0, "lng": 0.0}}),
            7,
        )
        .with_kind(ChangeKind::Added);
        let report = cache.apply_batch(&SnapshotBatch::initial(vec![beta]));

        assert!(report.reset);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("v1").is_none());
        assert_eq!(cache.version_of("gone"), None);
    }

    #[derive(Clone)]
    struct Step {
        pin_id: String,
        change: PinChange,
    }

    /// A random per-id history: an add, then patches/removals/re-adds.
    fn history(rng: &mut StdRng, pin_id: &str, next_version: &mut i64) -> Vec<Step> {
        let mut steps = Vec::new();
        let mut present = false;
        for _ in 0..rng.gen_range(1..8) {
            *next_version += 1;
            let version = *next_version;
            let change = if !present {
                present = true;
                let name: String = CityName().fake_with_rng(rng);
                PinChange::patch(
                    pin_id,
                    json!({
                        "name": name,
                        "status": "planned",
                        "location": {"lat": rng.gen_range(-80.0..80.0), "lng": rng.gen_range(-170.0..170.0)}
                    }),
                    version,
                )
                .with_kind(ChangeKind::Added)
            } else if rng.gen_bool(0.25) {
                present = false;
                PinChange::removed(pin_id, version)
            } else {
                let status = VillageStatus::ALL[rng.gen_range(0..3)];
                PinChange::patch(
                    pin_id,
                    json!({"status": status.as_str(), "notes": format!("visit {}", version)}),
                    version,
                )
            };
            steps.push(Step {
                pin_id: pin_id.to_string(),
                change,
            });
        }
        steps
    }

    fn apply_in_random_batches(rng: &mut StdRng, steps: &[Step]) -> VillageCache {
        let mut cache = VillageCache::new();
        let mut index = 0;
        while index < steps.len() {
            let size = rng.gen_range(1..=4).min(steps.len() - index);
            let changes = steps[index..index + size]
                .iter()
                .map(|s| s.change.clone())
                .collect();
            cache.apply_batch(&SnapshotBatch::delta(changes));
            index += size;
        }
        cache
    }

    #[test]
    fn test_final_state_is_independent_of_cross_id_interleaving() {
        for seed in 0..32u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut next_version = 0;
            let ids = ["a", "b", "c", "d"];
            let histories: Vec<Vec<Step>> = ids
                .iter()
                .map(|id| history(&mut rng, id, &mut next_version))
                .collect();

            // Expected: each id's history applied on its own.
            let mut expected = VillageCache::new();
            for steps in &histories {
                for step in steps {
                    expected.apply_change(&step.change);
                }
            }

            // Random merge that keeps each id's own order.
            let mut cursors = vec![0usize; histories.len()];
            let mut merged = Vec::new();
            while merged.len() < histories.iter().map(Vec::len).sum::<usize>() {
                let pick = rng.gen_range(0..histories.len());
                if cursors[pick] < histories[pick].len() {
                    merged.push(histories[pick][cursors[pick]].clone());
                    cursors[pick] += 1;
                }
            }
            for pair in merged.windows(2) {
                if pair[0].pin_id == pair[1].pin_id {
                    assert!(pair[0].change.version < pair[1].change.version);
                }
            }

            let actual = apply_in_random_batches(&mut rng, &merged);
            assert_eq!(actual.villages(), expected.villages(), "seed {}", seed);
        }
    }
}
