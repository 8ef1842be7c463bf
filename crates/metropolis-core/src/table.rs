//! Entity and relationship tables.
//!
//! Both tables are sharded concurrent maps ([`DashMap`]). A write locks
//! the one shard holding the addressed key, so ingesting for one service
//! never waits on a tick reading an unrelated shard, and every stored
//! record is updated as a unit: a reader can never pair one write's
//! value with another write's anchor time.
//!
//! Stored values are anchored at `last_seen`. They are only re-anchored
//! by the aggregator; the snapshotter decays a copy to the tick time and
//! leaves the stored record alone.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metropolis_types::{EntityView, RelationshipView, Severity};

use crate::config::EngineSettings;
use crate::decay::decayed_value;

/// Decaying health state of one service.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub(crate) activity_level: f64,
    pub(crate) error_level: f64,
    pub(crate) last_seen: DateTime<Utc>,
    pub(crate) last_severity: Severity,
    pub(crate) idle_since: Option<DateTime<Utc>>,
}

impl EntityState {
    /// A zeroed state anchored at `at`.
    pub const fn new(at: DateTime<Utc>) -> Self {
        Self {
            activity_level: 0.0,
            error_level: 0.0,
            last_seen: at,
            last_severity: Severity::Info,
            idle_since: None,
        }
    }

    /// Stored activity at `last_seen`.
    pub const fn activity_level(&self) -> f64 {
        self.activity_level
    }

    /// Stored error volume at `last_seen`.
    pub const fn error_level(&self) -> f64 {
        self.error_level
    }

    /// Anchor time of the stored values.
    pub const fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// Severity of the most recent event.
    pub const fn last_severity(&self) -> Severity {
        self.last_severity
    }

    /// Re-anchor the stored values at `at`. Earlier instants are ignored.
    pub(crate) fn decay_to(&mut self, at: DateTime<Utc>, settings: &EngineSettings) {
        if at <= self.last_seen {
            return;
        }
        self.activity_level =
            decayed_value(self.activity_level, self.last_seen, at, settings.activity_half_life);
        self.error_level =
            decayed_value(self.error_level, self.last_seen, at, settings.error_half_life);
        self.last_seen = at;
    }

    /// `(activity, error)` decayed to `now`, without touching the record.
    pub fn levels_at(&self, now: DateTime<Utc>, settings: &EngineSettings) -> (f64, f64) {
        (
            decayed_value(self.activity_level, self.last_seen, now, settings.activity_half_life),
            decayed_value(self.error_level, self.last_seen, now, settings.error_half_life),
        )
    }

    fn view(&self, id: &str, now: DateTime<Utc>, settings: &EngineSettings) -> EntityView {
        let (activity_level, error_level) = self.levels_at(now, settings);
        EntityView {
            id: id.to_owned(),
            activity_level,
            error_level,
            health: health(activity_level, error_level),
            last_severity: self.last_severity,
            last_seen: self.last_seen,
        }
    }
}

/// Decaying interaction volume of one directed service pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipState {
    pub(crate) volume: f64,
    pub(crate) last_seen: DateTime<Utc>,
    pub(crate) idle_since: Option<DateTime<Utc>>,
}

impl RelationshipState {
    /// A zeroed state anchored at `at`.
    pub const fn new(at: DateTime<Utc>) -> Self {
        Self {
            volume: 0.0,
            last_seen: at,
            idle_since: None,
        }
    }

    /// Stored volume at `last_seen`.
    pub const fn volume(&self) -> f64 {
        self.volume
    }

    /// Anchor time of the stored volume.
    pub const fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// Re-anchor the stored volume at `at`. Earlier instants are ignored.
    pub(crate) fn decay_to(&mut self, at: DateTime<Utc>, settings: &EngineSettings) {
        if at <= self.last_seen {
            return;
        }
        self.volume = decayed_value(self.volume, self.last_seen, at, settings.activity_half_life);
        self.last_seen = at;
    }

    /// Volume decayed to `now`, without touching the record.
    pub fn volume_at(&self, now: DateTime<Utc>, settings: &EngineSettings) -> f64 {
        decayed_value(self.volume, self.last_seen, now, settings.activity_half_life)
    }
}

/// Share of activity that is not error. An idle service is healthy.
pub fn health(activity_level: f64, error_level: f64) -> f64 {
    let total = activity_level + error_level;
    if total <= 0.0 {
        1.0
    } else {
        (activity_level / total).clamp(0.0, 1.0)
    }
}

/// Outcome of one idle check over a table entry.
fn still_wanted(
    idle_since: &mut Option<DateTime<Utc>>,
    peak: f64,
    now: DateTime<Utc>,
    settings: &EngineSettings,
) -> bool {
    if peak > settings.eviction_threshold {
        *idle_since = None;
        return true;
    }
    let since = *idle_since.get_or_insert(now);
    now.signed_duration_since(since) < settings.eviction_grace
}

/// The two tables the aggregator writes and the snapshotter reads.
#[derive(Debug, Default)]
pub struct Tables {
    /// Per-service state.
    pub entities: EntityTable,
    /// Per-pair state.
    pub relationships: RelationshipTable,
}

/// Service identity to [`EntityState`].
#[derive(Debug, Default)]
pub struct EntityTable {
    map: DashMap<String, EntityState>,
}

impl EntityTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on the state for `id`, creating a zeroed one anchored at
    /// `at` if the service is new. Only the shard holding `id` is locked.
    pub fn update<R>(
        &self,
        id: &str,
        at: DateTime<Utc>,
        f: impl FnOnce(&mut EntityState) -> R,
    ) -> R {
        if let Some(mut state) = self.map.get_mut(id) {
            return f(&mut *state);
        }
        let mut state = self
            .map
            .entry(id.to_owned())
            .or_insert_with(|| EntityState::new(at));
        f(&mut *state)
    }

    /// A copy of the stored state for `id`.
    pub fn get(&self, id: &str) -> Option<EntityState> {
        self.map.get(id).map(|state| state.value().clone())
    }

    /// Number of tracked services.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no service is tracked.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Every service decayed to `now`, sorted by id.
    pub fn views(&self, now: DateTime<Utc>, settings: &EngineSettings) -> Vec<EntityView> {
        let mut views: Vec<EntityView> = self
            .map
            .iter()
            .map(|entry| entry.value().view(entry.key(), now, settings))
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Drop services idle for longer than the eviction grace. Returns the
    /// number removed.
    pub fn sweep(&self, now: DateTime<Utc>, settings: &EngineSettings) -> usize {
        let before = self.map.len();
        self.map.retain(|_, state| {
            let (activity, error) = state.levels_at(now, settings);
            still_wanted(&mut state.idle_since, activity.max(error), now, settings)
        });
        before.saturating_sub(self.map.len())
    }
}

/// Ordered `(source, target)` pair to [`RelationshipState`].
#[derive(Debug, Default)]
pub struct RelationshipTable {
    map: DashMap<(String, String), RelationshipState>,
}

impl RelationshipTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on the state for `(source, target)`, creating a zeroed one
    /// anchored at `at` if the pair is new.
    pub fn update<R>(
        &self,
        source: &str,
        target: &str,
        at: DateTime<Utc>,
        f: impl FnOnce(&mut RelationshipState) -> R,
    ) -> R {
        let mut state = self
            .map
            .entry((source.to_owned(), target.to_owned()))
            .or_insert_with(|| RelationshipState::new(at));
        f(&mut *state)
    }

    /// A copy of the stored state for `(source, target)`.
    pub fn get(&self, source: &str, target: &str) -> Option<RelationshipState> {
        self.map
            .get(&(source.to_owned(), target.to_owned()))
            .map(|state| state.value().clone())
    }

    /// Number of tracked pairs.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no pair is tracked.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Every pair decayed to `now`, sorted by `(source, target)`.
    pub fn views(&self, now: DateTime<Utc>, settings: &EngineSettings) -> Vec<RelationshipView> {
        let mut views: Vec<RelationshipView> = self
            .map
            .iter()
            .map(|entry| {
                let (source_id, target_id) = entry.key();
                RelationshipView {
                    source_id: source_id.clone(),
                    target_id: target_id.clone(),
                    volume: entry.value().volume_at(now, settings),
                }
            })
            .collect();
        views.sort_by(|a, b| {
            (a.source_id.as_str(), a.target_id.as_str())
                .cmp(&(b.source_id.as_str(), b.target_id.as_str()))
        });
        views
    }

    /// Drop pairs idle for longer than the eviction grace. Returns the
    /// number removed.
    pub fn sweep(&self, now: DateTime<Utc>, settings: &EngineSettings) -> usize {
        let before = self.map.len();
        self.map.retain(|_, state| {
            let volume = state.volume_at(now, settings);
            still_wanted(&mut state.idle_since, volume, now, settings)
        });
        before.saturating_sub(self.map.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn bump(table: &EntityTable, id: &str, at: DateTime<Utc>, amount: f64) {
        let settings = EngineSettings::default();
        table.update(id, at, |state| {
            state.decay_to(at, &settings);
            state.activity_level += amount;
            state.idle_since = None;
        });
    }

    #[test]
    fn update_creates_lazily() {
        let table = EntityTable::new();
        assert!(table.is_empty());
        bump(&table, "api", Utc::now(), 2.0);
        assert_eq!(table.len(), 1);
        assert!(table.get("api").is_some_and(|s| (s.activity_level() - 2.0).abs() < 1e-9));
    }

    #[test]
    fn views_are_sorted_by_identity() {
        let table = EntityTable::new();
        let now = Utc::now();
        for id in ["db", "api", "cache", "queue"] {
            bump(&table, id, now, 1.0);
        }
        let ids: Vec<String> = table
            .views(now, &EngineSettings::default())
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, ["api", "cache", "db", "queue"]);
    }

    #[test]
    fn reading_views_does_not_reanchor() {
        let table = EntityTable::new();
        let t = Utc::now();
        bump(&table, "api", t, 4.0);
        let settings = EngineSettings::default();
        let _ = table.views(t + TimeDelta::seconds(10), &settings);
        let stored = table.get("api");
        assert!(stored.is_some_and(|s| s.last_seen() == t && (s.activity_level() - 4.0).abs() < 1e-9));
    }

    #[test]
    fn decay_to_ignores_earlier_instants() {
        let t = Utc::now();
        let settings = EngineSettings::default();
        let mut state = EntityState::new(t);
        state.activity_level = 3.0;
        state.decay_to(t - TimeDelta::seconds(30), &settings);
        assert_eq!(state.last_seen(), t);
        assert!((state.activity_level() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn health_is_activity_share() {
        assert!((health(0.0, 0.0) - 1.0).abs() < 1e-9);
        assert!((health(3.0, 1.0) - 0.75).abs() < 1e-9);
        assert!(health(0.0, 2.0).abs() < 1e-9);
    }

    #[test]
    fn sweep_waits_for_grace_before_evicting() {
        let table = EntityTable::new();
        let t = Utc::now();
        let settings = EngineSettings {
            eviction_grace: TimeDelta::seconds(10),
            ..EngineSettings::default()
        };
        bump(&table, "api", t, 1.0);

        // Still active: nothing is marked.
        assert_eq!(table.sweep(t, &settings), 0);

        // Long after decay, the first sweep only marks it idle.
        let quiet = t + TimeDelta::seconds(600);
        assert_eq!(table.sweep(quiet, &settings), 0);
        assert_eq!(table.len(), 1);

        // Once the grace has passed it is removed.
        assert_eq!(table.sweep(quiet + TimeDelta::seconds(10), &settings), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn relationship_views_sorted_by_pair() {
        let table = RelationshipTable::new();
        let now = Utc::now();
        for (s, t) in [("web", "api"), ("api", "db"), ("api", "cache")] {
            table.update(s, t, now, |state| state.volume += 1.0);
        }
        let pairs: Vec<(String, String)> = table
            .views(now, &EngineSettings::default())
            .into_iter()
            .map(|v| (v.source_id, v.target_id))
            .collect();
        assert_eq!(
            pairs,
            [
                (String::from("api"), String::from("cache")),
                (String::from("api"), String::from("db")),
                (String::from("web"), String::from("api")),
            ]
        );
    }

    #[test]
    fn relationship_sweep_evicts_idle_pairs() {
        let table = RelationshipTable::new();
        let t = Utc::now();
        let settings = EngineSettings {
            eviction_grace: TimeDelta::zero(),
            ..EngineSettings::default()
        };
        table.update("api", "db", t, |state| state.volume += 1.0);
        assert_eq!(table.sweep(t + TimeDelta::seconds(600), &settings), 1);
        assert!(table.get("api", "db").is_none());
    }
}
