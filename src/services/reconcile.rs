//! Diff a desired list of calendars against the stored state and produce a
//! mutation plan. Nothing in here touches the database.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{Access, Calendar, Connection, CreateCalendar, CreateConnection, UpdateCalendar};
use crate::services::identity::{calendar_identity_key, connection_identity_key, ConnectionKind};

/// One entry of a client-submitted desired state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesiredCalendar {
    pub provider: String,
    #[serde(default, alias = "feed_url", alias = "feedUrl")]
    pub url: Option<String>,
    #[serde(default, alias = "externalCalendarId")]
    pub external_calendar_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default, alias = "isBusySource")]
    pub is_busy_source: Option<bool>,
    #[serde(default, alias = "isDefaultWrite")]
    pub is_default_write: Option<bool>,
    #[serde(default, alias = "timeZone")]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Fail on the first malformed item instead of skipping it.
    pub strict: bool,
    /// Delete stored connections/calendars absent from the desired list.
    pub prune: bool,
}

impl ReconcileOptions {
    pub fn full_replace(strict: bool) -> Self {
        Self { strict, prune: true }
    }

    pub fn single_item() -> Self {
        Self {
            strict: true,
            prune: false,
        }
    }
}

/// A desired item dropped during best-effort reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("item {index}: {reason}")]
pub struct ReconcileError {
    pub index: usize,
    pub reason: String,
}

/// Where an accepted desired item landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub index: usize,
    pub connection_id: String,
    pub calendar_id: String,
    pub connection_created: bool,
    pub calendar_created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpdate {
    pub calendar_id: String,
    pub update: UpdateCalendar,
}

/// Ordered mutations for one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationPlan {
    pub connection_creates: Vec<CreateConnection>,
    /// Existing connections that were re-submitted; only their timestamp moves.
    pub connection_touches: Vec<String>,
    pub calendar_creates: Vec<CreateCalendar>,
    pub calendar_updates: Vec<PlannedUpdate>,
    pub calendar_deletes: Vec<String>,
    pub connection_deletes: Vec<String>,
    /// Calendar that must end up as the user's only default-write target.
    pub default_write: Option<String>,
    pub outcomes: Vec<ItemOutcome>,
    pub skipped: Vec<SkippedItem>,
}

/// Stored state of one user, indexed by identity key.
#[derive(Debug, Clone, Default)]
pub struct LoadedState {
    connections: Vec<Connection>,
    calendars: Vec<Calendar>,
    connection_index: HashMap<String, usize>,
    calendar_index: HashMap<String, usize>,
}

impl LoadedState {
    pub fn new(connections: Vec<Connection>, calendars: Vec<Calendar>) -> Self {
        let connection_index = connections
            .iter()
            .enumerate()
            .map(|(i, c)| (connection_identity_key(c.provider, c.feed_url.as_deref()), i))
            .collect();
        let calendar_index = calendars
            .iter()
            .enumerate()
            .map(|(i, c)| (calendar_identity_key(&c.connection_id, &c.external_calendar_id), i))
            .collect();

        Self {
            connections,
            calendars,
            connection_index,
            calendar_index,
        }
    }

    pub fn connection(&self, key: &str) -> Option<&Connection> {
        self.connection_index.get(key).map(|&i| &self.connections[i])
    }

    pub fn calendar(&self, key: &str) -> Option<&Calendar> {
        self.calendar_index.get(key).map(|&i| &self.calendars[i])
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn calendars(&self) -> &[Calendar] {
        &self.calendars
    }
}

/// A desired item after normalization.
struct ResolvedItem {
    kind: ConnectionKind,
    external_calendar_id: String,
    name: Option<String>,
    access: Option<Access>,
    is_busy_source: Option<bool>,
    is_default_write: Option<bool>,
    time_zone: Option<String>,
    color: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn resolve_item(item: &DesiredCalendar) -> Result<ResolvedItem, String> {
    let kind = ConnectionKind::resolve(&item.provider, item.url.as_deref()).map_err(|e| e.to_string())?;
    let external_calendar_id = kind
        .external_calendar_id(item.external_calendar_id.as_deref())
        .map_err(|e| e.to_string())?;

    let access = match &kind {
        ConnectionKind::Ics { .. } => Some(Access::Ro),
        ConnectionKind::OAuth(_) => match non_blank(&item.access) {
            Some(raw) => Some(Access::from_str(&raw).ok_or_else(|| format!("invalid access '{}'", raw))?),
            None => None,
        },
    };

    Ok(ResolvedItem {
        kind,
        external_calendar_id,
        name: non_blank(&item.name),
        access,
        is_busy_source: item.is_busy_source,
        is_default_write: item.is_default_write,
        time_zone: non_blank(&item.time_zone),
        color: non_blank(&item.color),
    })
}

enum CalendarSlot {
    Create(usize),
    Update(usize),
}

/// Compute the mutation plan for `desired` against `state`.
///
/// Items are processed in input order. When several items claim default-write,
/// the last one wins. Items resolving to the same calendar collapse into one row.
pub fn plan(
    state: &LoadedState,
    desired: &[DesiredCalendar],
    options: ReconcileOptions,
) -> Result<MutationPlan, ReconcileError> {
    let mut plan = MutationPlan::default();
    // connection identity key -> (id, created in this plan)
    let mut connections: HashMap<String, (String, bool)> = HashMap::new();
    let mut calendars: HashMap<String, CalendarSlot> = HashMap::new();
    let mut default_key: Option<String> = None;

    for (index, item) in desired.iter().enumerate() {
        let resolved = match resolve_item(item) {
            Ok(r) => r,
            Err(reason) if options.strict => return Err(ReconcileError { index, reason }),
            Err(reason) => {
                tracing::warn!(index, provider = %item.provider, "Skipping desired calendar: {}", reason);
                plan.skipped.push(SkippedItem { index, reason });
                continue;
            }
        };

        let connection_key = resolved.kind.identity_key();
        let (connection_id, connection_created) = match connections.get(&connection_key) {
            Some((id, created)) => (id.clone(), *created),
            None => {
                let entry = match state.connection(&connection_key) {
                    Some(existing) => {
                        plan.connection_touches.push(existing.id.clone());
                        (existing.id.clone(), false)
                    }
                    None => {
                        let id = Uuid::new_v4().to_string();
                        plan.connection_creates.push(CreateConnection {
                            id: id.clone(),
                            provider: resolved.kind.provider(),
                            feed_url: resolved.kind.feed_url().map(str::to_string),
                            scope: resolved.access.unwrap_or_default(),
                        });
                        (id, true)
                    }
                };
                connections.insert(connection_key, entry.clone());
                entry
            }
        };

        let calendar_key = calendar_identity_key(&connection_id, &resolved.external_calendar_id);
        let clear_default = resolved.is_default_write.map(|v| !v);

        let (calendar_id, calendar_created) = match calendars.get(&calendar_key) {
            Some(CalendarSlot::Create(i)) => {
                let create = &mut plan.calendar_creates[*i];
                if let Some(name) = resolved.name {
                    create.name = name;
                }
                if let Some(access) = resolved.access {
                    create.access = access;
                }
                if let Some(busy) = resolved.is_busy_source {
                    create.is_busy_source = busy;
                }
                if resolved.time_zone.is_some() {
                    create.time_zone = resolved.time_zone;
                }
                if resolved.color.is_some() {
                    create.color = resolved.color;
                }
                (create.id.clone(), true)
            }
            Some(CalendarSlot::Update(i)) => {
                let planned = &mut plan.calendar_updates[*i];
                let update = &mut planned.update;
                update.name = resolved.name.or(update.name.take());
                update.access = resolved.access.or(update.access);
                update.is_busy_source = resolved.is_busy_source.or(update.is_busy_source);
                update.time_zone = resolved.time_zone.or(update.time_zone.take());
                update.color = resolved.color.or(update.color.take());
                if let Some(clear) = clear_default {
                    update.clear_default_write = clear;
                }
                (planned.calendar_id.clone(), false)
            }
            None => match state.calendar(&calendar_key) {
                Some(existing) => {
                    plan.calendar_updates.push(PlannedUpdate {
                        calendar_id: existing.id.clone(),
                        update: UpdateCalendar {
                            name: resolved.name,
                            access: resolved.access,
                            is_busy_source: resolved.is_busy_source,
                            clear_default_write: clear_default.unwrap_or(false),
                            time_zone: resolved.time_zone,
                            color: resolved.color,
                        },
                    });
                    calendars.insert(
                        calendar_key.clone(),
                        CalendarSlot::Update(plan.calendar_updates.len() - 1),
                    );
                    (existing.id.clone(), false)
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    let name = resolved
                        .name
                        .unwrap_or_else(|| resolved.kind.default_calendar_name(&resolved.external_calendar_id));
                    plan.calendar_creates.push(CreateCalendar {
                        id: id.clone(),
                        connection_id: connection_id.clone(),
                        external_calendar_id: resolved.external_calendar_id.clone(),
                        name,
                        access: resolved.access.unwrap_or_default(),
                        is_busy_source: resolved.is_busy_source.unwrap_or(true),
                        time_zone: resolved.time_zone,
                        color: resolved.color,
                    });
                    calendars.insert(
                        calendar_key.clone(),
                        CalendarSlot::Create(plan.calendar_creates.len() - 1),
                    );
                    (id, true)
                }
            },
        };

        match resolved.is_default_write {
            Some(true) => default_key = Some(calendar_key),
            Some(false) if default_key.as_deref() == Some(calendar_key.as_str()) => default_key = None,
            _ => {}
        }

        plan.outcomes.push(ItemOutcome {
            index,
            connection_id,
            calendar_id,
            connection_created,
            calendar_created,
        });
    }

    if options.prune {
        for calendar in state.calendars() {
            let key = calendar_identity_key(&calendar.connection_id, &calendar.external_calendar_id);
            if !calendars.contains_key(&key) {
                plan.calendar_deletes.push(calendar.id.clone());
            }
        }
        for connection in state.connections() {
            let key = connection_identity_key(connection.provider, connection.feed_url.as_deref());
            if !connections.contains_key(&key) {
                plan.connection_deletes.push(connection.id.clone());
            }
        }
    }

    plan.default_write = default_key.and_then(|key| match calendars.get(&key) {
        Some(CalendarSlot::Create(i)) => Some(plan.calendar_creates[*i].id.clone()),
        Some(CalendarSlot::Update(i)) => Some(plan.calendar_updates[*i].calendar_id.clone()),
        None => None,
    });

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{AuthType, Provider};
    use crate::services::identity::derive_external_calendar_id;

    fn connection(id: &str, provider: Provider, feed_url: Option<&str>) -> Connection {
        let now = chrono::Utc::now().naive_utc();
        Connection {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            provider,
            auth_type: provider.auth_type(),
            feed_url: feed_url.map(str::to_string),
            scope: Access::Ro,
            created_at: now,
            updated_at: now,
        }
    }

    fn calendar(id: &str, connection_id: &str, external_id: &str) -> Calendar {
        let now = chrono::Utc::now().naive_utc();
        Calendar {
            id: id.to_string(),
            connection_id: connection_id.to_string(),
            external_calendar_id: external_id.to_string(),
            name: external_id.to_string(),
            access: Access::Ro,
            is_busy_source: true,
            is_default_write: false,
            time_zone: None,
            color: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn google(external_id: &str, default_write: Option<bool>) -> DesiredCalendar {
        DesiredCalendar {
            provider: "google".to_string(),
            external_calendar_id: Some(external_id.to_string()),
            is_default_write: default_write,
            ..Default::default()
        }
    }

    #[test]
    fn creates_connection_and_calendar_from_empty_state() {
        let plan = plan(
            &LoadedState::default(),
            &[google("cal-1", Some(true))],
            ReconcileOptions::full_replace(false),
        )
        .unwrap();

        assert_eq!(plan.connection_creates.len(), 1);
        assert_eq!(plan.connection_creates[0].provider, Provider::Google);
        assert_eq!(plan.calendar_creates.len(), 1);
        let created = &plan.calendar_creates[0];
        assert_eq!(created.connection_id, plan.connection_creates[0].id);
        assert_eq!(created.external_calendar_id, "cal-1");
        assert_eq!(created.name, "cal-1");
        assert!(created.is_busy_source);
        assert_eq!(plan.default_write.as_deref(), Some(created.id.as_str()));
        assert!(plan.outcomes[0].connection_created && plan.outcomes[0].calendar_created);
    }

    #[test]
    fn resubmitting_stored_state_only_touches_and_updates() {
        let state = LoadedState::new(
            vec![connection("conn-1", Provider::Google, None)],
            vec![calendar("cal-row-1", "conn-1", "cal-1")],
        );

        let plan = plan(&state, &[google("cal-1", None)], ReconcileOptions::full_replace(false)).unwrap();

        assert!(plan.connection_creates.is_empty());
        assert!(plan.calendar_creates.is_empty());
        assert!(plan.calendar_deletes.is_empty());
        assert!(plan.connection_deletes.is_empty());
        assert_eq!(plan.connection_touches, vec!["conn-1".to_string()]);
        assert_eq!(plan.calendar_updates.len(), 1);
        assert_eq!(plan.calendar_updates[0].calendar_id, "cal-row-1");
        assert!(!plan.calendar_updates[0].update.clear_default_write);
        assert_eq!(plan.default_write, None);
    }

    #[test]
    fn planning_against_stored_state_is_deterministic() {
        let state = LoadedState::new(
            vec![
                connection("conn-g", Provider::Google, None),
                connection("conn-i", Provider::Ics, Some("https://example.com/a.ics")),
            ],
            vec![
                calendar("row-g1", "conn-g", "cal-1"),
                calendar(
                    "row-i1",
                    "conn-i",
                    &derive_external_calendar_id("https://example.com/a.ics"),
                ),
            ],
        );
        let desired = vec![
            google("cal-1", Some(true)),
            DesiredCalendar {
                provider: "webcal".to_string(),
                url: Some("webcal://example.com/a.ics".to_string()),
                ..Default::default()
            },
        ];

        let first = plan(&state, &desired, ReconcileOptions::full_replace(false)).unwrap();
        let second = plan(&state, &desired, ReconcileOptions::full_replace(false)).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.default_write.as_deref(), Some("row-g1"));
    }

    #[test]
    fn new_ics_connection_is_planned_read_only() {
        let desired = vec![DesiredCalendar {
            provider: "ics".to_string(),
            url: Some("https://example.com/b.ics".to_string()),
            access: Some("rw".to_string()),
            ..Default::default()
        }];

        let plan = plan(&LoadedState::default(), &desired, ReconcileOptions::single_item()).unwrap();

        let expected = CreateConnection {
            id: plan.calendar_creates[0].connection_id.clone(),
            provider: Provider::Ics,
            feed_url: Some("https://example.com/b.ics".to_string()),
            scope: Access::Ro,
        };
        assert_eq!(plan.connection_creates, vec![expected]);
    }

    #[test]
    fn omitted_rows_are_orphaned() {
        let state = LoadedState::new(
            vec![
                connection("conn-g", Provider::Google, None),
                connection("conn-m", Provider::Microsoft, None),
            ],
            vec![
                calendar("row-g1", "conn-g", "g1"),
                calendar("row-g2", "conn-g", "g2"),
                calendar("row-m1", "conn-m", "m1"),
            ],
        );

        let plan = plan(&state, &[google("g1", None)], ReconcileOptions::full_replace(false)).unwrap();

        assert_eq!(plan.calendar_deletes, vec!["row-g2".to_string(), "row-m1".to_string()]);
        assert_eq!(plan.connection_deletes, vec!["conn-m".to_string()]);
    }

    #[test]
    fn empty_desired_list_removes_everything() {
        let state = LoadedState::new(
            vec![connection("conn-g", Provider::Google, None)],
            vec![calendar("row-g1", "conn-g", "g1")],
        );

        let plan = plan(&state, &[], ReconcileOptions::full_replace(false)).unwrap();

        assert_eq!(plan.calendar_deletes, vec!["row-g1".to_string()]);
        assert_eq!(plan.connection_deletes, vec!["conn-g".to_string()]);
    }

    #[test]
    fn last_default_write_claim_wins() {
        let plan = plan(
            &LoadedState::default(),
            &[google("first", Some(true)), google("second", Some(true))],
            ReconcileOptions::full_replace(false),
        )
        .unwrap();

        let second = plan
            .calendar_creates
            .iter()
            .find(|c| c.external_calendar_id == "second")
            .unwrap();
        assert_eq!(plan.default_write.as_deref(), Some(second.id.as_str()));
        // Both calendars share the single google connection.
        assert_eq!(plan.connection_creates.len(), 1);
    }

    #[test]
    fn later_false_on_same_calendar_withdraws_default_claim() {
        let plan = plan(
            &LoadedState::default(),
            &[google("cal-1", Some(true)), google("cal-1", Some(false))],
            ReconcileOptions::full_replace(false),
        )
        .unwrap();

        assert_eq!(plan.calendar_creates.len(), 1);
        assert_eq!(plan.default_write, None);
    }

    #[test]
    fn explicit_false_clears_stored_default() {
        let mut stored = calendar("row-1", "conn-1", "cal-1");
        stored.is_default_write = true;
        let state = LoadedState::new(vec![connection("conn-1", Provider::Google, None)], vec![stored]);

        let plan = plan(&state, &[google("cal-1", Some(false))], ReconcileOptions::full_replace(false)).unwrap();

        assert!(plan.calendar_updates[0].update.clear_default_write);
    }

    #[test]
    fn malformed_items_are_skipped_in_best_effort_mode() {
        let desired = vec![
            DesiredCalendar {
                provider: "gogle".to_string(),
                external_calendar_id: Some("x".to_string()),
                ..Default::default()
            },
            DesiredCalendar {
                provider: "google".to_string(),
                ..Default::default()
            },
            DesiredCalendar {
                provider: "ics".to_string(),
                url: Some("ftp://example.com/a.ics".to_string()),
                ..Default::default()
            },
            google("cal-ok", None),
        ];

        let plan = plan(&LoadedState::default(), &desired, ReconcileOptions::full_replace(false)).unwrap();

        let skipped: Vec<usize> = plan.skipped.iter().map(|s| s.index).collect();
        assert_eq!(skipped, vec![0, 1, 2]);
        assert!(plan.skipped[0].reason.contains("gogle"));
        assert_eq!(plan.calendar_creates.len(), 1);
        assert_eq!(plan.outcomes.len(), 1);
        assert_eq!(plan.outcomes[0].index, 3);
    }

    #[test]
    fn strict_mode_rejects_first_malformed_item() {
        let desired = vec![google("ok", None), google("  ", None)];

        let err = plan(&LoadedState::default(), &desired, ReconcileOptions::full_replace(true)).unwrap_err();

        assert_eq!(err.index, 1);
        assert!(err.reason.contains("external calendar id"));
    }

    #[test]
    fn ics_identity_is_derived_and_access_forced_read_only() {
        let desired = vec![DesiredCalendar {
            provider: "ics".to_string(),
            url: Some("webcal://example.com/a.ics".to_string()),
            external_calendar_id: Some("ignored".to_string()),
            access: Some("rw".to_string()),
            ..Default::default()
        }];

        let plan = plan(&LoadedState::default(), &desired, ReconcileOptions::full_replace(false)).unwrap();

        let connection = &plan.connection_creates[0];
        assert_eq!(connection.provider.auth_type(), AuthType::Ics);
        assert_eq!(connection.feed_url.as_deref(), Some("https://example.com/a.ics"));
        assert_eq!(connection.scope, Access::Ro);

        let calendar = &plan.calendar_creates[0];
        assert_eq!(
            calendar.external_calendar_id,
            derive_external_calendar_id("https://example.com/a.ics")
        );
        assert_eq!(calendar.access, Access::Ro);
        assert_eq!(calendar.name, "example.com");
    }

    #[test]
    fn invalid_access_on_oauth_item_is_rejected() {
        let mut item = google("cal-1", None);
        item.access = Some("admin".to_string());

        let plan = plan(&LoadedState::default(), &[item], ReconcileOptions::full_replace(false)).unwrap();

        assert_eq!(plan.skipped.len(), 1);
        assert!(plan.calendar_creates.is_empty());
    }

    #[test]
    fn duplicate_items_collapse_with_later_values_winning() {
        let mut first = google("cal-1", None);
        first.name = Some("Work".to_string());
        first.color = Some("#ff0000".to_string());
        let mut second = google("cal-1", None);
        second.name = Some("Work (renamed)".to_string());
        second.is_busy_source = Some(false);

        let plan = plan(&LoadedState::default(), &[first, second], ReconcileOptions::full_replace(false)).unwrap();

        assert_eq!(plan.calendar_creates.len(), 1);
        let created = &plan.calendar_creates[0];
        assert_eq!(created.name, "Work (renamed)");
        assert_eq!(created.color.as_deref(), Some("#ff0000"));
        assert!(!created.is_busy_source);
        assert_eq!(plan.outcomes[0].calendar_id, plan.outcomes[1].calendar_id);
    }

    #[test]
    fn single_item_mode_never_prunes() {
        let state = LoadedState::new(
            vec![connection("conn-g", Provider::Google, None)],
            vec![calendar("row-g1", "conn-g", "g1")],
        );
        let desired = vec![DesiredCalendar {
            provider: "ics".to_string(),
            url: Some("https://example.com/a.ics".to_string()),
            ..Default::default()
        }];

        let plan = plan(&state, &desired, ReconcileOptions::single_item()).unwrap();

        assert!(plan.calendar_deletes.is_empty());
        assert!(plan.connection_deletes.is_empty());
        assert_eq!(plan.calendar_creates.len(), 1);
    }

    #[test]
    fn desired_item_deserializes_from_camel_case() {
        let item: DesiredCalendar = serde_json::from_str(
            r#"{"provider":"google","externalCalendarId":"cal-1","isDefaultWrite":true,"isBusySource":false}"#,
        )
        .unwrap();

        assert_eq!(item.external_calendar_id.as_deref(), Some("cal-1"));
        assert_eq!(item.is_default_write, Some(true));
        assert_eq!(item.is_busy_source, Some(false));
    }
}
