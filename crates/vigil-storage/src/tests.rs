use crate::checks::{Granularity, NewCheck};
use crate::incidents::NewIncident;
use crate::maintenance::NewFixedWindow;
use crate::Store;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use vigil_common::{CheckStatus, Monitor, MonitorType, Severity};

fn store() -> Store {
    Store::open_in_memory().unwrap()
}

fn check(monitor_id: i64, status: CheckStatus, rt: i64, secs_ago: i64) -> NewCheck {
    NewCheck {
        monitor_id,
        status,
        response_time_ms: rt,
        error: match status {
            CheckStatus::Up => None,
            CheckStatus::Down => Some("timeout".to_string()),
        },
        checked_at: Utc::now() - Duration::seconds(secs_ago),
    }
}

fn monitor(id: i64) -> Monitor {
    Monitor {
        id,
        name: format!("monitor-{id}"),
        group: None,
        monitor_type: MonitorType::Http,
        url: format!("http://host-{id}"),
        interval_seconds: 30,
        public: true,
        conditions: vec![],
        dns: None,
        maintenance_windows: vec![],
    }
}

#[test]
fn save_and_read_back_checks() {
    let store = store();
    store.save_check(&check(1, CheckStatus::Up, 120, 20)).unwrap();
    store.save_check(&check(1, CheckStatus::Down, 0, 10)).unwrap();
    store.save_check(&check(1, CheckStatus::Up, 80, 0)).unwrap();
    store.save_check(&check(2, CheckStatus::Up, 50, 0)).unwrap();

    let recent = store.recent_checks(1, 10).unwrap();
    assert_eq!(recent.len(), 3);
    // Newest first.
    assert_eq!(recent[0].status, CheckStatus::Up);
    assert_eq!(recent[0].response_time_ms, 80);
    assert_eq!(recent[1].status, CheckStatus::Down);
    assert_eq!(recent[1].error.as_deref(), Some("timeout"));

    let latest = store.latest_check(1).unwrap().unwrap();
    assert_eq!(latest.response_time_ms, 80);
    assert!(store.latest_check(99).unwrap().is_none());
}

#[test]
fn latest_checks_bulk_returns_one_row_per_monitor() {
    let store = store();
    for secs_ago in [30, 20, 10] {
        store.save_check(&check(1, CheckStatus::Up, 100, secs_ago)).unwrap();
        store.save_check(&check(2, CheckStatus::Down, 0, secs_ago)).unwrap();
    }

    let map = store.latest_checks_bulk(&[1, 2, 3]).unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map[&1].status, CheckStatus::Up);
    assert_eq!(map[&2].status, CheckStatus::Down);
    assert!(!map.contains_key(&3));
}

#[test]
fn uptime_is_100_with_no_checks() {
    let store = store();
    assert_eq!(store.uptime_pct(1, 7).unwrap(), 100.0);
}

#[test]
fn uptime_counts_up_share() {
    let store = store();
    for i in 0..8 {
        store.save_check(&check(1, CheckStatus::Up, 100, i * 10)).unwrap();
    }
    for i in 0..2 {
        store.save_check(&check(1, CheckStatus::Down, 0, 100 + i * 10)).unwrap();
    }
    let pct = store.uptime_pct(1, 7).unwrap();
    assert!((pct - 80.0).abs() < 1e-9);

    let bulk = store.uptime_pct_bulk(&[1, 2], 7).unwrap();
    assert!((bulk[&1] - 80.0).abs() < 1e-9);
    assert_eq!(bulk[&2], 100.0);
}

#[test]
fn avg_response_time_ignores_failures() {
    let store = store();
    store.save_check(&check(1, CheckStatus::Up, 100, 30)).unwrap();
    store.save_check(&check(1, CheckStatus::Up, 200, 20)).unwrap();
    store.save_check(&check(1, CheckStatus::Down, 9_000, 10)).unwrap();

    let avg = store.avg_response_time(1, 7).unwrap().unwrap();
    assert!((avg - 150.0).abs() < 1e-9);
    assert!(store.avg_response_time(2, 7).unwrap().is_none());
}

#[test]
fn response_time_history_buckets_by_day() {
    let store = store();
    store.save_check(&check(1, CheckStatus::Up, 100, 10)).unwrap();
    store.save_check(&check(1, CheckStatus::Up, 300, 5)).unwrap();
    store.save_check(&check(1, CheckStatus::Down, 0, 1)).unwrap();

    let buckets = store
        .response_time_history(1, 7, Granularity::Day)
        .unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].min_ms, 100);
    assert_eq!(buckets[0].max_ms, 300);
    assert!((buckets[0].avg_ms - 200.0).abs() < 1e-9);
}

#[test]
fn state_transitions_counted_within_window() {
    let store = store();
    for (i, status) in [
        CheckStatus::Up,
        CheckStatus::Down,
        CheckStatus::Up,
        CheckStatus::Up,
        CheckStatus::Down,
    ]
    .iter()
    .enumerate()
    {
        store.save_check(&check(1, *status, 10, 50 - (i as i64) * 10)).unwrap();
    }
    assert_eq!(store.state_transitions_in_window(1, 60).unwrap(), 3);
}

#[test]
fn retention_deletes_only_expired_rows() {
    let store = store();
    // Old rows: 40 days ago. Recent rows: now.
    for i in 0..5 {
        store
            .save_check(&check(1, CheckStatus::Up, 100, 40 * 86_400 + i))
            .unwrap();
    }
    for i in 0..3 {
        store.save_check(&check(1, CheckStatus::Up, 100, i)).unwrap();
    }

    let removed = store.delete_checks_older_than(30).unwrap();
    assert_eq!(removed, 5);
    assert_eq!(store.recent_checks(1, 100).unwrap().len(), 3);

    // A second pass removes nothing.
    assert_eq!(store.delete_checks_older_than(30).unwrap(), 0);
}

#[test]
fn only_one_active_incident_per_monitor() {
    let store = store();
    let new = NewIncident {
        monitor_id: 1,
        severity: Severity::Major,
        title: "api is down".into(),
        description: None,
        started_at: Utc::now(),
    };

    let first = store.open_incident(&new).unwrap();
    assert!(first.is_some());
    let second = store.open_incident(&new).unwrap();
    assert!(second.is_none(), "second open must be refused");
    assert_eq!(store.count_active_incidents(1).unwrap(), 1);

    // A different monitor is unaffected.
    let other = NewIncident {
        monitor_id: 2,
        ..new.clone()
    };
    assert!(store.open_incident(&other).unwrap().is_some());
}

#[test]
fn resolve_then_reopen() {
    let store = store();
    let new = NewIncident {
        monitor_id: 1,
        severity: Severity::Minor,
        title: "api is down".into(),
        description: None,
        started_at: Utc::now(),
    };
    let incident = store.open_incident(&new).unwrap().unwrap();

    assert!(store.resolve_incident(incident.id, Utc::now()).unwrap());
    // Resolving twice is a no-op.
    assert!(!store.resolve_incident(incident.id, Utc::now()).unwrap());
    assert_eq!(store.count_active_incidents(1).unwrap(), 0);

    // A new incident may open once the previous one is resolved.
    assert!(store.open_incident(&new).unwrap().is_some());

    let history = store.incidents_for_monitor(1, 10).unwrap();
    assert_eq!(history.len(), 2);
}

#[test]
fn fixed_windows_match_monitor_and_global() {
    let store = store();
    let now = Utc::now();
    store
        .replace_fixed_windows(
            Some(1),
            &[NewFixedWindow {
                monitor_id: Some(1),
                start_time: now - Duration::minutes(5),
                end_time: now + Duration::minutes(5),
                timezone: "UTC".into(),
                description: Some("db upgrade".into()),
            }],
        )
        .unwrap();

    let hit = store.active_fixed_window(1, now).unwrap();
    assert!(hit.is_some());
    assert_eq!(hit.unwrap().description.as_deref(), Some("db upgrade"));
    // Another monitor does not match a monitor-scoped window.
    assert!(store.active_fixed_window(2, now).unwrap().is_none());

    // A global window applies to every monitor.
    store
        .replace_fixed_windows(
            None,
            &[NewFixedWindow {
                monitor_id: None,
                start_time: now - Duration::minutes(1),
                end_time: now + Duration::minutes(1),
                timezone: "UTC".into(),
                description: None,
            }],
        )
        .unwrap();
    assert!(store.active_fixed_window(2, now).unwrap().is_some());

    // Outside the span nothing matches.
    assert!(store
        .active_fixed_window(1, now + Duration::hours(2))
        .unwrap()
        .is_none());
}

#[test]
fn day_aggregation_matches_and_is_idempotent() {
    let store = store();
    let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
    let base = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();

    for i in 0..95 {
        store
            .save_check(&NewCheck {
                monitor_id: 3,
                status: CheckStatus::Up,
                response_time_ms: 100,
                error: None,
                checked_at: base + Duration::seconds(i),
            })
            .unwrap();
    }
    for i in 0..5 {
        store
            .save_check(&NewCheck {
                monitor_id: 3,
                status: CheckStatus::Down,
                response_time_ms: 0,
                error: Some("timeout".into()),
                checked_at: base + Duration::seconds(100 + i),
            })
            .unwrap();
    }

    let summary = store.aggregate_day(3, date).unwrap().unwrap();
    assert_eq!(summary.total_checks, 100);
    assert_eq!(summary.successful_checks, 95);
    assert!((summary.uptime_pct - 95.0).abs() < 1e-9);
    assert_eq!(summary.avg_response_time_ms, 100);

    store.upsert_day_summary(&summary).unwrap();
    // Re-running produces an identical row.
    let again = store.aggregate_day(3, date).unwrap().unwrap();
    assert_eq!(again, summary);
    store.upsert_day_summary(&again).unwrap();

    let stored = store.day_summary(3, date).unwrap().unwrap();
    assert_eq!(stored, summary);

    // No checks on another day.
    assert!(store
        .aggregate_day(3, NaiveDate::from_ymd_opt(2025, 1, 16).unwrap())
        .unwrap()
        .is_none());
}

#[test]
fn days_with_checks_lists_pairs() {
    let store = store();
    store.save_check(&check(1, CheckStatus::Up, 10, 0)).unwrap();
    store.save_check(&check(2, CheckStatus::Up, 10, 0)).unwrap();

    let pairs = store.days_with_checks(7).unwrap();
    let today = Utc::now().date_naive();
    assert!(pairs.contains(&(1, today)));
    assert!(pairs.contains(&(2, today)));
}

#[test]
fn sync_monitors_upserts_and_removes() {
    let store = store();
    store.sync_monitors(&[monitor(1), monitor(2)]).unwrap();
    assert_eq!(store.monitors().unwrap().len(), 2);

    // Data for monitor 2 exists, then monitor 2 disappears from config.
    store.save_check(&check(2, CheckStatus::Up, 10, 0)).unwrap();
    let mut renamed = monitor(1);
    renamed.name = "renamed".into();
    store.sync_monitors(&[renamed]).unwrap();

    let rows = store.monitors().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "renamed");
    // Cascade removed the orphan checks.
    assert!(store.recent_checks(2, 10).unwrap().is_empty());

    // Idempotent when re-applied with the same list.
    store.sync_monitors(&[rows_to_monitor(&rows[0])]).unwrap();
    assert_eq!(store.monitors().unwrap().len(), 1);
}

fn rows_to_monitor(row: &crate::MonitorRow) -> Monitor {
    Monitor {
        id: row.id,
        name: row.name.clone(),
        group: row.group.clone(),
        monitor_type: row.monitor_type,
        url: row.url.clone(),
        interval_seconds: row.interval_seconds as u64,
        public: row.public,
        conditions: vec![],
        dns: None,
        maintenance_windows: vec![],
    }
}
