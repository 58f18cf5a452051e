use crate::flapping::flapping_status;
use crate::maintenance::{DailyWindow, MaintenanceOracle};
use crate::{severity_for, IncidentDetector, DEFAULT_FAILURE_THRESHOLD};
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use std::sync::Arc;
use vigil_common::{
    CheckResult, CheckStatus, IncidentEventKind, MaintenanceWindowSpec, Severity,
};
use vigil_storage::Store;

fn setup(threshold: usize) -> (Arc<Store>, Arc<MaintenanceOracle>, IncidentDetector) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let oracle = Arc::new(MaintenanceOracle::new(store.clone()));
    let detector = IncidentDetector::new(store.clone(), oracle.clone(), threshold);
    (store, oracle, detector)
}

fn result(
    monitor_id: i64,
    success: bool,
    error: Option<&str>,
    timestamp: DateTime<Utc>,
) -> CheckResult {
    CheckResult {
        monitor_id,
        monitor_name: format!("monitor-{monitor_id}"),
        timestamp,
        success,
        response_time_ms: if success { 42 } else { 0 },
        error: error.map(|e| e.to_string()),
        condition_results: vec![],
    }
}

#[test]
fn incident_opens_at_threshold_and_resolves_on_recovery() {
    let (store, _oracle, detector) = setup(DEFAULT_FAILURE_THRESHOLD);
    let t0 = Utc::now() - Duration::seconds(40);

    // t=0,10: success; t=20,30: timeout; t=40: success.
    let samples = [
        (0, true, None),
        (10, true, None),
        (20, false, Some("timeout")),
        (30, false, Some("timeout")),
        (40, true, None),
    ];

    let mut events = detector.subscribe();
    for (offset, success, error) in &samples[..3] {
        detector
            .process(&result(1, *success, *error, t0 + Duration::seconds(*offset)))
            .unwrap();
    }
    // One failure is below the threshold: nothing open yet.
    assert_eq!(store.count_active_incidents(1).unwrap(), 0);

    let (offset, success, error) = samples[3];
    detector
        .process(&result(1, success, error, t0 + Duration::seconds(offset)))
        .unwrap();
    let incident = store.active_incident(1).unwrap().expect("incident open");
    assert_eq!(incident.severity, Severity::Major);
    assert_eq!(incident.title, "monitor-1 is down");
    assert_eq!(
        incident.started_at.timestamp(),
        (t0 + Duration::seconds(30)).timestamp()
    );

    let (offset, success, error) = samples[4];
    detector
        .process(&result(1, success, error, t0 + Duration::seconds(offset)))
        .unwrap();
    assert_eq!(store.count_active_incidents(1).unwrap(), 0);
    let resolved = store.incidents_for_monitor(1, 10).unwrap();
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].resolved_at.is_some());

    // Lifecycle events arrived in order.
    let opened = events.try_recv().unwrap();
    assert_eq!(opened.kind, IncidentEventKind::Opened);
    assert_eq!(opened.severity, Some(Severity::Major));
    let recovery = events.try_recv().unwrap();
    assert_eq!(recovery.kind, IncidentEventKind::Resolved);
    assert!(events.try_recv().is_err());
}

#[test]
fn single_failure_does_not_open() {
    let (store, _oracle, detector) = setup(DEFAULT_FAILURE_THRESHOLD);
    let t0 = Utc::now() - Duration::seconds(20);

    for (offset, success) in [(0, true), (10, false), (20, true)] {
        detector
            .process(&result(
                1,
                success,
                (!success).then_some("timeout"),
                t0 + Duration::seconds(offset),
            ))
            .unwrap();
    }

    assert!(store.incidents_for_monitor(1, 10).unwrap().is_empty());
    let checks = store.recent_checks(1, 10).unwrap();
    assert_eq!(checks.len(), 3);
    assert_eq!(
        checks.iter().filter(|c| c.status == CheckStatus::Down).count(),
        1
    );
}

#[test]
fn maintenance_suppresses_incidents_but_not_check_rows() {
    let (store, oracle, detector) = setup(DEFAULT_FAILURE_THRESHOLD);

    // A recurring daily window that covers the current minute.
    let now = Utc::now();
    let start = now - Duration::minutes(5);
    let end = now + Duration::minutes(10);
    oracle.replace_recurring(
        2,
        vec![DailyWindow {
            start: NaiveTime::from_hms_opt(start.hour(), start.minute(), 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.hour(), end.minute(), 0).unwrap(),
            tz: chrono_tz::UTC,
            description: Some("daily upgrade".into()),
        }],
    );

    for i in 0..5 {
        detector
            .process(&result(
                2,
                false,
                Some("timeout"),
                now + Duration::seconds(i * 2),
            ))
            .unwrap();
    }

    // Five down rows inserted, zero incidents opened.
    let checks = store.recent_checks(2, 10).unwrap();
    assert_eq!(checks.len(), 5);
    assert!(checks.iter().all(|c| c.status == CheckStatus::Down));
    assert!(store.incidents_for_monitor(2, 10).unwrap().is_empty());
}

#[test]
fn at_most_one_active_incident_under_repeated_failures() {
    let (store, _oracle, detector) = setup(DEFAULT_FAILURE_THRESHOLD);
    let t0 = Utc::now() - Duration::seconds(100);

    for i in 0..10 {
        detector
            .process(&result(1, false, Some("timeout"), t0 + Duration::seconds(i * 10)))
            .unwrap();
        assert!(store.count_active_incidents(1).unwrap() <= 1);
    }
    assert_eq!(store.count_active_incidents(1).unwrap(), 1);
    // Only one incident was ever created despite 10 failures.
    assert_eq!(store.incidents_for_monitor(1, 10).unwrap().len(), 1);
}

#[test]
fn short_failure_runs_between_successes_never_open() {
    let (store, _oracle, detector) = setup(3);
    let mut t = Utc::now() - Duration::minutes(10);

    // Runs of 1 and 2 failures bracketed by successes, threshold 3.
    for success in [true, false, true, false, false, true, false, true] {
        detector
            .process(&result(1, success, (!success).then_some("err"), t))
            .unwrap();
        t += Duration::seconds(10);
    }
    assert!(store.incidents_for_monitor(1, 10).unwrap().is_empty());

    // The third consecutive failure crosses the threshold.
    for _ in 0..3 {
        detector
            .process(&result(1, false, Some("err"), t))
            .unwrap();
        t += Duration::seconds(10);
    }
    assert_eq!(store.count_active_incidents(1).unwrap(), 1);
}

#[test]
fn first_success_resolves_and_sets_resolved_at() {
    let (store, _oracle, detector) = setup(1);
    let t0 = Utc::now() - Duration::seconds(30);

    detector.process(&result(1, false, Some("boom"), t0)).unwrap();
    assert_eq!(store.count_active_incidents(1).unwrap(), 1);

    let recovery_time = t0 + Duration::seconds(10);
    detector.process(&result(1, true, None, recovery_time)).unwrap();
    let incidents = store.incidents_for_monitor(1, 10).unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(
        incidents[0].resolved_at.unwrap().timestamp(),
        recovery_time.timestamp()
    );
}

#[test]
fn severity_mapping_from_error_text() {
    assert_eq!(severity_for(Some("DNS query for x failed")), Severity::Critical);
    assert_eq!(severity_for(Some("certificate has expired")), Severity::Critical);
    assert_eq!(severity_for(Some("request timeout")), Severity::Major);
    assert_eq!(severity_for(Some("ECONNREFUSED")), Severity::Major);
    assert_eq!(
        severity_for(Some("TCP connection failed: Connection refused (os error 111)")),
        Severity::Major
    );
    assert_eq!(severity_for(Some("HTTP 500")), Severity::Minor);
    assert_eq!(severity_for(None), Severity::Minor);
}

#[test]
fn flapping_requires_enough_samples() {
    let (store, _oracle, detector) = setup(99);
    let mut t = Utc::now() - Duration::minutes(30);

    // 8 alternating samples: plenty of transitions but too few rows.
    for i in 0..8 {
        detector
            .process(&result(1, i % 2 == 0, None, t))
            .unwrap();
        t += Duration::seconds(10);
    }
    let status = flapping_status(&store, 1).unwrap();
    assert!(!status.flapping);
    assert_eq!(status.samples, 8);

    // 4 more alternating samples push past both thresholds.
    for i in 0..4 {
        detector
            .process(&result(1, i % 2 == 0, None, t))
            .unwrap();
        t += Duration::seconds(10);
    }
    let status = flapping_status(&store, 1).unwrap();
    assert!(status.flapping);
    assert!(status.transitions > 5);
}

#[test]
fn steady_monitor_is_not_flapping() {
    let (store, _oracle, detector) = setup(99);
    let mut t = Utc::now() - Duration::minutes(30);
    for _ in 0..20 {
        detector.process(&result(1, true, None, t)).unwrap();
        t += Duration::seconds(10);
    }
    let status = flapping_status(&store, 1).unwrap();
    assert!(!status.flapping);
    assert_eq!(status.transitions, 0);
}

mod oracle {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_window_same_day() {
        let window = DailyWindow {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            tz: chrono_tz::UTC,
            description: None,
        };
        let inside = Utc.with_ymd_and_hms(2025, 6, 1, 9, 5, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2025, 6, 1, 8, 59, 0).unwrap();
        let at_end = Utc.with_ymd_and_hms(2025, 6, 1, 9, 15, 0).unwrap();
        assert!(window.is_active(inside));
        assert!(!window.is_active(before));
        // End bound is exclusive.
        assert!(!window.is_active(at_end));

        let ends = window.ends_at(inside).unwrap();
        assert_eq!(ends, Utc.with_ymd_and_hms(2025, 6, 1, 9, 15, 0).unwrap());
    }

    #[test]
    fn daily_window_overnight_wraparound() {
        let window = DailyWindow {
            start: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
            tz: chrono_tz::UTC,
            description: None,
        };
        let late = Utc.with_ymd_and_hms(2025, 6, 1, 23, 30, 0).unwrap();
        let small_hours = Utc.with_ymd_and_hms(2025, 6, 2, 0, 30, 0).unwrap();
        let midday = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert!(window.is_active(late));
        assert!(window.is_active(small_hours));
        assert!(!window.is_active(midday));

        // Before midnight, the end is tomorrow's 01:00.
        assert_eq!(
            window.ends_at(late).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 1, 0, 0).unwrap()
        );
        // After midnight, it is today's 01:00.
        assert_eq!(
            window.ends_at(small_hours).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 1, 0, 0).unwrap()
        );
    }

    #[test]
    fn daily_window_respects_timezone() {
        // 09:00-10:00 in New York is 13:00-14:00 UTC (June, DST).
        let window = DailyWindow {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            tz: chrono_tz::America::New_York,
            description: None,
        };
        let utc_morning = Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap();
        let ny_morning = Utc.with_ymd_and_hms(2025, 6, 1, 13, 30, 0).unwrap();
        assert!(!window.is_active(utc_morning));
        assert!(window.is_active(ny_morning));
    }

    #[test]
    fn fixed_windows_via_store_and_daily_precedence() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let oracle = MaintenanceOracle::new(store.clone());
        let now = Utc::now();

        store
            .replace_fixed_windows(
                Some(7),
                &[vigil_storage::NewFixedWindow {
                    monitor_id: Some(7),
                    start_time: now - Duration::minutes(30),
                    end_time: now + Duration::minutes(30),
                    timezone: "UTC".into(),
                    description: Some("planned".into()),
                }],
            )
            .unwrap();

        let status = oracle.in_maintenance(7, now).unwrap();
        assert!(status.in_maintenance);
        assert_eq!(status.description.as_deref(), Some("planned"));
        assert_eq!(
            status.ends_at.unwrap().timestamp(),
            (now + Duration::minutes(30)).timestamp()
        );

        // A simultaneously-active daily window wins.
        let start = now - Duration::minutes(5);
        let end = now + Duration::minutes(5);
        oracle.replace_recurring(
            7,
            vec![DailyWindow {
                start: NaiveTime::from_hms_opt(start.hour(), start.minute(), 0).unwrap(),
                end: NaiveTime::from_hms_opt(end.hour(), end.minute(), 0).unwrap(),
                tz: chrono_tz::UTC,
                description: Some("daily".into()),
            }],
        );
        let status = oracle.in_maintenance(7, now).unwrap();
        assert!(status.in_maintenance);
        assert_eq!(status.description.as_deref(), Some("daily"));

        // Other monitors are unaffected.
        assert!(!oracle.in_maintenance(8, now).unwrap().in_maintenance);
    }

    #[test]
    fn reload_replaces_recurring_map_wholesale() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let oracle = MaintenanceOracle::new(store);
        let now = Utc::now();
        let start = now - Duration::minutes(1);
        let end = now + Duration::minutes(5);

        let mut monitor = vigil_common::Monitor {
            id: 1,
            name: "m".into(),
            group: None,
            monitor_type: vigil_common::MonitorType::Http,
            url: "http://x".into(),
            interval_seconds: 30,
            public: true,
            conditions: vec![],
            dns: None,
            maintenance_windows: vec![MaintenanceWindowSpec::Daily {
                start_time: format!("{:02}:{:02}", start.hour(), start.minute()),
                end_time: format!("{:02}:{:02}", end.hour(), end.minute()),
                timezone: "UTC".into(),
                description: None,
            }],
        };
        oracle.load_from_monitors(std::slice::from_ref(&monitor));
        assert!(oracle.in_maintenance(1, now).unwrap().in_maintenance);

        // Reload without the window clears it.
        monitor.maintenance_windows.clear();
        oracle.load_from_monitors(&[monitor]);
        assert!(!oracle.in_maintenance(1, now).unwrap().in_maintenance);
    }
}
