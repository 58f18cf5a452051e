use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use vigil_common::{MaintenanceWindowSpec, Monitor};
use vigil_storage::{Result, Store};

/// A recurring daily window, held in memory. `start > end` wraps overnight.
#[derive(Debug, Clone)]
pub struct DailyWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub tz: Tz,
    pub description: Option<String>,
}

impl DailyWindow {
    /// Builds a window from its config spec; `None` for fixed specs or when
    /// the times/timezone do not parse (config validation reports those
    /// before the oracle ever sees them).
    pub fn from_spec(spec: &MaintenanceWindowSpec) -> Option<Self> {
        let MaintenanceWindowSpec::Daily {
            start_time,
            end_time,
            timezone,
            description,
        } = spec
        else {
            return None;
        };
        Some(Self {
            start: NaiveTime::parse_from_str(start_time, "%H:%M").ok()?,
            end: NaiveTime::parse_from_str(end_time, "%H:%M").ok()?,
            tz: timezone.parse().ok()?,
            description: description.clone(),
        })
    }

    fn minutes(&self, time: NaiveTime) -> u32 {
        time.hour() * 60 + time.minute()
    }

    /// Active iff the current minute-of-day in the window's timezone falls in
    /// `[start, end)`, with overnight wraparound when `start > end`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        let minute = local.hour() * 60 + local.minute();
        let start = self.minutes(self.start);
        let end = self.minutes(self.end);
        if start <= end {
            minute >= start && minute < end
        } else {
            minute >= start || minute < end
        }
    }

    /// The next wall-clock occurrence of `end` in the window's timezone —
    /// tomorrow when an overnight window has already wrapped past midnight's
    /// far side.
    pub fn ends_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = now.with_timezone(&self.tz);
        let minute = local.hour() * 60 + local.minute();
        let start = self.minutes(self.start);
        let end = self.minutes(self.end);

        let date = if start > end && minute >= start {
            local.date_naive() + Duration::days(1)
        } else {
            local.date_naive()
        };
        self.tz
            .from_local_datetime(&date.and_time(self.end))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Answer to "is this monitor in a maintenance window right now?".
#[derive(Debug, Clone, Default)]
pub struct MaintenanceStatus {
    pub in_maintenance: bool,
    pub description: Option<String>,
    pub ends_at: Option<DateTime<Utc>>,
}

/// Maintenance oracle: recurring daily windows in an in-memory map written
/// only by the reload path, fixed windows through the store. Daily windows
/// take precedence when both apply.
pub struct MaintenanceOracle {
    store: Arc<Store>,
    recurring: RwLock<HashMap<i64, Vec<DailyWindow>>>,
}

impl MaintenanceOracle {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            recurring: RwLock::new(HashMap::new()),
        }
    }

    fn read_recurring(&self) -> RwLockReadGuard<'_, HashMap<i64, Vec<DailyWindow>>> {
        self.recurring
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_recurring(&self) -> RwLockWriteGuard<'_, HashMap<i64, Vec<DailyWindow>>> {
        self.recurring
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces one monitor's recurring windows wholesale.
    pub fn replace_recurring(&self, monitor_id: i64, windows: Vec<DailyWindow>) {
        let mut map = self.write_recurring();
        if windows.is_empty() {
            map.remove(&monitor_id);
        } else {
            map.insert(monitor_id, windows);
        }
    }

    /// Rebuilds the whole recurring map from a new monitor list (reload).
    pub fn load_from_monitors(&self, monitors: &[Monitor]) {
        let mut fresh: HashMap<i64, Vec<DailyWindow>> = HashMap::new();
        for monitor in monitors {
            let windows: Vec<DailyWindow> = monitor
                .maintenance_windows
                .iter()
                .filter_map(DailyWindow::from_spec)
                .collect();
            if !windows.is_empty() {
                fresh.insert(monitor.id, windows);
            }
        }
        *self.write_recurring() = fresh;
    }

    /// Two-step lookup: recurring daily windows first, then fixed windows
    /// (monitor-scoped or global) from the store.
    pub fn in_maintenance(&self, monitor_id: i64, now: DateTime<Utc>) -> Result<MaintenanceStatus> {
        {
            let map = self.read_recurring();
            if let Some(windows) = map.get(&monitor_id) {
                for window in windows {
                    if window.is_active(now) {
                        return Ok(MaintenanceStatus {
                            in_maintenance: true,
                            description: window.description.clone(),
                            ends_at: window.ends_at(now),
                        });
                    }
                }
            }
        }

        if let Some(row) = self.store.active_fixed_window(monitor_id, now)? {
            return Ok(MaintenanceStatus {
                in_maintenance: true,
                description: row.description,
                ends_at: Some(row.end_time),
            });
        }

        Ok(MaintenanceStatus::default())
    }
}
