use chrono::Utc;
use rusqlite::params;
use vigil_common::{MaintenanceWindowSpec, Monitor, MonitorType};

use crate::maintenance::{replace_fixed_windows_tx, NewFixedWindow};
use crate::{parse_column, to_millis, Result, Store};

/// The persisted subset of a monitor definition.
#[derive(Debug, Clone)]
pub struct MonitorRow {
    pub id: i64,
    pub name: String,
    pub group: Option<String>,
    pub monitor_type: MonitorType,
    pub url: String,
    pub interval_seconds: i64,
    pub public: bool,
}

impl Store {
    /// Synchronizes the monitors table (and each monitor's fixed maintenance
    /// windows) with a new configuration, in one transaction:
    /// upsert by id, then remove monitors absent from the new list together
    /// with their checks, incidents, windows and history. Idempotent for an
    /// unchanged list.
    pub fn sync_monitors(&self, monitors: &[Monitor]) -> Result<()> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let now = to_millis(Utc::now());

        {
            let mut upsert = tx.prepare_cached(
                "INSERT INTO monitors
                     (id, name, grp, monitor_type, url, interval_seconds, public,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT (id) DO UPDATE SET
                     name = excluded.name,
                     grp = excluded.grp,
                     monitor_type = excluded.monitor_type,
                     url = excluded.url,
                     interval_seconds = excluded.interval_seconds,
                     public = excluded.public,
                     updated_at = excluded.updated_at",
            )?;
            for monitor in monitors {
                upsert.execute(params![
                    monitor.id,
                    monitor.name,
                    monitor.group,
                    monitor.monitor_type.to_string(),
                    monitor.url,
                    monitor.interval_seconds as i64,
                    monitor.public,
                    now,
                ])?;
            }
        }

        // Remove monitors that are gone, cascading to their data. Global
        // maintenance windows (null monitor_id) are kept.
        let keep_ids: Vec<i64> = monitors.iter().map(|m| m.id).collect();
        if keep_ids.is_empty() {
            for table in ["checks", "incidents", "maintenance_windows", "status_history"] {
                tx.execute(
                    &format!("DELETE FROM {table} WHERE monitor_id IS NOT NULL"),
                    [],
                )?;
            }
            tx.execute("DELETE FROM monitors", [])?;
        } else {
            let placeholders = vec!["?"; keep_ids.len()].join(", ");
            for table in ["checks", "incidents", "maintenance_windows", "status_history"] {
                let sql = format!(
                    "DELETE FROM {table}
                     WHERE monitor_id IS NOT NULL AND monitor_id NOT IN ({placeholders})"
                );
                tx.execute(&sql, rusqlite::params_from_iter(keep_ids.iter()))?;
            }
            let sql = format!("DELETE FROM monitors WHERE id NOT IN ({placeholders})");
            tx.execute(&sql, rusqlite::params_from_iter(keep_ids.iter()))?;
        }

        // Fixed maintenance windows are replaced wholesale per monitor.
        for monitor in monitors {
            let windows: Vec<NewFixedWindow> = monitor
                .maintenance_windows
                .iter()
                .filter_map(|spec| match spec {
                    MaintenanceWindowSpec::Fixed {
                        start,
                        end,
                        timezone,
                        description,
                    } => Some(NewFixedWindow {
                        monitor_id: Some(monitor.id),
                        start_time: *start,
                        end_time: *end,
                        timezone: timezone.clone(),
                        description: description.clone(),
                    }),
                    MaintenanceWindowSpec::Daily { .. } => None,
                })
                .collect();
            replace_fixed_windows_tx(&tx, Some(monitor.id), &windows)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// All persisted monitors, ordered by id.
    pub fn monitors(&self) -> Result<Vec<MonitorRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, grp, monitor_type, url, interval_seconds, public
             FROM monitors ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, bool>(6)?,
            ))
        })?;
        let mut result = Vec::new();
        for raw in rows {
            let (id, name, group, monitor_type, url, interval_seconds, public) = raw?;
            result.push(MonitorRow {
                id,
                name,
                group,
                monitor_type: parse_column(&monitor_type, "monitor_type")?,
                url,
                interval_seconds,
                public,
            });
        }
        Ok(result)
    }
}
