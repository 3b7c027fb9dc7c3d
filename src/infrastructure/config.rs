use crate::domain::interpolation::InterpolationPolicy;
use crate::domain::time_order::LocalCalendar;
use crate::infrastructure::error::InfraError;
use chrono::{Duration, Weekday};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const REORDER_JSON: &str = "reorder.json";
const HOUSEKEEPING_JSON: &str = "housekeeping.json";
const REMINDERS_JSON: &str = "reminders.json";

pub const DEFAULT_REMINDER_CATEGORY: &str = "OverdueTasksCategory";

#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub calendar: LocalCalendar,
    pub due_hours_from_now: f64,
}

impl AppSettings {
    /// Default due date offset for newly created tasks.
    pub fn default_due_offset(&self) -> Duration {
        Duration::milliseconds((self.due_hours_from_now * 3_600_000.0).round() as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HousekeepingSettings {
    pub archive_past_completion: bool,
    pub delete_unused_locations: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderSettings {
    pub category: String,
    pub snooze: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub app: AppSettings,
    pub reorder: InterpolationPolicy,
    pub housekeeping: HousekeepingSettings,
    pub reminders: ReminderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app: AppSettings {
                calendar: LocalCalendar::default(),
                due_hours_from_now: 3.0,
            },
            reorder: InterpolationPolicy::default(),
            housekeeping: HousekeepingSettings {
                archive_past_completion: true,
                delete_unused_locations: true,
            },
            reminders: ReminderSettings {
                category: DEFAULT_REMINDER_CATEGORY.to_string(),
                snooze: Duration::seconds(450),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppFile {
    timezone: String,
    week_starts_on: String,
    due_hours_from_now: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReorderFile {
    fixed_offset_seconds: i64,
    minimum_increment_millis: i64,
    renormalization_spacing_seconds: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HousekeepingFile {
    archive_past_completion: bool,
    delete_unused_archived_locations: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemindersFile {
    category: String,
    snooze_seconds: i64,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "timezone": "UTC",
                "weekStartsOn": "monday",
                "dueHoursFromNow": 3.0
            }),
        ),
        (
            REORDER_JSON,
            serde_json::json!({
                "schema": 1,
                "fixedOffsetSeconds": 3600,
                "minimumIncrementMillis": 1000,
                "renormalizationSpacingSeconds": 60
            }),
        ),
        (
            HOUSEKEEPING_JSON,
            serde_json::json!({
                "schema": 1,
                "archivePastCompletion": true,
                "deleteUnusedArchivedLocations": true
            }),
        ),
        (
            REMINDERS_JSON,
            serde_json::json!({
                "schema": 1,
                "category": DEFAULT_REMINDER_CATEGORY,
                "snoozeSeconds": 450
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_typed<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, InfraError> {
    let value = read_config(path)?;
    serde_json::from_value(value).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })
}

pub fn load_settings(config_dir: &Path) -> Result<Settings, InfraError> {
    let app: AppFile = read_typed(&config_dir.join(APP_JSON))?;
    let reorder: ReorderFile = read_typed(&config_dir.join(REORDER_JSON))?;
    let housekeeping: HousekeepingFile = read_typed(&config_dir.join(HOUSEKEEPING_JSON))?;
    let reminders: RemindersFile = read_typed(&config_dir.join(REMINDERS_JSON))?;

    let time_zone = app
        .timezone
        .trim()
        .parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("app.timezone: {error}")))?;
    let week_start = app
        .week_starts_on
        .trim()
        .parse::<Weekday>()
        .map_err(|_| {
            InfraError::InvalidConfig(format!(
                "app.weekStartsOn must be a weekday name, got '{}'",
                app.week_starts_on
            ))
        })?;
    if !app.due_hours_from_now.is_finite() || app.due_hours_from_now < 0.0 {
        return Err(InfraError::InvalidConfig(
            "app.dueHoursFromNow must be a non-negative number".to_string(),
        ));
    }

    let policy = InterpolationPolicy {
        fixed_offset: Duration::seconds(reorder.fixed_offset_seconds),
        minimum_increment: Duration::milliseconds(reorder.minimum_increment_millis),
        renormalization_spacing: Duration::seconds(reorder.renormalization_spacing_seconds),
    };
    policy.validate().map_err(InfraError::InvalidConfig)?;

    let category = reminders.category.trim();
    if category.is_empty() {
        return Err(InfraError::InvalidConfig(
            "reminders.category must not be empty".to_string(),
        ));
    }
    if reminders.snooze_seconds <= 0 {
        return Err(InfraError::InvalidConfig(
            "reminders.snoozeSeconds must be > 0".to_string(),
        ));
    }

    Ok(Settings {
        app: AppSettings {
            calendar: LocalCalendar::new(time_zone, week_start),
            due_hours_from_now: app.due_hours_from_now,
        },
        reorder: policy,
        housekeeping: HousekeepingSettings {
            archive_past_completion: housekeeping.archive_past_completion,
            delete_unused_locations: housekeeping.delete_unused_archived_locations,
        },
        reminders: ReminderSettings {
            category: category.to_string(),
            snooze: Duration::seconds(reminders.snooze_seconds),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_TEMP_DIR: AtomicU64 = AtomicU64::new(1);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "todododo-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            Self { path }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn defaults_roundtrip_to_default_settings() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        let settings = load_settings(&dir.path).expect("load defaults");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.app.default_due_offset(), Duration::hours(3));
    }

    #[test]
    fn ensure_default_configs_keeps_existing_files() {
        let dir = TempConfigDir::new();
        fs::write(
            dir.path.join(APP_JSON),
            r#"{"schema": 1, "timezone": "Asia/Tokyo", "weekStartsOn": "sunday", "dueHoursFromNow": 1.5}"#,
        )
        .expect("seed app config");
        ensure_default_configs(&dir.path).expect("write defaults");

        let settings = load_settings(&dir.path).expect("load settings");
        assert_eq!(settings.app.calendar.time_zone, chrono_tz::Asia::Tokyo);
        assert_eq!(settings.app.calendar.week_start, Weekday::Sun);
        assert_eq!(settings.app.default_due_offset(), Duration::minutes(90));
    }

    #[test]
    fn rejects_unsupported_schema() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(
            dir.path.join(REORDER_JSON),
            r#"{"schema": 2, "fixedOffsetSeconds": 3600, "minimumIncrementMillis": 1000, "renormalizationSpacingSeconds": 60}"#,
        )
        .expect("overwrite reorder config");

        match load_settings(&dir.path) {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("unsupported schema")),
            other => panic!("expected invalid config error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_spacing_too_small_for_increment() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(
            dir.path.join(REORDER_JSON),
            r#"{"schema": 1, "fixedOffsetSeconds": 3600, "minimumIncrementMillis": 60000, "renormalizationSpacingSeconds": 60}"#,
        )
        .expect("overwrite reorder config");

        assert!(matches!(load_settings(&dir.path), Err(InfraError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_unknown_time_zone() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(
            dir.path.join(APP_JSON),
            r#"{"schema": 1, "timezone": "Mars/Olympus", "weekStartsOn": "monday", "dueHoursFromNow": 3}"#,
        )
        .expect("overwrite app config");

        assert!(matches!(load_settings(&dir.path), Err(InfraError::InvalidConfig(_))));
    }
}
