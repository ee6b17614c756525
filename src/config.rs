use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

const SETTINGS_KEY: &str = "engine";

pub const DEFAULT_SCORE_MAX: f64 = 10.0;
pub const DEFAULT_EXEMPT_TITLE: &str = "Attendance";
pub const DEFAULT_WIZARD_TTL_SECONDS: i64 = 15 * 60;
pub const MAX_WIZARD_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub score_max: f64,
    pub exempt_title: String,
    pub wizard_ttl_seconds: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            score_max: DEFAULT_SCORE_MAX,
            exempt_title: DEFAULT_EXEMPT_TITLE.to_string(),
            wizard_ttl_seconds: DEFAULT_WIZARD_TTL_SECONDS,
        }
    }
}

impl EngineConfig {
    /// Applies a partial camelCase patch. Unknown keys and bad values are
    /// rejected without touching `self`.
    pub fn apply_patch(&self, patch: &serde_json::Value) -> Result<EngineConfig, String> {
        let Some(obj) = patch.as_object() else {
            return Err("patch must be an object".to_string());
        };
        let mut next = self.clone();
        for (k, v) in obj {
            match k.as_str() {
                "scoreMax" => {
                    let Some(n) = v.as_f64() else {
                        return Err("scoreMax must be a number".to_string());
                    };
                    if !(n.is_finite() && n > 0.0) {
                        return Err("scoreMax must be > 0".to_string());
                    }
                    next.score_max = n;
                }
                "exemptTitle" => {
                    let Some(s) = v.as_str() else {
                        return Err("exemptTitle must be a string".to_string());
                    };
                    next.exempt_title = s.to_string();
                }
                "wizardTtlSeconds" => {
                    let Some(n) = v.as_i64() else {
                        return Err("wizardTtlSeconds must be an integer".to_string());
                    };
                    if !(1..=MAX_WIZARD_TTL_SECONDS).contains(&n) {
                        return Err(format!(
                            "wizardTtlSeconds must be between 1 and {}",
                            MAX_WIZARD_TTL_SECONDS
                        ));
                    }
                    next.wizard_ttl_seconds = n;
                }
                other => return Err(format!("unknown config key: {}", other)),
            }
        }
        Ok(next)
    }
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is invalid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

/// Stored config merged over defaults, so older workspaces pick up new keys.
pub fn load(conn: &Connection) -> anyhow::Result<EngineConfig> {
    let Some(stored) = settings_get_json(conn, SETTINGS_KEY)? else {
        return Ok(EngineConfig::default());
    };
    EngineConfig::default()
        .apply_patch(&stored)
        .map_err(|e| anyhow::anyhow!("stored engine config is invalid: {}", e))
}

pub fn save(conn: &Connection, cfg: &EngineConfig) -> anyhow::Result<()> {
    settings_set_json(
        conn,
        SETTINGS_KEY,
        &json!({
            "scoreMax": cfg.score_max,
            "exemptTitle": cfg.exempt_title,
            "wizardTtlSeconds": cfg.wizard_ttl_seconds,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_rejects_unknown_keys() {
        let cfg = EngineConfig::default();
        assert!(cfg.apply_patch(&json!({ "colour": "red" })).is_err());
        assert!(cfg.apply_patch(&json!({ "scoreMax": 0 })).is_err());
        assert!(cfg.apply_patch(&json!([])).is_err());
    }

    #[test]
    fn wizard_ttl_is_bounded() {
        let cfg = EngineConfig::default();
        assert!(cfg.apply_patch(&json!({ "wizardTtlSeconds": 0 })).is_err());
        assert!(cfg
            .apply_patch(&json!({ "wizardTtlSeconds": MAX_WIZARD_TTL_SECONDS + 1 }))
            .is_err());
        assert!(cfg.apply_patch(&json!({ "wizardTtlSeconds": i64::MAX })).is_err());
        let cfg = cfg
            .apply_patch(&json!({ "wizardTtlSeconds": MAX_WIZARD_TTL_SECONDS }))
            .expect("upper bound");
        assert_eq!(cfg.wizard_ttl_seconds, MAX_WIZARD_TTL_SECONDS);
    }

    #[test]
    fn load_rejects_out_of_range_stored_ttl() {
        let conn = Connection::open_in_memory().expect("open");
        crate::db::ensure_schema(&conn).expect("schema");
        settings_set_json(&conn, SETTINGS_KEY, &json!({ "wizardTtlSeconds": i64::MAX }))
            .expect("store");
        assert!(load(&conn).is_err());
    }

    #[test]
    fn patch_updates_only_named_fields() {
        let cfg = EngineConfig::default()
            .apply_patch(&json!({ "scoreMax": 5 }))
            .expect("patch");
        assert_eq!(cfg.score_max, 5.0);
        assert_eq!(cfg.exempt_title, DEFAULT_EXEMPT_TITLE);
        assert_eq!(cfg.wizard_ttl_seconds, DEFAULT_WIZARD_TTL_SECONDS);
    }
}
