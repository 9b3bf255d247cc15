use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionLimits {
    pub max_rows: u64,
    pub max_days: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetentionStatus {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub oldest: Option<f64>,
    #[serde(default)]
    pub newest: Option<f64>,
    #[serde(default)]
    pub max_rows: u64,
    #[serde(default)]
    pub max_days: u64,
    #[serde(default)]
    pub excess_rows: u64,
    #[serde(default)]
    pub excess_age_s: f64,
    #[serde(default)]
    pub drift: bool,
    #[serde(default)]
    pub last_cleanup_at: Option<f64>,
}

impl RetentionStatus {
    /// Drift holds when the row count is over `max_rows` or the oldest row is
    /// older than `max_days`. A limit of zero disables that check.
    pub fn evaluate(
        count: u64,
        oldest: Option<f64>,
        newest: Option<f64>,
        limits: RetentionLimits,
        last_cleanup_at: Option<f64>,
        now: f64,
    ) -> Self {
        let excess_rows = if limits.max_rows > 0 {
            count.saturating_sub(limits.max_rows)
        } else {
            0
        };
        let excess_age_s = match oldest {
            Some(oldest) if limits.max_days > 0 => {
                let max_age = limits.max_days as f64 * SECS_PER_DAY;
                ((now - oldest) - max_age).max(0.0)
            }
            _ => 0.0,
        };
        Self {
            count,
            oldest,
            newest,
            max_rows: limits.max_rows,
            max_days: limits.max_days,
            excess_rows,
            excess_age_s,
            drift: excess_rows > 0 || excess_age_s > 0.0,
            last_cleanup_at,
        }
    }

    pub fn limits(&self) -> RetentionLimits {
        RetentionLimits {
            max_rows: self.max_rows,
            max_days: self.max_days,
        }
    }

    /// Re-runs the drift check locally over a server-reported status. Excess
    /// values only ever grow: a server that omits them, or reports them
    /// before its own clock catches up, still surfaces drift.
    pub fn checked(self, now: f64) -> Self {
        let local = Self::evaluate(
            self.count,
            self.oldest,
            self.newest,
            self.limits(),
            self.last_cleanup_at,
            now,
        );
        let excess_rows = self.excess_rows.max(local.excess_rows);
        let excess_age_s = self.excess_age_s.max(local.excess_age_s);
        Self {
            excess_rows,
            excess_age_s,
            drift: self.drift || local.drift,
            ..self
        }
    }

    pub fn warning(&self) -> Option<String> {
        if !self.drift {
            return None;
        }
        let mut parts = Vec::new();
        if self.excess_rows > 0 {
            parts.push(format!(
                "{} rows over the {} row limit",
                self.excess_rows, self.max_rows
            ));
        }
        if self.excess_age_s > 0.0 {
            parts.push(format!(
                "oldest row {:.1} days past the {} day limit",
                self.excess_age_s / SECS_PER_DAY,
                self.max_days
            ));
        }
        if parts.is_empty() {
            parts.push("retention drift reported by server".to_string());
        }
        Some(parts.join("; "))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_days: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupOutcome {
    #[serde(default)]
    pub deleted_by_rows: u64,
    #[serde(default)]
    pub deleted_by_days: u64,
}

impl CleanupOutcome {
    pub fn total(&self) -> u64 {
        self.deleted_by_rows + self.deleted_by_days
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Self::Viewer
    }
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Operator => "operator",
            Self::Admin => "admin",
        }
    }

    pub fn can_run_cleanup(self) -> bool {
        self == Self::Admin
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "viewer" | "readonly" | "read-only" => Ok(Self::Viewer),
            "operator" => Ok(Self::Operator),
            "admin" => Ok(Self::Admin),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: f64 = 1_760_000_000.0;

    fn limits(max_rows: u64, max_days: u64) -> RetentionLimits {
        RetentionLimits { max_rows, max_days }
    }

    #[test]
    fn row_excess_sets_drift() {
        let status =
            RetentionStatus::evaluate(5_000, Some(NOW - 60.0), Some(NOW), limits(2_000, 30), None, NOW);
        assert_eq!(status.excess_rows, 3_000);
        assert!(status.drift);
        assert!(status.warning().expect("warning").contains("3000 rows"));
    }

    #[test]
    fn within_limits_has_no_drift() {
        let status =
            RetentionStatus::evaluate(1_000, Some(NOW - 60.0), Some(NOW), limits(2_000, 30), None, NOW);
        assert_eq!(status.excess_rows, 0);
        assert_eq!(status.excess_age_s, 0.0);
        assert!(!status.drift);
        assert_eq!(status.warning(), None);
    }

    #[test]
    fn age_excess_sets_drift() {
        let oldest = NOW - 32.0 * SECS_PER_DAY;
        let status = RetentionStatus::evaluate(10, Some(oldest), Some(NOW), limits(2_000, 30), None, NOW);
        assert_eq!(status.excess_rows, 0);
        assert!((status.excess_age_s - 2.0 * SECS_PER_DAY).abs() < 1e-6);
        assert!(status.drift);
    }

    #[test]
    fn empty_table_and_zero_limits_never_drift() {
        let empty = RetentionStatus::evaluate(0, None, None, limits(2_000, 30), None, NOW);
        assert!(!empty.drift);

        let unlimited =
            RetentionStatus::evaluate(9_999, Some(0.0), Some(NOW), limits(0, 0), None, NOW);
        assert!(!unlimited.drift);
    }

    #[test]
    fn status_decodes_server_payload() {
        let status: RetentionStatus = serde_json::from_str(
            r#"{"count":5000,"oldest":1.0,"newest":2.0,"max_rows":2000,"max_days":30,
                "excess_rows":3000,"excess_age_s":0,"drift":true,"last_cleanup_at":null}"#,
        )
        .expect("decode status");
        assert!(status.drift);
        assert_eq!(status.limits(), limits(2_000, 30));
    }

    #[test]
    fn local_check_fills_in_drift_the_server_left_out() {
        let reported: RetentionStatus = serde_json::from_str(
            r#"{"count":2500,"oldest":1.0,"newest":2.0,"max_rows":2000,"max_days":0}"#,
        )
        .expect("decode sparse status");
        assert!(!reported.drift);

        let checked = reported.checked(NOW);
        assert!(checked.drift);
        assert_eq!(checked.excess_rows, 500);
        assert_eq!(checked.count, 2_500);

        let clean = RetentionStatus::evaluate(10, Some(NOW), Some(NOW), limits(2_000, 30), None, NOW);
        let server_says_drift = RetentionStatus {
            drift: true,
            ..clean
        };
        assert!(server_says_drift.checked(NOW).drift);
    }

    #[test]
    fn only_admin_may_clean_up() {
        assert!(!Role::Viewer.can_run_cleanup());
        assert!(!Role::Operator.can_run_cleanup());
        assert!(Role::Admin.can_run_cleanup());
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
    }

    #[test]
    fn overrides_skip_unset_fields() {
        let body = serde_json::to_value(RetentionOverrides {
            max_rows: Some(1_000),
            max_days: None,
        })
        .expect("encode overrides");
        assert_eq!(body, serde_json::json!({"max_rows": 1000}));
    }
}
