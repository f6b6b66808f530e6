use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a training plan.
///
/// ```text
/// payment_pending -> payment_approved -> queued -> generating -> completed
///                                          ^           |
///                                          |           v
///                                          +------- failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    PaymentPending,
    PaymentApproved,
    Queued,
    Generating,
    Completed,
    Failed,
}

impl PlanStatus {
    pub const ALL: [PlanStatus; 6] = [
        Self::PaymentPending,
        Self::PaymentApproved,
        Self::Queued,
        Self::Generating,
        Self::Completed,
        Self::Failed,
    ];

    /// Whether an owner may ask for this plan to be generated.
    pub fn can_generate(self) -> bool {
        matches!(self, Self::PaymentApproved | Self::Failed)
    }

    /// Statuses a worker is allowed to claim a plan from.
    pub fn is_claimable(self) -> bool {
        matches!(self, Self::Queued | Self::PaymentApproved | Self::Failed)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PaymentPending => "payment_pending",
            Self::PaymentApproved => "payment_approved",
            Self::Queued => "queued",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanStatus {
    type Err = PlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment_pending" => Ok(Self::PaymentPending),
            "payment_approved" => Ok(Self::PaymentApproved),
            "queued" => Ok(Self::Queued),
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(PlanStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanStatus`] string.
#[derive(Debug, Clone)]
pub struct PlanStatusParseError(pub String);

impl fmt::Display for PlanStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan status: {:?}", self.0)
    }
}

impl std::error::Error for PlanStatusParseError {}

// ---------------------------------------------------------------------------

/// Training discipline a plan belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Discipline {
    General,
    Strength,
    Running,
    Cycling,
}

impl Discipline {
    pub const ALL: [Discipline; 4] = [
        Self::General,
        Self::Strength,
        Self::Running,
        Self::Cycling,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Strength => "strength",
            Self::Running => "running",
            Self::Cycling => "cycling",
        }
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Discipline {
    type Err = DisciplineParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "strength" => Ok(Self::Strength),
            "running" => Ok(Self::Running),
            "cycling" => Ok(Self::Cycling),
            _ => Err(DisciplineParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Discipline`] string.
#[derive(Debug, Clone)]
pub struct DisciplineParseError(pub String);

impl fmt::Display for DisciplineParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid discipline: {:?}", self.0)
    }
}

impl std::error::Error for DisciplineParseError {}

// ---------------------------------------------------------------------------

/// Gateway status vocabulary. Payment status is stored verbatim as reported
/// by the gateway, so these are plain strings rather than an enum.
pub mod payment_status {
    pub const PENDING: &str = "pending";
    pub const IN_PROCESS: &str = "in_process";
    pub const IN_MEDIATION: &str = "in_mediation";
    pub const APPROVED: &str = "approved";
    pub const REJECTED: &str = "rejected";
    pub const CANCELLED: &str = "cancelled";

    /// Statuses that still await a gateway decision.
    pub const OPEN: [&str; 3] = [PENDING, IN_PROCESS, IN_MEDIATION];

    pub fn is_terminal(status: &str) -> bool {
        [APPROVED, REJECTED, CANCELLED]
            .iter()
            .any(|s| s.eq_ignore_ascii_case(status))
    }

    pub fn is_approved(status: &str) -> bool {
        status.eq_ignore_ascii_case(APPROVED)
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A row from the `plans` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub plan_id: String,
    pub owner: String,
    pub discipline: Discipline,
    /// Discipline-specific athlete attributes.
    pub athlete: serde_json::Value,
    /// Plan length in weeks.
    pub plan_duration: i32,
    pub status: PlanStatus,
    pub content: String,
    pub document_paths: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `payments` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub external_reference: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_preference_id: Option<String>,
    pub owner: String,
    pub plan_id: Option<String>,
    pub amount_cents: i64,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A row from the `entitlements` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Entitlement {
    pub owner: String,
    pub tier: String,
    pub expires_at: DateTime<Utc>,
    pub activations: i32,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `generation_queue` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueuedMessage {
    pub id: i64,
    pub queue_name: String,
    pub routing_key: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub delivery_count: i32,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_status_display_roundtrip() {
        for status in PlanStatus::ALL {
            let parsed: PlanStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("generated".parse::<PlanStatus>().is_err());
    }

    #[test]
    fn plan_status_serializes_upper_case() {
        let json = serde_json::to_string(&PlanStatus::PaymentApproved).unwrap();
        assert_eq!(json, "\"PAYMENT_APPROVED\"");
    }

    #[test]
    fn can_generate_only_after_approval_or_failure() {
        let allowed: Vec<PlanStatus> = PlanStatus::ALL
            .into_iter()
            .filter(|s| s.can_generate())
            .collect();
        assert_eq!(allowed, vec![PlanStatus::PaymentApproved, PlanStatus::Failed]);
    }

    #[test]
    fn discipline_parse_is_case_insensitive() {
        assert_eq!("RUNNING".parse::<Discipline>().unwrap(), Discipline::Running);
        assert_eq!("cycling".parse::<Discipline>().unwrap(), Discipline::Cycling);
        assert!("rowing".parse::<Discipline>().is_err());
    }

    #[test]
    fn payment_status_classes() {
        assert!(payment_status::is_terminal("REJECTED"));
        assert!(!payment_status::is_terminal("pending"));
        assert!(payment_status::is_terminal("cancelled"));
        assert!(!payment_status::is_terminal("in_mediation"));
        assert!(payment_status::is_approved("Approved"));
    }
}
