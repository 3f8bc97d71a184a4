//! Core domain model for lead ingestion and distribution.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "leadsync-core";

/// Prefix of every `source` tag written by the sheet importer.
pub const SHEET_SOURCE_PREFIX: &str = "Google Sheet";

/// Builds the provenance tag stored in `leads.source`.
pub fn sheet_source_tag(campaign_name: Option<&str>) -> String {
    match campaign_name.map(str::trim).filter(|c| !c.is_empty()) {
        Some(campaign) => format!("{SHEET_SOURCE_PREFIX}: {campaign}"),
        None => SHEET_SOURCE_PREFIX.to_string(),
    }
}

/// Extracts the campaign name from a `"Google Sheet: <campaign>"` tag.
pub fn campaign_from_source_tag(source: &str) -> Option<&str> {
    source
        .strip_prefix(SHEET_SOURCE_PREFIX)
        .and_then(|rest| rest.strip_prefix(':'))
        .map(str::trim)
        .filter(|c| !c.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Interested,
    Converted,
    Lost,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Interested => "interested",
            LeadStatus::Converted => "converted",
            LeadStatus::Lost => "lost",
        }
    }
}

/// Pure mapper output for one spreadsheet row, before dedup and assignment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedLead {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: String,
    pub created_at: Option<DateTime<Utc>>,
    pub campaign_name: Option<String>,
}

impl NormalizedLead {
    pub fn source_tag(&self) -> String {
        sheet_source_tag(self.campaign_name.as_deref())
    }
}

/// Insert payload for the `leads` relation. `created_at = None` defers to the store default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLead {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub status: LeadStatus,
    pub source: String,
    pub source_url: Option<String>,
    pub assigned_to: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewLead {
    pub fn from_normalized(
        lead: NormalizedLead,
        source_url: &str,
        assigned_to: Option<String>,
    ) -> Self {
        let source = lead.source_tag();
        Self {
            first_name: lead.first_name,
            last_name: lead.last_name,
            email: lead.email,
            phone: lead.phone,
            notes: Some(lead.notes).filter(|n| !n.is_empty()),
            status: LeadStatus::New,
            source,
            source_url: Some(source_url.to_string()),
            assigned_to,
            created_at: lead.created_at,
        }
    }
}

/// Persisted lead row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub status: LeadStatus,
    pub source: Option<String>,
    pub source_url: Option<String>,
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Contact columns returned by the dedup lookups.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExistingContact {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Minimal projection used by bulk assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignedLead {
    pub id: Uuid,
    pub source: Option<String>,
}

/// Worker selection strategy. Unknown or empty values fall back to `Percentage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DistributionType {
    #[default]
    Percentage,
    RoundRobin,
    SheetBased,
}

impl DistributionType {
    pub fn as_str(self) -> &'static str {
        match self {
            DistributionType::Percentage => "percentage",
            DistributionType::RoundRobin => "round_robin",
            DistributionType::SheetBased => "sheet_based",
        }
    }
}

impl From<&str> for DistributionType {
    fn from(value: &str) -> Self {
        match value.trim() {
            "round_robin" => DistributionType::RoundRobin,
            "sheet_based" => DistributionType::SheetBased,
            _ => DistributionType::Percentage,
        }
    }
}

impl From<String> for DistributionType {
    fn from(value: String) -> Self {
        DistributionType::from(value.as_str())
    }
}

impl From<DistributionType> for String {
    fn from(value: DistributionType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssignmentRule {
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_percentage")]
    pub percentage: f64,
    #[serde(default)]
    pub active: bool,
}

/// Accepts a number, a numeric string or null. Anything unparseable counts as zero.
fn lenient_percentage<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(value)) => value,
        Some(Raw::Text(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        None => 0.0,
    })
}

impl AssignmentRule {
    /// Active and carrying a non-empty worker id.
    pub fn eligible_employee(&self) -> Option<&str> {
        if !self.active {
            return None;
        }
        self.employee_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SheetMapping {
    #[serde(default)]
    pub sheet_pattern: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
}

/// Fields an administrator may replace through "save settings".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowSettingsInput {
    #[serde(default)]
    pub auto_assign_enabled: bool,
    #[serde(default)]
    pub distribution_type: DistributionType,
    #[serde(default)]
    pub rules: Vec<AssignmentRule>,
    #[serde(default)]
    pub sheet_mappings: Vec<SheetMapping>,
}

/// Singleton configuration row; the most recently updated row wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    pub id: Uuid,
    pub auto_assign_enabled: bool,
    pub distribution_type: DistributionType,
    pub rules: Vec<AssignmentRule>,
    pub sheet_mappings: Vec<SheetMapping>,
    pub round_robin_index: i64,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowSettings {
    /// Eligible worker ids in stored rule order. Array order is priority order.
    pub fn active_employees(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter_map(AssignmentRule::eligible_employee)
            .collect()
    }

    /// Active rules paired with their weight, in stored order.
    pub fn active_weights(&self) -> Vec<(&str, f64)> {
        self.rules
            .iter()
            .filter_map(|r| r.eligible_employee().map(|id| (id, r.percentage)))
            .collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid timeframe {0:?}: expected \"all\" or a number of days")]
pub struct TimeframeError(pub String);

/// Window selector shared by all bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "TimeframeRepr", into = "String")]
pub enum Timeframe {
    #[default]
    All,
    TrailingDays(u32),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimeframeRepr {
    Days(u32),
    Text(String),
}

impl TryFrom<TimeframeRepr> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: TimeframeRepr) -> Result<Self, Self::Error> {
        match value {
            TimeframeRepr::Days(days) => Ok(Timeframe::TrailingDays(days)),
            TimeframeRepr::Text(text) => text.parse(),
        }
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(Timeframe::All);
        }
        trimmed
            .parse::<u32>()
            .map(Timeframe::TrailingDays)
            .map_err(|_| TimeframeError(s.to_string()))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::All => f.write_str("all"),
            Timeframe::TrailingDays(days) => write!(f, "{days}"),
        }
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.to_string()
    }
}

impl Timeframe {
    /// Inclusive lower bound of the window. Day boundaries are UTC midnight.
    pub fn window_start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Timeframe::All => DateTime::<Utc>::UNIX_EPOCH,
            Timeframe::TrailingDays(days) => now
                .checked_sub_signed(Duration::days(i64::from(days)))
                .map(|start| start.date_naive().and_time(NaiveTime::MIN).and_utc())
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
                .max(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

/// Process-lifetime bookkeeping for the sheet importer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub last_sync: Option<DateTime<Utc>>,
    pub last_sync_leads_imported: usize,
    pub total_imported: usize,
    pub is_running: bool,
    pub last_error: Option<String>,
}

/// Operator-facing status document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Utc>>,
    pub last_sync_leads_imported: usize,
    pub total_imported: usize,
    pub is_running: bool,
    pub last_error: Option<String>,
    pub sync_enabled: bool,
    pub sheet_configured: bool,
}

impl SyncStatus {
    pub fn from_state(state: SyncState, sync_enabled: bool, sheet_configured: bool) -> Self {
        Self {
            last_sync: state.last_sync,
            last_sync_leads_imported: state.last_sync_leads_imported,
            total_imported: state.total_imported,
            is_running: state.is_running,
            last_error: state.last_error,
            sync_enabled,
            sheet_configured,
        }
    }
}
