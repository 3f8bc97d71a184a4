use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use leadsync_core::{campaign_from_source_tag, Timeframe, WorkflowSettings, WorkflowSettingsInput};
use leadsync_storage::{LeadStore, SettingsStore, StoreError};
use thiserror::Error;
use tracing::{info, warn};

use crate::AssignmentEngine;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("GOOGLE_SHEET_CSV_URL not configured")]
    SheetNotConfigured,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Employee filter where `"all"` or blank means any worker.
fn employee_filter(employee_id: Option<&str>) -> Option<&str> {
    employee_id
        .map(str::trim)
        .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case("all"))
}

/// Operator-triggered reconciliation over stored leads and the settings singleton.
///
/// Unlike the importer, failures here go back to the caller.
#[derive(Clone)]
pub struct WorkflowService {
    leads: Arc<dyn LeadStore>,
    settings: Arc<dyn SettingsStore>,
    assigner: Arc<AssignmentEngine>,
    sheet_url: Option<String>,
}

impl WorkflowService {
    pub fn new(
        leads: Arc<dyn LeadStore>,
        settings: Arc<dyn SettingsStore>,
        assigner: Arc<AssignmentEngine>,
        sheet_url: Option<String>,
    ) -> Self {
        Self {
            leads,
            settings,
            assigner,
            sheet_url,
        }
    }

    pub async fn get_settings(&self) -> Result<Option<WorkflowSettings>, WorkflowError> {
        Ok(self.settings.load_settings().await?)
    }

    pub async fn save_settings(
        &self,
        input: WorkflowSettingsInput,
    ) -> Result<WorkflowSettings, WorkflowError> {
        let saved = self.settings.save_settings(input).await?;
        info!(
            distribution = saved.distribution_type.as_str(),
            rules = saved.rules.len(),
            enabled = saved.auto_assign_enabled,
            "saved workflow settings"
        );
        Ok(saved)
    }

    /// Assigns every unassigned lead in the window. Returns how many were updated.
    pub async fn bulk_assign(&self, timeframe: Timeframe) -> Result<u64, WorkflowError> {
        let enabled = self
            .settings
            .load_settings()
            .await?
            .is_some_and(|s| s.auto_assign_enabled);
        if !enabled {
            info!("auto-assign disabled, bulk assign skipped");
            return Ok(0);
        }

        let since = timeframe.window_start(Utc::now());
        let pending = self.leads.unassigned_leads_since(since).await?;
        let mut updated = 0u64;
        for lead in &pending {
            let source = lead.source.as_deref().unwrap_or_default();
            let employee_id = match self.assigner.pick_employee(source).await {
                Ok(Some(employee_id)) => employee_id,
                Ok(None) => continue,
                Err(err) => {
                    warn!(lead_id = %lead.id, error = %err, "worker selection failed");
                    continue;
                }
            };
            match self.leads.assign_lead(lead.id, &employee_id).await {
                Ok(()) => updated += 1,
                Err(err) => warn!(lead_id = %lead.id, error = %err, "failed to assign lead"),
            }
        }
        info!(%timeframe, candidates = pending.len(), updated, "bulk assign finished");
        Ok(updated)
    }

    pub async fn revoke(
        &self,
        timeframe: Timeframe,
        employee_id: Option<&str>,
    ) -> Result<u64, WorkflowError> {
        let since = timeframe.window_start(Utc::now());
        let employee_id = employee_filter(employee_id);
        let revoked = self
            .leads
            .revoke_assignments_since(since, employee_id)
            .await?;
        info!(%timeframe, employee_id = employee_id.unwrap_or("all"), revoked, "revoked assignments");
        Ok(revoked)
    }

    pub async fn unassigned_count(&self, timeframe: Timeframe) -> Result<u64, WorkflowError> {
        let since = timeframe.window_start(Utc::now());
        Ok(self.leads.count_unassigned_since(since).await?)
    }

    pub async fn assigned_count(
        &self,
        timeframe: Timeframe,
        employee_id: Option<&str>,
    ) -> Result<u64, WorkflowError> {
        let since = timeframe.window_start(Utc::now());
        Ok(self
            .leads
            .count_assigned_since(since, employee_filter(employee_id))
            .await?)
    }

    /// Deletes sheet leads imported from any URL other than the configured one.
    pub async fn purge_old_leads(&self) -> Result<u64, WorkflowError> {
        let current = self
            .sheet_url
            .as_deref()
            .ok_or(WorkflowError::SheetNotConfigured)?;
        let deleted = self.leads.purge_sheet_leads_except(current).await?;
        info!(deleted, "purged leads from previous spreadsheets");
        Ok(deleted)
    }

    /// Distinct campaign names seen in stored sheet sources, sorted.
    pub async fn discovered_sheets(&self) -> Result<Vec<String>, WorkflowError> {
        let sources = self.leads.lead_sources().await?;
        let campaigns: BTreeSet<String> = sources
            .iter()
            .filter_map(|source| campaign_from_source_tag(source))
            .map(str::to_string)
            .collect();
        Ok(campaigns.into_iter().collect())
    }
}
