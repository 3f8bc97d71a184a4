//! In-process store used by tests and local runs without Postgres.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadsync_core::{
    ExistingContact, Lead, NewLead, UnassignedLead, WorkflowSettings, WorkflowSettingsInput,
    SHEET_SOURCE_PREFIX,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{LeadStore, SettingsStore, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    leads: Vec<Lead>,
    settings: Vec<WorkflowSettings>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with `StoreError::Unavailable`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn leads(&self) -> Vec<Lead> {
        self.state.lock().await.leads.clone()
    }

    /// Inserts one lead directly, bypassing the write-failure switch.
    pub async fn seed_lead(&self, lead: NewLead) -> Lead {
        let mut state = self.state.lock().await;
        let lead = materialize(lead);
        state.leads.push(lead.clone());
        lead
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

fn materialize(lead: NewLead) -> Lead {
    Lead {
        id: Uuid::new_v4(),
        first_name: lead.first_name,
        last_name: lead.last_name,
        email: lead.email,
        phone: lead.phone,
        notes: lead.notes,
        status: lead.status,
        source: Some(lead.source),
        source_url: lead.source_url,
        assigned_to: lead.assigned_to,
        created_at: lead.created_at.unwrap_or_else(Utc::now),
    }
}

fn contact_of(lead: &Lead) -> ExistingContact {
    ExistingContact {
        email: lead.email.clone(),
        phone: lead.phone.clone(),
    }
}

fn held_by(lead: &Lead, employee_id: Option<&str>) -> bool {
    match (lead.assigned_to.as_deref(), employee_id) {
        (Some(holder), Some(wanted)) => holder == wanted,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn find_contacts_by_email(
        &self,
        emails: &[String],
    ) -> Result<Vec<ExistingContact>, StoreError> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: Vec<String> = emails.iter().map(|e| e.to_lowercase()).collect();
        let state = self.state.lock().await;
        Ok(state
            .leads
            .iter()
            .filter(|l| {
                l.email
                    .as_deref()
                    .is_some_and(|e| wanted.contains(&e.to_lowercase()))
            })
            .map(contact_of)
            .collect())
    }

    async fn find_contacts_by_phone(
        &self,
        phones: &[String],
    ) -> Result<Vec<ExistingContact>, StoreError> {
        if phones.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        Ok(state
            .leads
            .iter()
            .filter(|l| l.phone.as_ref().is_some_and(|p| phones.contains(p)))
            .map(contact_of)
            .collect())
    }

    async fn insert_leads(&self, leads: &[NewLead]) -> Result<usize, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        state
            .leads
            .extend(leads.iter().cloned().map(materialize));
        Ok(leads.len())
    }

    async fn unassigned_leads_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<UnassignedLead>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .leads
            .iter()
            .filter(|l| l.assigned_to.is_none() && l.created_at >= since)
            .map(|l| UnassignedLead {
                id: l.id,
                source: l.source.clone(),
            })
            .collect())
    }

    async fn assign_lead(&self, id: Uuid, employee_id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if let Some(lead) = state.leads.iter_mut().find(|l| l.id == id) {
            lead.assigned_to = Some(employee_id.to_string());
        }
        Ok(())
    }

    async fn revoke_assignments_since(
        &self,
        since: DateTime<Utc>,
        employee_id: Option<&str>,
    ) -> Result<u64, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let mut affected = 0u64;
        for lead in state
            .leads
            .iter_mut()
            .filter(|l| l.created_at >= since && held_by(l, employee_id))
        {
            lead.assigned_to = None;
            affected += 1;
        }
        Ok(affected)
    }

    async fn count_unassigned_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .leads
            .iter()
            .filter(|l| l.assigned_to.is_none() && l.created_at >= since)
            .count() as u64)
    }

    async fn count_assigned_since(
        &self,
        since: DateTime<Utc>,
        employee_id: Option<&str>,
    ) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .leads
            .iter()
            .filter(|l| l.created_at >= since && held_by(l, employee_id))
            .count() as u64)
    }

    async fn purge_sheet_leads_except(&self, current_url: &str) -> Result<u64, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let before = state.leads.len();
        state.leads.retain(|l| {
            let from_sheet = l
                .source
                .as_deref()
                .is_some_and(|s| s.starts_with(SHEET_SOURCE_PREFIX));
            let stale = l.source_url.as_deref() != Some(current_url);
            !(from_sheet && stale)
        });
        Ok((before - state.leads.len()) as u64)
    }

    async fn lead_sources(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.leads.iter().filter_map(|l| l.source.clone()).collect())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load_settings(&self) -> Result<Option<WorkflowSettings>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.settings.iter().max_by_key(|s| s.updated_at).cloned())
    }

    async fn save_settings(
        &self,
        input: WorkflowSettingsInput,
    ) -> Result<WorkflowSettings, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let latest = state
            .settings
            .iter_mut()
            .max_by_key(|s| s.updated_at);

        if let Some(existing) = latest {
            existing.auto_assign_enabled = input.auto_assign_enabled;
            existing.distribution_type = input.distribution_type;
            existing.rules = input.rules;
            existing.sheet_mappings = input.sheet_mappings;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let created = WorkflowSettings {
            id: Uuid::new_v4(),
            auto_assign_enabled: input.auto_assign_enabled,
            distribution_type: input.distribution_type,
            rules: input.rules,
            sheet_mappings: input.sheet_mappings,
            round_robin_index: 0,
            updated_at: now,
        };
        state.settings.push(created.clone());
        Ok(created)
    }

    async fn set_round_robin_index(&self, id: Uuid, index: i64) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if let Some(settings) = state.settings.iter_mut().find(|s| s.id == id) {
            settings.round_robin_index = index;
            settings.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadsync_core::LeadStatus;

    fn sheet_lead(email: &str, source_url: Option<&str>) -> NewLead {
        NewLead {
            first_name: "Asha".into(),
            last_name: String::new(),
            email: Some(email.into()),
            phone: None,
            notes: None,
            status: LeadStatus::New,
            source: "Google Sheet: Spring".into(),
            source_url: source_url.map(str::to_string),
            assigned_to: None,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn email_lookup_ignores_case() {
        let store = MemoryStore::new();
        store.seed_lead(sheet_lead("Asha@Example.com", None)).await;

        let hits = store
            .find_contacts_by_email(&["asha@example.com".to_string()])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.find_contacts_by_email(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_settings_updates_the_single_row() {
        let store = MemoryStore::new();
        let first = store
            .save_settings(WorkflowSettingsInput::default())
            .await
            .unwrap();
        store.set_round_robin_index(first.id, 4).await.unwrap();

        let second = store
            .save_settings(WorkflowSettingsInput {
                auto_assign_enabled: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.round_robin_index, 4);
        assert!(second.auto_assign_enabled);
    }

    #[tokio::test]
    async fn failing_writes_surface_as_unavailable() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let err = store
            .insert_leads(&[sheet_lead("a@b.co", None)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.leads().await.is_empty());
    }
}
