//! Postgres-backed implementation of the lead and settings stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadsync_core::{
    AssignmentRule, DistributionType, ExistingContact, NewLead, SheetMapping, UnassignedLead,
    WorkflowSettings, WorkflowSettingsInput,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::{LeadStore, SettingsStore, StoreError};

const SETTINGS_COLUMNS: &str =
    "id, auto_assign_enabled, distribution_type, rules, sheet_mappings, round_robin_index, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn contact_from_row(row: &PgRow) -> Result<ExistingContact, StoreError> {
    Ok(ExistingContact {
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
    })
}

fn settings_from_row(row: &PgRow) -> Result<WorkflowSettings, StoreError> {
    let distribution_type: String = row.try_get("distribution_type")?;
    let rules: Json<Vec<AssignmentRule>> = row.try_get("rules")?;
    let sheet_mappings: Json<Vec<SheetMapping>> = row.try_get("sheet_mappings")?;
    Ok(WorkflowSettings {
        id: row.try_get("id")?,
        auto_assign_enabled: row.try_get("auto_assign_enabled")?,
        distribution_type: DistributionType::from(distribution_type),
        rules: rules.0,
        sheet_mappings: sheet_mappings.0,
        round_robin_index: row.try_get("round_robin_index")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn count_to_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or_default()
}

#[async_trait]
impl LeadStore for PgStore {
    async fn find_contacts_by_email(
        &self,
        emails: &[String],
    ) -> Result<Vec<ExistingContact>, StoreError> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }
        let lowered: Vec<String> = emails.iter().map(|e| e.to_lowercase()).collect();
        let rows = sqlx::query("SELECT email, phone FROM leads WHERE lower(email) = ANY($1)")
            .bind(&lowered)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(contact_from_row).collect()
    }

    async fn find_contacts_by_phone(
        &self,
        phones: &[String],
    ) -> Result<Vec<ExistingContact>, StoreError> {
        if phones.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT email, phone FROM leads WHERE phone = ANY($1)")
            .bind(phones)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(contact_from_row).collect()
    }

    async fn insert_leads(&self, leads: &[NewLead]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        for lead in leads {
            sqlx::query(
                r#"
                INSERT INTO leads
                    (id, first_name, last_name, email, phone, notes, status,
                     source, source_url, assigned_to, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, COALESCE($11, now()))
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&lead.first_name)
            .bind(&lead.last_name)
            .bind(&lead.email)
            .bind(&lead.phone)
            .bind(&lead.notes)
            .bind(lead.status.as_str())
            .bind(&lead.source)
            .bind(&lead.source_url)
            .bind(&lead.assigned_to)
            .bind(lead.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(rows = leads.len(), "inserted leads");
        Ok(leads.len())
    }

    async fn unassigned_leads_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<UnassignedLead>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, source FROM leads WHERE assigned_to IS NULL AND created_at >= $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(UnassignedLead {
                    id: row.try_get("id")?,
                    source: row.try_get("source")?,
                })
            })
            .collect()
    }

    async fn assign_lead(&self, id: Uuid, employee_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE leads SET assigned_to = $2 WHERE id = $1")
            .bind(id)
            .bind(employee_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_assignments_since(
        &self,
        since: DateTime<Utc>,
        employee_id: Option<&str>,
    ) -> Result<u64, StoreError> {
        let result = match employee_id {
            Some(employee_id) => {
                sqlx::query(
                    "UPDATE leads SET assigned_to = NULL WHERE created_at >= $1 AND assigned_to = $2",
                )
                .bind(since)
                .bind(employee_id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE leads SET assigned_to = NULL WHERE created_at >= $1 AND assigned_to IS NOT NULL",
                )
                .bind(since)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn count_unassigned_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM leads WHERE assigned_to IS NULL AND created_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count_to_u64(count))
    }

    async fn count_assigned_since(
        &self,
        since: DateTime<Utc>,
        employee_id: Option<&str>,
    ) -> Result<u64, StoreError> {
        let count: i64 = match employee_id {
            Some(employee_id) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM leads WHERE created_at >= $1 AND assigned_to = $2",
                )
                .bind(since)
                .bind(employee_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM leads WHERE created_at >= $1 AND assigned_to IS NOT NULL",
                )
                .bind(since)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(count_to_u64(count))
    }

    async fn purge_sheet_leads_except(&self, current_url: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM leads
             WHERE source LIKE 'Google Sheet%'
               AND (source_url IS NULL OR source_url <> $1)
            "#,
        )
        .bind(current_url)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn lead_sources(&self) -> Result<Vec<String>, StoreError> {
        let sources: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT source FROM leads WHERE source IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;
        Ok(sources)
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn load_settings(&self) -> Result<Option<WorkflowSettings>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SETTINGS_COLUMNS} FROM workflow_settings ORDER BY updated_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(settings_from_row).transpose()
    }

    async fn save_settings(
        &self,
        input: WorkflowSettingsInput,
    ) -> Result<WorkflowSettings, StoreError> {
        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM workflow_settings ORDER BY updated_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let row = match existing {
            Some(id) => {
                sqlx::query(&format!(
                    r#"
                    UPDATE workflow_settings
                       SET auto_assign_enabled = $2,
                           distribution_type = $3,
                           rules = $4,
                           sheet_mappings = $5,
                           updated_at = now()
                     WHERE id = $1
                 RETURNING {SETTINGS_COLUMNS}
                    "#
                ))
                .bind(id)
                .bind(input.auto_assign_enabled)
                .bind(input.distribution_type.as_str())
                .bind(Json(&input.rules))
                .bind(Json(&input.sheet_mappings))
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    r#"
                    INSERT INTO workflow_settings
                        (id, auto_assign_enabled, distribution_type, rules, sheet_mappings,
                         round_robin_index, updated_at)
                    VALUES ($1, $2, $3, $4, $5, 0, now())
                 RETURNING {SETTINGS_COLUMNS}
                    "#
                ))
                .bind(Uuid::new_v4())
                .bind(input.auto_assign_enabled)
                .bind(input.distribution_type.as_str())
                .bind(Json(&input.rules))
                .bind(Json(&input.sheet_mappings))
                .fetch_one(&self.pool)
                .await?
            }
        };
        settings_from_row(&row)
    }

    async fn set_round_robin_index(&self, id: Uuid, index: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE workflow_settings SET round_robin_index = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(index)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
