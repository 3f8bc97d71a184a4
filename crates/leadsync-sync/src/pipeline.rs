use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use leadsync_adapters::{is_valid_lead, map_row, AdapterContext, SheetSource};
use leadsync_core::{NewLead, NormalizedLead, SyncStatus};
use leadsync_storage::LeadStore;
use tokio::task::{JoinError, JoinHandle};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::{AssignmentEngine, DedupEngine, SyncConfig, SyncStateStore};

/// How a single `run_sync` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    AlreadyRunning,
    NotConfigured,
    /// No row survived validation. Bookkeeping is left untouched.
    NoCandidates,
    /// Every candidate was already stored. Counts as a successful run.
    NothingNew,
    Imported(usize),
    Failed(String),
}

/// Sheet-to-store importer with run bookkeeping.
#[derive(Clone)]
pub struct SyncService {
    config: SyncConfig,
    source: Arc<dyn SheetSource>,
    leads: Arc<dyn LeadStore>,
    dedup: Arc<DedupEngine>,
    assigner: Arc<AssignmentEngine>,
    state: Arc<dyn SyncStateStore>,
}

impl SyncService {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn SheetSource>,
        leads: Arc<dyn LeadStore>,
        assigner: Arc<AssignmentEngine>,
        state: Arc<dyn SyncStateStore>,
    ) -> Self {
        let dedup = Arc::new(DedupEngine::new(leads.clone()));
        Self {
            config,
            source,
            leads,
            dedup,
            assigner,
            state,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus::from_state(
            self.state.snapshot().await,
            self.config.scheduler_enabled,
            self.config.sheet_url.is_some(),
        )
    }

    /// Runs one import to completion. Failures land in `last_error`, never in the caller.
    pub async fn run_sync(&self) -> SyncOutcome {
        let ctx = AdapterContext::new();
        let span = info_span!("sheet_sync", run_id = %ctx.run_id);
        self.run_guarded(ctx).instrument(span).await
    }

    /// Starts a run in the background and returns without waiting for it.
    pub fn trigger(&self) -> JoinHandle<SyncOutcome> {
        let service = self.clone();
        tokio::spawn(async move { service.run_sync().await })
    }

    /// Registers the repeating sync job and kicks off one immediate run.
    ///
    /// Returns `None` when scheduling is disabled. The caller owns the scheduler handle.
    pub async fn start_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let service = self.clone();
        let job = Job::new_repeated_async(self.config.sync_interval, move |_uuid, _l| {
            let service = service.clone();
            Box::pin(async move {
                service.run_sync().await;
            })
        })
        .context("creating sheet sync job")?;
        sched.add(job).await.context("adding scheduler job")?;
        sched.start().await.context("starting scheduler")?;
        info!(
            interval_secs = self.config.sync_interval.as_secs(),
            "sheet sync scheduler started"
        );

        let _ = self.trigger();
        Ok(Some(sched))
    }

    async fn run_guarded(&self, ctx: AdapterContext) -> SyncOutcome {
        if !self.state.try_begin().await {
            info!("sheet sync already running, skipping");
            return SyncOutcome::AlreadyRunning;
        }

        let outcome = match self.config.sheet_url.clone() {
            None => {
                warn!("GOOGLE_SHEET_CSV_URL not configured, skipping sheet sync");
                SyncOutcome::NotConfigured
            }
            Some(sheet_url) => {
                // a panicking body surfaces as a JoinError and still reaches `finish`
                let service = self.clone();
                let body = tokio::spawn(
                    async move { service.import(&ctx, &sheet_url).await }
                        .instrument(Span::current()),
                );
                let result = match body.await {
                    Ok(result) => result,
                    Err(join_err) => {
                        Err(anyhow!("sync run aborted: {}", panic_message(join_err)))
                    }
                };
                match result {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        let message = format!("{err:#}");
                        error!(error = %message, "sheet sync failed");
                        self.state.record_failure(message.clone()).await;
                        SyncOutcome::Failed(message)
                    }
                }
            }
        };

        self.state.finish().await;
        outcome
    }

    async fn import(&self, ctx: &AdapterContext, sheet_url: &str) -> Result<SyncOutcome> {
        let rows = self
            .source
            .fetch_all_rows(ctx, sheet_url)
            .await
            .context("fetching spreadsheet")?;

        let candidates: Vec<NormalizedLead> =
            rows.iter().filter(|row| is_valid_lead(row)).map(map_row).collect();
        info!(rows = rows.len(), candidates = candidates.len(), "validated sheet rows");
        if candidates.is_empty() {
            info!("no valid leads in spreadsheet");
            return Ok(SyncOutcome::NoCandidates);
        }

        let fresh = self
            .dedup
            .new_leads(candidates)
            .await
            .context("looking up existing leads")?;
        if fresh.is_empty() {
            info!("no new leads to import");
            self.state.record_success(0, Utc::now()).await;
            return Ok(SyncOutcome::NothingNew);
        }

        let mut records = Vec::with_capacity(fresh.len());
        for lead in fresh {
            let source = lead.source_tag();
            let assigned_to = match self.assigner.pick_employee(&source).await {
                Ok(assigned_to) => assigned_to,
                Err(err) => {
                    warn!(%source, error = %err, "assignment failed, importing lead unassigned");
                    None
                }
            };
            records.push(NewLead::from_normalized(lead, sheet_url, assigned_to));
        }

        let imported = self
            .leads
            .insert_leads(&records)
            .await
            .context("inserting new leads")?;
        self.state.record_success(imported, Utc::now()).await;
        info!(imported, "imported new leads from spreadsheet");
        Ok(SyncOutcome::Imported(imported))
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}
