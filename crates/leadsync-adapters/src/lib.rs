//! Spreadsheet source adapter: tab discovery, CSV retrieval and row normalization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod google;
mod mapper;
mod validate;

pub use google::{
    discover_gids, parse_csv_rows, published_base_url, tab_csv_url, GoogleSheetSource, TabSkip,
};
pub use mapper::{map_row, parse_created_time};
pub use validate::{has_valid_contact, is_junk_name, is_valid_lead};

pub const CRATE_NAME: &str = "leadsync-adapters";

/// Column names the lead-ad export uses for the fields we map.
pub mod columns {
    pub const FULL_NAME: &str = "full_name";
    pub const PHONE_NUMBER: &str = "phone_number";
    pub const MANUAL_CONTACT: &str = "please_enter_your_contact_no_";
    pub const EMAIL: &str = "email";
    pub const CREATED_TIME: &str = "created_time";
    pub const CAMPAIGN_NAME: &str = "campaign_name";
}

/// Per-run context threaded through fetches for log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            fetched_at: Utc::now(),
        }
    }
}

impl Default for AdapterContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One spreadsheet data row: header label to trimmed cell value, in column order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SheetRow {
    cells: Vec<(String, String)>,
}

impl SheetRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repeated header keeps its first position and takes the latest value.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(c, _)| *c == column) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    /// First of `columns` holding a non-empty value.
    pub fn first_present(&self, columns: &[&str]) -> Option<&str> {
        columns
            .iter()
            .filter_map(|c| self.get(c))
            .find(|v| !v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SheetRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = SheetRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("failed to fetch spreadsheet page: {0}")]
    IndexPage(#[from] leadsync_storage::FetchError),
}

/// A published spreadsheet that can be flattened into rows.
#[async_trait]
pub trait SheetSource: Send + Sync {
    /// Rows from every reachable tab, concatenated in tab order.
    ///
    /// Only the index page is fatal; unreadable tabs are skipped.
    async fn fetch_all_rows(
        &self,
        ctx: &AdapterContext,
        base_url: &str,
    ) -> Result<Vec<SheetRow>, SheetError>;
}
