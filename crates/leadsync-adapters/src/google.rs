use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use leadsync_storage::{FetchedResponse, HttpFetcher};
use regex::Regex;
use tracing::{info, warn};

use crate::{AdapterContext, SheetError, SheetRow, SheetSource};

/// Tab of a published document that has no discoverable identifiers.
const DEFAULT_GID: &str = "0";

fn gid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"gid=(\d+)").expect("static gid pattern compiles"))
}

/// Canonical published-document URL: everything before the query string.
pub fn published_base_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

pub fn tab_csv_url(base_url: &str, gid: &str) -> String {
    format!("{base_url}?output=csv&gid={gid}")
}

/// Every `gid=<digits>` in the page, deduplicated in order of first appearance.
pub fn discover_gids(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    gid_pattern()
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|gid| seen.insert(gid.clone()))
        .collect()
}

/// Header-keyed rows with trimmed cells. Blank lines are skipped.
pub fn parse_csv_rows(text: &str) -> Result<Vec<SheetRow>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) && record.len() <= 1 {
            continue;
        }
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.as_str(), v))
            .collect::<SheetRow>();
        rows.push(row);
    }
    Ok(rows)
}

/// Why a tab contributed no rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabSkip {
    Fetch(String),
    HtmlContentType,
    HtmlBody,
    Csv(String),
}

impl fmt::Display for TabSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabSkip::Fetch(err) => write!(f, "fetch failed: {err}"),
            TabSkip::HtmlContentType => f.write_str("not a published CSV sheet"),
            TabSkip::HtmlBody => f.write_str("received HTML response"),
            TabSkip::Csv(err) => write!(f, "unparseable CSV: {err}"),
        }
    }
}

/// Unpublished tabs come back as HTML error pages instead of CSV.
pub(crate) fn tab_rows_from_response(resp: &FetchedResponse) -> Result<Vec<SheetRow>, TabSkip> {
    if resp.is_html() {
        return Err(TabSkip::HtmlContentType);
    }
    let text = resp.text();
    if text.trim_start().starts_with("<!") {
        return Err(TabSkip::HtmlBody);
    }
    parse_csv_rows(&text).map_err(|e| TabSkip::Csv(e.to_string()))
}

/// Published Google spreadsheet read tab by tab through its CSV export.
#[derive(Debug, Clone)]
pub struct GoogleSheetSource {
    http: Arc<HttpFetcher>,
}

impl GoogleSheetSource {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self { http }
    }

    async fn fetch_tab(&self, ctx: &AdapterContext, url: &str) -> Result<Vec<SheetRow>, TabSkip> {
        let resp = self
            .http
            .fetch(ctx.run_id, url)
            .await
            .map_err(|e| TabSkip::Fetch(e.to_string()))?;
        tab_rows_from_response(&resp)
    }
}

#[async_trait]
impl SheetSource for GoogleSheetSource {
    async fn fetch_all_rows(
        &self,
        ctx: &AdapterContext,
        base_url: &str,
    ) -> Result<Vec<SheetRow>, SheetError> {
        let base = published_base_url(base_url);
        let index = self.http.fetch(ctx.run_id, base).await?;

        let mut gids = discover_gids(&index.text());
        if gids.is_empty() {
            info!(run_id = %ctx.run_id, "no sheet tabs discovered, falling back to gid={DEFAULT_GID}");
            gids.push(DEFAULT_GID.to_string());
        }
        info!(run_id = %ctx.run_id, tabs = gids.len(), gids = ?gids, "discovered sheet tabs");

        let mut rows = Vec::new();
        for gid in &gids {
            match self.fetch_tab(ctx, &tab_csv_url(base, gid)).await {
                Ok(tab_rows) => {
                    info!(run_id = %ctx.run_id, gid = %gid, rows = tab_rows.len(), "fetched sheet tab");
                    rows.extend(tab_rows);
                }
                Err(reason) => {
                    warn!(run_id = %ctx.run_id, gid = %gid, %reason, "skipping sheet tab");
                }
            }
        }
        Ok(rows)
    }
}
