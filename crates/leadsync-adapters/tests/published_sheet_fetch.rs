use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use leadsync_adapters::{AdapterContext, GoogleSheetSource, SheetError, SheetSource};
use leadsync_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use tokio::net::TcpListener;

const INDEX_HTML: &str = r#"<!DOCTYPE html><html><body>
<ul id="sheet-menu">
  <li><a href="pubhtml?gid=0&single=true">Leads</a></li>
  <li><a href="pubhtml?gid=1111&single=true">Private</a></li>
  <li><a href="pubhtml?gid=2222&single=true">Gone</a></li>
  <li><a href="pubhtml?gid=0&single=true">Leads again</a></li>
</ul></body></html>"#;

const LEADS_CSV: &str = "full_name,email,phone_number,campaign_name\n\
Asha Rao,asha@example.com,p:9876543210,Spring\n\
Ravi Kumar,,p:9123456780,Spring\n";

async fn published_sheet(Query(params): Query<HashMap<String, String>>) -> Response {
    if params.get("output").map(String::as_str) != Some("csv") {
        return ([(header::CONTENT_TYPE, "text/html")], INDEX_HTML).into_response();
    }
    match params.get("gid").map(String::as_str) {
        Some("0") => ([(header::CONTENT_TYPE, "text/csv")], LEADS_CSV).into_response(),
        Some("1111") => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            "<!DOCTYPE html><title>Sign in</title>",
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn blank_index() -> Response {
    ([(header::CONTENT_TYPE, "text/html")], "<html>no menu</html>").into_response()
}

async fn blank_csv(Query(params): Query<HashMap<String, String>>) -> Response {
    if params.get("gid").map(String::as_str) == Some("0") {
        return ([(header::CONTENT_TYPE, "text/csv")], LEADS_CSV).into_response();
    }
    blank_index().await
}

async fn spawn_stub() -> String {
    let app = Router::new()
        .route("/sheet/pubhtml", get(published_sheet))
        .route("/single/pubhtml", get(blank_csv));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn source() -> GoogleSheetSource {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(5),
        backoff: BackoffPolicy::none(),
        ..Default::default()
    })
    .unwrap();
    GoogleSheetSource::new(Arc::new(http))
}

#[tokio::test]
async fn concatenates_reachable_tabs_and_skips_the_rest() {
    let base = spawn_stub().await;
    let url = format!("{base}/sheet/pubhtml?gid=0&single=true");

    let rows = source()
        .fetch_all_rows(&AdapterContext::new(), &url)
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("full_name"), Some("Asha Rao"));
    assert_eq!(rows[1].get("phone_number"), Some("p:9123456780"));
}

#[tokio::test]
async fn falls_back_to_first_tab_when_no_ids_are_published() {
    let base = spawn_stub().await;
    let rows = source()
        .fetch_all_rows(&AdapterContext::new(), &format!("{base}/single/pubhtml"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn unreachable_index_page_is_fatal() {
    let base = spawn_stub().await;
    let err = source()
        .fetch_all_rows(&AdapterContext::new(), &format!("{base}/missing/pubhtml"))
        .await
        .unwrap_err();
    assert!(matches!(err, SheetError::IndexPage(_)));
}
