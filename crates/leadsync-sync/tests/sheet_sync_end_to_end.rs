use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Query;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use leadsync_core::{LeadStatus, NewLead};
use leadsync_storage::MemoryStore;
use leadsync_sync::{Services, SyncConfig, SyncOutcome};
use tokio::net::TcpListener;

const INDEX_HTML: &str = r#"<html><body>
<a href="pubhtml?gid=0&single=true">Facebook</a>
<a href="pubhtml?gid=98765&single=true">Archive</a>
</body></html>"#;

const TAB_A_CSV: &str = "id,created_time,full_name,email,phone_number,campaign_name,city\n\
l:1,2026-03-02T10:15:00+0530,Asha Rao,asha@example.com,p:+919876543210,GJ Ads,Pune\n\
l:2,2026-03-02T11:00:00+0530,Ravi Kumar,RAVI@example.com,p:+919123456780,GJ Ads,Surat\n\
l:3,2026-03-03T09:30:00+0530,Meera Shah,,p:+919988776655,GJ Ads,\n\
,,march_2026,,,,\n";

async fn published_sheet(Query(params): Query<HashMap<String, String>>) -> Response {
    match (
        params.get("output").map(String::as_str),
        params.get("gid").map(String::as_str),
    ) {
        (Some("csv"), Some("0")) => ([(header::CONTENT_TYPE, "text/csv")], TAB_A_CSV).into_response(),
        (Some("csv"), _) => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            "<!DOCTYPE html><html><title>Page not found</title></html>",
        )
            .into_response(),
        _ => ([(header::CONTENT_TYPE, "text/html")], INDEX_HTML).into_response(),
    }
}

async fn spawn_stub() -> String {
    let app = Router::new().route("/d/e/KEY/pubhtml", get(published_sheet));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/d/e/KEY/pubhtml")
}

#[tokio::test]
async fn imports_new_leads_and_skips_the_broken_tab() {
    let sheet_url = spawn_stub().await;
    let store = Arc::new(MemoryStore::new());
    store
        .seed_lead(NewLead {
            first_name: "Ravi".into(),
            last_name: "K".into(),
            email: Some("ravi@example.com".into()),
            phone: None,
            notes: None,
            status: LeadStatus::Contacted,
            source: "Website".into(),
            source_url: None,
            assigned_to: Some("w7".into()),
            created_at: None,
        })
        .await;

    let config = SyncConfig {
        sheet_url: Some(sheet_url.clone()),
        ..Default::default()
    };
    let services = Services::build(&config, store.clone()).unwrap();

    assert_eq!(services.sync.run_sync().await, SyncOutcome::Imported(2));

    let status = services.sync.status().await;
    assert_eq!(status.last_sync_leads_imported, 2);
    assert_eq!(status.total_imported, 2);
    assert_eq!(status.last_error, None);
    assert!(status.last_sync.is_some());
    assert!(!status.is_running);

    let leads = store.leads().await;
    assert_eq!(leads.len(), 3);
    let asha = leads
        .iter()
        .find(|l| l.email.as_deref() == Some("asha@example.com"))
        .unwrap();
    assert_eq!(asha.first_name, "Asha");
    assert_eq!(asha.last_name, "Rao");
    assert_eq!(asha.phone.as_deref(), Some("+919876543210"));
    assert_eq!(asha.source.as_deref(), Some("Google Sheet: GJ Ads"));
    assert_eq!(asha.source_url.as_deref(), Some(sheet_url.as_str()));
    assert!(asha.notes.as_deref().unwrap_or_default().contains("Pune"));

    let meera = leads
        .iter()
        .find(|l| l.first_name == "Meera")
        .unwrap();
    assert_eq!(meera.email, None);

    assert_eq!(
        services.workflow.discovered_sheets().await.unwrap(),
        vec!["GJ Ads".to_string()]
    );

    assert_eq!(services.sync.run_sync().await, SyncOutcome::NothingNew);
    assert_eq!(services.sync.status().await.total_imported, 2);
}
