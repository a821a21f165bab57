//! Best-effort per-company upload of metrics.

use std::time::Duration;

use billing_core::groups::OrgGroups;
use billing_core::models::MetricsMap;
use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::planhat::{PlanhatClient, PlanhatCompany};

/// Knobs for one upload pass.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Pause awaited between two consecutive uploads.
    pub delay: Duration,
    /// Log what would be sent without sending it.
    pub dry_run: bool,
}

/// Outcome of an upload pass. Company names are used throughout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Uploaded companies (or, on a dry run, the ones that would have been).
    pub uploaded: Vec<String>,
    /// (company, error) for every failed upload.
    pub failed: Vec<(String, String)>,
    /// Companies without an Org ID or without usage.
    pub skipped: Vec<String>,
    pub dry_run: bool,
}

/// Upload each directory company's metrics, one call per company.
///
/// Failures are logged and recorded; they never stop the remaining uploads.
pub async fn upload_metrics(
    client: &PlanhatClient,
    companies: &[PlanhatCompany],
    metrics: &MetricsMap,
    groups: &OrgGroups,
    date: NaiveDate,
    options: &UploadOptions,
) -> UploadReport {
    let mut report = UploadReport {
        dry_run: options.dry_run,
        ..UploadReport::default()
    };
    let mut sent_any = false;

    for company in companies {
        let Some(org_id) = company.org_id.as_deref() else {
            warn!("Company '{}' does not have an Org ID. Skipping.", company.name);
            report.skipped.push(company.name.clone());
            continue;
        };

        if groups.is_grouped(org_id) {
            info!(
                "Company '{}' uses multiple Org IDs: {:?}",
                company.name,
                groups.members_of(org_id)
            );
        } else {
            info!("Company '{}' uses single Org ID: {}", company.name, org_id);
        }

        let Some(company_metrics) = metrics.get(&groups.canonical(org_id)) else {
            info!(
                "No usage recorded for company '{}' (Org ID {}). Skipping.",
                company.name, org_id
            );
            report.skipped.push(company.name.clone());
            continue;
        };

        let rounded = company_metrics.rounded();
        info!(
            company = %company.name,
            date = %date,
            cumulative_cpus = %rounded.cumulative_cpus,
            forecasted_cpus = %rounded.forecasted_cpus,
            "Calculated metrics"
        );

        if options.dry_run {
            info!("Dry run: not updating Planhat for '{}'", company.name);
            report.uploaded.push(company.name.clone());
            continue;
        }

        if sent_any && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
        sent_any = true;

        info!("Updating Planhat for Company Name: {}", company.name);
        match client.push_metrics(org_id, date, company_metrics).await {
            Ok(()) => {
                info!("Planhat updated successfully for Company Name: {}", company.name);
                report.uploaded.push(company.name.clone());
            }
            Err(e) => {
                error!("Error updating Planhat for Company Name: {}, {}", company.name, e);
                report.failed.push((company.name.clone(), e.to_string()));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use billing_core::models::CompanyMetrics;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn company(id: &str, name: &str, org: Option<&str>) -> PlanhatCompany {
        PlanhatCompany {
            id: id.to_string(),
            name: name.to_string(),
            org_id: org.map(str::to_string),
        }
    }

    fn metrics_for(ids: &[&str]) -> MetricsMap {
        ids.iter()
            .map(|id| {
                (
                    id.to_string(),
                    CompanyMetrics {
                        company_id: id.to_string(),
                        cumulative_cpus: dec!(10),
                        forecasted_cpus: dec!(31),
                    },
                )
            })
            .collect()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    async fn server_with_ok_posts(expected: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dimensiondata/tenant"))
            .respond_with(ResponseTemplate::new(200))
            .expect(expected)
            .mount(&server)
            .await;
        server
    }

    fn client(server: &MockServer) -> PlanhatClient {
        PlanhatClient::new(&server.uri(), &server.uri(), "tok", "tenant").unwrap()
    }

    #[tokio::test]
    async fn test_uploads_one_call_per_company_with_usage() {
        let server = server_with_ok_posts(2).await;
        let companies = vec![
            company("p1", "Alpha", Some("ORG-A")),
            company("p2", "Beta", Some("org-b")),
            company("p3", "Idle", Some("org-z")),
            company("p4", "NoOrg", None),
        ];

        let report = upload_metrics(
            &client(&server),
            &companies,
            &metrics_for(&["org-a", "org-b"]),
            &OrgGroups::default(),
            date(),
            &UploadOptions::default(),
        )
        .await;

        assert_eq!(report.uploaded, vec!["Alpha".to_string(), "Beta".to_string()]);
        assert_eq!(report.skipped, vec!["Idle".to_string(), "NoOrg".to_string()]);
        assert!(report.failed.is_empty());
        assert!(!report.dry_run);
    }

    #[tokio::test]
    async fn test_grouped_org_ids_share_metrics() {
        let server = server_with_ok_posts(2).await;
        let groups = OrgGroups::parse(&["org-a,org-a2".to_string()]);
        let companies = vec![
            company("p1", "Alpha", Some("org-a")),
            company("p2", "Alpha EU", Some("org-a2")),
        ];

        let report = upload_metrics(
            &client(&server),
            &companies,
            &metrics_for(&["org-a"]),
            &groups,
            date(),
            &UploadOptions::default(),
        )
        .await;
        assert_eq!(report.uploaded.len(), 2);

        let requests = server.received_requests().await.unwrap();
        let second: serde_json::Value = requests[1].body_json().unwrap();
        assert_eq!(second[0]["externalId"], "org-a2");
        assert_eq!(second[0]["value"], 10.0);
    }

    #[tokio::test]
    async fn test_failed_upload_does_not_stop_others() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"externalId\":\"org-a\""))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let companies = vec![
            company("p1", "Alpha", Some("org-a")),
            company("p2", "Beta", Some("org-b")),
        ];
        let report = upload_metrics(
            &client(&server),
            &companies,
            &metrics_for(&["org-a", "org-b"]),
            &OrgGroups::default(),
            date(),
            &UploadOptions::default(),
        )
        .await;

        assert_eq!(report.uploaded, vec!["Beta".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Alpha");
        assert!(report.failed[0].1.contains("500"));
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let server = server_with_ok_posts(0).await;
        let companies = vec![company("p1", "Alpha", Some("org-a"))];

        let report = upload_metrics(
            &client(&server),
            &companies,
            &metrics_for(&["org-a"]),
            &OrgGroups::default(),
            date(),
            &UploadOptions {
                delay: Duration::from_secs(5),
                dry_run: true,
            },
        )
        .await;

        assert!(report.dry_run);
        assert_eq!(report.uploaded, vec!["Alpha".to_string()]);
    }

    #[tokio::test]
    async fn test_delay_between_uploads() {
        let server = server_with_ok_posts(2).await;
        let companies = vec![
            company("p1", "Alpha", Some("org-a")),
            company("p2", "Beta", Some("org-b")),
        ];

        let started = std::time::Instant::now();
        upload_metrics(
            &client(&server),
            &companies,
            &metrics_for(&["org-a", "org-b"]),
            &OrgGroups::default(),
            date(),
            &UploadOptions {
                delay: Duration::from_millis(50),
                dry_run: false,
            },
        )
        .await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
