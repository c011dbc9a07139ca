// ABOUTME: BigQuery REST client for dataset checks and load jobs
// ABOUTME: Submits load jobs and watches them from a background task

use super::auth::Credentials;
use super::{DestinationWarehouse, LoadHandle, LoadSpec};
use crate::utils;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Thin client over the BigQuery v2 REST API
#[derive(Clone)]
pub struct BigQueryClient {
    http: reqwest::Client,
    endpoint: String,
    credentials: Arc<Credentials>,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    error_result: Option<ErrorProto>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{}: {}", reason, message),
            (None, Some(message)) => message.clone(),
            (Some(reason), None) => reason.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

/// Number of per-row errors quoted in a failed job's message
const MAX_REPORTED_ERRORS: usize = 5;

impl BigQueryClient {
    /// Client using ambient Google credentials
    pub async fn new() -> Result<Self> {
        let credentials = Credentials::ambient();
        credentials
            .token()
            .await
            .context("Failed to obtain Google credentials for BigQuery")?;
        Ok(Self::with_credentials(credentials))
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self::with_credentials(Credentials::fixed(token))
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            credentials: Arc::new(credentials),
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// How often a submitted job's status is checked
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Send a request, retrying once with a fresh token if BigQuery answers 401
    async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let token = self.credentials.token().await?;
        let response = build(&self.http).bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!("BigQuery rejected the access token; refreshing it");
        let token = self
            .credentials
            .refresh(&token)
            .await
            .context("Failed to refresh Google credentials")?;
        Ok(build(&self.http).bearer_auth(&token).send().await?)
    }

    async fn get_job(&self, project_id: &str, job_id: &str, location: Option<&str>) -> Result<Job> {
        let url = format!("{}/projects/{}/jobs/{}", self.endpoint, project_id, job_id);
        let response = self
            .send(|http| {
                let request = http.get(&url);
                match location {
                    Some(location) => request.query(&[("location", location)]),
                    None => request,
                }
            })
            .await
            .with_context(|| format!("Failed to fetch status of job {}", job_id))?;
        if !response.status().is_success() {
            return Err(api_error(response).await)
                .with_context(|| format!("Failed to fetch status of job {}", job_id));
        }

        response
            .json::<Job>()
            .await
            .context("Failed to parse job status response")
    }

    /// Poll until the job is DONE; a job-level error becomes `Err`
    async fn wait_for_job(
        &self,
        project_id: &str,
        job_id: &str,
        location: Option<&str>,
    ) -> Result<()> {
        loop {
            let job = utils::retry_with_backoff(
                || self.get_job(project_id, job_id, location),
                3,
                Duration::from_secs(1),
            )
            .await?;

            if job.status.state == "DONE" {
                return job_outcome(job_id, &job.status);
            }

            tracing::debug!("Load job {} is {}", job_id, job.status.state);
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn job_outcome(job_id: &str, status: &JobStatus) -> Result<()> {
    let Some(error) = &status.error_result else {
        return Ok(());
    };

    let mut message = format!("load job {} failed: {}", job_id, error.describe());
    let details: Vec<String> = status
        .errors
        .iter()
        .take(MAX_REPORTED_ERRORS)
        .map(ErrorProto::describe)
        .collect();
    if !details.is_empty() {
        message.push_str("\n  - ");
        message.push_str(&details.join("\n  - "));
    }
    bail!(message)
}

/// Turn a non-2xx response into an error carrying BigQuery's message
async fn api_error(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);
    anyhow::anyhow!("BigQuery API returned {}: {}", status, message)
}

/// Client-side id for a load job into `table_id`
fn new_job_id(table_id: &str) -> String {
    let table: String = table_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(64)
        .collect();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("bqshift_{}_{}", table, suffix)
}

/// JSON body for `jobs.insert` describing a load from Cloud Storage
pub fn load_job_request(job_id: &str, spec: &LoadSpec) -> Value {
    let fields: Vec<Value> = spec
        .schema
        .columns()
        .iter()
        .map(|column| {
            json!({
                "name": column.name,
                "type": column.data_type.as_str(),
                "mode": if column.nullable { "NULLABLE" } else { "REQUIRED" },
            })
        })
        .collect();

    let write_disposition = if spec.overwrite {
        "WRITE_TRUNCATE"
    } else {
        "WRITE_APPEND"
    };

    json!({
        "jobReference": {
            "projectId": spec.table.project_id,
            "jobId": job_id,
        },
        "configuration": {
            "load": {
                "sourceUris": [spec.staged.source_uri()],
                "sourceFormat": "CSV",
                "fieldDelimiter": spec.staged.format.delimiter.to_string(),
                "nullMarker": spec.staged.format.null_marker,
                "allowQuotedNewlines": true,
                "destinationTable": {
                    "projectId": spec.table.project_id,
                    "datasetId": spec.table.dataset_id,
                    "tableId": spec.table.table_id,
                },
                "schema": { "fields": fields },
                "writeDisposition": write_disposition,
                "createDisposition": "CREATE_IF_NEEDED",
            }
        }
    })
}

#[async_trait]
impl DestinationWarehouse for BigQueryClient {
    async fn dataset_exists(&self, project_id: &str, dataset: &str) -> Result<bool> {
        let url = format!("{}/projects/{}/datasets/{}", self.endpoint, project_id, dataset);
        let response = self
            .send(|http| http.get(&url))
            .await
            .with_context(|| format!("Failed to look up dataset {}:{}", project_id, dataset))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(api_error(response).await),
        }
    }

    async fn load_table(&self, spec: LoadSpec) -> Result<LoadHandle> {
        let job_id = new_job_id(&spec.table.table_id);
        let body = load_job_request(&job_id, &spec);
        let url = format!("{}/projects/{}/jobs", self.endpoint, spec.table.project_id);

        tracing::info!("Submitting load job {} into {}", job_id, spec.table);
        let response = self
            .send(|http| http.post(&url).json(&body))
            .await
            .context("Failed to submit load job")?;
        if !response.status().is_success() {
            return Err(api_error(response).await).context("BigQuery rejected the load job");
        }

        let job: Job = response
            .json()
            .await
            .context("Failed to parse load job response")?;
        let reference = job.job_reference;
        tracing::debug!("Load job {} accepted", reference.job_id);

        let (mut completion, handle) = LoadHandle::channel(reference.job_id.clone());
        let client = self.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = completion.abandoned() => None,
                result = client.wait_for_job(
                    &reference.project_id,
                    &reference.job_id,
                    reference.location.as_deref(),
                ) => Some(result),
            };

            match outcome {
                Some(result) => completion.complete(result),
                None => tracing::debug!(
                    "Stopped watching load job {}; nobody is waiting for it",
                    reference.job_id
                ),
            }
        });

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bigquery::auth::TokenSource;
    use crate::bigquery::TableReference;
    use crate::redshift::UnloadFormat;
    use crate::schema::{SchemaTranslator, SourceColumn, SourceSchema};
    use crate::storage::StagedLocation;
    use wiremock::matchers::{body_partial_json, header, method, path, path_regex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out `token-1`, `token-2`, ... one per fetch
    #[derive(Default)]
    struct NumberedTokens(AtomicUsize);

    #[async_trait]
    impl TokenSource for NumberedTokens {
        async fn fetch(&self) -> Result<String> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{}", n))
        }
    }

    fn load_spec(overwrite: bool) -> LoadSpec {
        let source = SourceSchema::new(vec![
            SourceColumn::new("id", "integer", false),
            SourceColumn::new("name", "varchar(64)", true),
        ]);
        LoadSpec {
            table: TableReference::new("acme", "analytics", "users"),
            staged: StagedLocation {
                bucket: "acme-bqshift".to_string(),
                prefix: "bqshift/public.users/1-abc/part_".to_string(),
                objects: 1,
                bytes: 10,
                format: UnloadFormat::default(),
            },
            overwrite,
            schema: SchemaTranslator::default().translate(&source).unwrap(),
        }
    }

    fn client(server: &MockServer) -> BigQueryClient {
        BigQueryClient::with_token("test-token")
            .with_endpoint(server.uri())
            .with_poll_interval(Duration::from_millis(10))
    }

    fn job_body(state: &str, error: Option<Value>) -> Value {
        let mut status = json!({ "state": state });
        if let Some(error) = error {
            status["errorResult"] = error.clone();
            status["errors"] = json!([error]);
        }
        json!({
            "jobReference": { "projectId": "acme", "jobId": "bqshift_users_x", "location": "EU" },
            "status": status,
        })
    }

    #[test]
    fn test_load_job_request_overwrite_and_schema() {
        let body = load_job_request("job-1", &load_spec(true));
        let load = &body["configuration"]["load"];

        assert_eq!(load["writeDisposition"], "WRITE_TRUNCATE");
        assert_eq!(
            load["sourceUris"][0],
            "gs://acme-bqshift/bqshift/public.users/1-abc/part_*"
        );
        assert_eq!(load["fieldDelimiter"], ",");
        assert_eq!(load["destinationTable"]["tableId"], "users");
        assert_eq!(
            load["schema"]["fields"],
            json!([
                { "name": "id", "type": "INT64", "mode": "REQUIRED" },
                { "name": "name", "type": "STRING", "mode": "NULLABLE" },
            ])
        );
    }

    #[test]
    fn test_load_job_request_appends_without_overwrite() {
        let body = load_job_request("job-1", &load_spec(false));
        assert_eq!(body["configuration"]["load"]["writeDisposition"], "WRITE_APPEND");
    }

    #[test]
    fn test_new_job_id_is_valid() {
        let id = new_job_id("weird.table name");
        assert!(id.starts_with("bqshift_weird_table_name_"));
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn test_job_outcome_reports_errors() {
        let status = JobStatus {
            state: "DONE".to_string(),
            error_result: Some(ErrorProto {
                reason: Some("invalid".to_string()),
                message: Some("Too many errors".to_string()),
            }),
            errors: vec![ErrorProto {
                reason: None,
                message: Some("row 3: bad int".to_string()),
            }],
        };

        let err = job_outcome("job-1", &status).unwrap_err().to_string();
        assert!(err.contains("invalid: Too many errors"));
        assert!(err.contains("row 3: bad int"));
        assert!(job_outcome("job-1", &JobStatus::default()).is_ok());
    }

    #[tokio::test]
    async fn test_dataset_exists() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/acme/datasets/analytics"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "acme:analytics"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/acme/datasets/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(
                json!({"error": {"code": 404, "message": "Not found: Dataset acme:missing"}}),
            ))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.dataset_exists("acme", "analytics").await.unwrap());
        assert!(!client.dataset_exists("acme", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_dataset_exists_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/acme/datasets/analytics"))
            .respond_with(ResponseTemplate::new(403).set_body_json(
                json!({"error": {"code": 403, "message": "Access Denied: Dataset acme:analytics"}}),
            ))
            .mount(&server)
            .await;

        let err = client(&server)
            .dataset_exists("acme", "analytics")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Access Denied"));
    }

    #[tokio::test]
    async fn test_load_table_submits_and_waits_for_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/acme/jobs"))
            .and(body_partial_json(json!({
                "configuration": { "load": { "writeDisposition": "WRITE_TRUNCATE" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("PENDING", None)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/acme/jobs/bqshift_users_x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("RUNNING", None)))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/acme/jobs/bqshift_users_x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("DONE", None)))
            .mount(&server)
            .await;

        let handle = client(&server).load_table(load_spec(true)).await.unwrap();
        assert_eq!(handle.job_id(), "bqshift_users_x");
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_load_table_failed_job_resolves_with_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/acme/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("RUNNING", None)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/projects/acme/jobs/.+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body(
                "DONE",
                Some(json!({"reason": "invalid", "message": "Error while reading data"})),
            )))
            .mount(&server)
            .await;

        let handle = client(&server).load_table(load_spec(false)).await.unwrap();
        let err = handle.wait().await.unwrap_err();
        assert!(err.to_string().contains("Error while reading data"));
    }

    #[tokio::test]
    async fn test_load_table_rejected_submission() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/acme/jobs"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"error": {"code": 400, "message": "Invalid schema"}}),
            ))
            .mount(&server)
            .await;

        let err = client(&server).load_table(load_spec(false)).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid schema"));
    }

    #[tokio::test]
    async fn test_status_poll_refreshes_expired_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/acme/jobs"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("PENDING", None)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/acme/jobs/bqshift_users_x"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(401).set_body_json(
                json!({"error": {"code": 401, "message": "Request had invalid authentication credentials"}}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/acme/jobs/bqshift_users_x"))
            .and(header("authorization", "Bearer token-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("DONE", None)))
            .mount(&server)
            .await;

        let client = BigQueryClient::with_credentials(Credentials::new(NumberedTokens::default()))
            .with_endpoint(server.uri())
            .with_poll_interval(Duration::from_millis(10));
        let handle = client.load_table(load_spec(false)).await.unwrap();
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_rejection_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/acme/datasets/analytics"))
            .respond_with(ResponseTemplate::new(401).set_body_json(
                json!({"error": {"code": 401, "message": "Request had invalid authentication credentials"}}),
            ))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server)
            .dataset_exists("acme", "analytics")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid authentication credentials"));
    }
}
