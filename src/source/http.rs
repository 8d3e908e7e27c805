//! HTTP log gateway source.
//!
//! The gateway mirrors the database log API: a paginated listing of log files per
//! instance, and paginated retrieval of a single file's content in portions.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::LogSource;
use crate::config::SourceConfig;
use crate::error::{Error, Result, SourceError};
use crate::types::{ArtifactRef, InstanceId};

/// Longest response body kept in a [`SourceError::Status`]
const MAX_ERROR_BODY: usize = 512;

/// Upper bound on the buffer reserved from a listed size; listed sizes are not trusted
const MAX_PREALLOC: u64 = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct ListLogFilesResponse {
    #[serde(default)]
    log_files: Vec<LogFileDetails>,
    #[serde(default)]
    marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogFileDetails {
    log_file_name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    last_written: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LogFilePortion {
    #[serde(default)]
    log_file_data: Option<String>,
    #[serde(default)]
    marker: Option<String>,
    #[serde(default)]
    additional_data_pending: bool,
}

/// Production [`LogSource`] backed by a log gateway.
#[derive(Clone, Debug)]
pub struct HttpLogSource {
    client: reqwest::Client,
    endpoint: Url,
    region: String,
    api_token: Option<String>,
}

impl HttpLogSource {
    /// Build a source from connection settings.
    ///
    /// Fails with [`Error::Config`] when the endpoint is missing or not a URL, and with
    /// [`Error::Session`] when the HTTP client cannot be constructed.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let raw = config
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::config("endpoint", "a log gateway endpoint is required"))?;

        let mut endpoint = Url::parse(raw)
            .map_err(|e| Error::config("endpoint", format!("invalid URL {raw:?}: {e}")))?;
        // Url::join replaces the last segment unless the base ends with a slash
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Session(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            region: config.region.clone(),
            api_token: config.api_token.clone(),
        })
    }

    fn url(&self, relative: &str) -> std::result::Result<Url, SourceError> {
        self.endpoint
            .join(relative)
            .map_err(|e| SourceError::Other(format!("cannot build request URL: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        marker: Option<&str>,
        what: &str,
    ) -> std::result::Result<T, SourceError> {
        let mut request = self
            .client
            .get(url)
            .query(&[("region", self.region.as_str())]);
        if let Some(marker) = marker {
            request = request.query(&[("marker", marker)]);
        }
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Pagination markers seen during one listing or one file retrieval.
///
/// A gateway that hands back any marker it already gave is cycling and would never finish.
#[derive(Debug, Default)]
struct MarkerTrail {
    seen: HashSet<String>,
}

impl MarkerTrail {
    /// Record `next`, failing if it was already seen.
    fn advance(
        &mut self,
        next: Option<String>,
    ) -> std::result::Result<Option<String>, SourceError> {
        match next {
            Some(m) if !self.seen.insert(m.clone()) => Err(SourceError::Other(format!(
                "gateway repeated pagination marker {m:?}"
            ))),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl LogSource for HttpLogSource {
    async fn list_artifacts(
        &self,
        instance: &InstanceId,
    ) -> std::result::Result<Vec<ArtifactRef>, SourceError> {
        let url = self.url(&format!(
            "v1/instances/{}/logs",
            urlencoding::encode(instance.as_str())
        ))?;

        let mut artifacts = Vec::new();
        let mut trail = MarkerTrail::default();
        let mut marker: Option<String> = None;
        loop {
            let page: ListLogFilesResponse = self
                .get_json(url.clone(), marker.as_deref(), instance.as_str())
                .await?;
            artifacts.extend(page.log_files.into_iter().map(|f| ArtifactRef {
                name: f.log_file_name,
                size: f.size,
                last_written: f.last_written,
            }));

            marker = trail.advance(page.marker)?;
            if marker.is_none() {
                break;
            }
        }

        tracing::debug!(instance = %instance, count = artifacts.len(), "Listed log files");
        Ok(artifacts)
    }

    async fn fetch_artifact(
        &self,
        instance: &InstanceId,
        artifact: &ArtifactRef,
    ) -> std::result::Result<Vec<u8>, SourceError> {
        let url = self.url(&format!(
            "v1/instances/{}/logs/{}",
            urlencoding::encode(instance.as_str()),
            urlencoding::encode(&artifact.name)
        ))?;

        let reserve = artifact.size.unwrap_or(0).min(MAX_PREALLOC) as usize;
        let mut content = Vec::with_capacity(reserve);
        let mut trail = MarkerTrail::default();
        let mut marker: Option<String> = None;
        loop {
            let portion: LogFilePortion = self
                .get_json(url.clone(), marker.as_deref(), &artifact.name)
                .await?;
            if let Some(data) = portion.log_file_data {
                content.extend_from_slice(data.as_bytes());
            }

            if !portion.additional_data_pending {
                break;
            }
            marker = trail.advance(portion.marker)?;
            if marker.is_none() {
                return Err(SourceError::Other(
                    "gateway reported pending data without a marker".to_string(),
                ));
            }
        }

        Ok(content)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source_for(server: &MockServer) -> HttpLogSource {
        HttpLogSource::new(&SourceConfig {
            endpoint: Some(server.uri()),
            ..SourceConfig::default()
        })
        .unwrap()
    }

    fn mydb() -> InstanceId {
        InstanceId::new("mydb").unwrap()
    }

    #[test]
    fn new_requires_endpoint() {
        match HttpLogSource::new(&SourceConfig::default()) {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("endpoint")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn new_rejects_malformed_endpoint() {
        let result = HttpLogSource::new(&SourceConfig {
            endpoint: Some("not a url".into()),
            ..SourceConfig::default()
        });
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn marker_trail_detects_cycles() {
        let mut trail = MarkerTrail::default();
        assert_eq!(trail.advance(Some("a".into())).unwrap(), Some("a".into()));
        assert_eq!(trail.advance(Some("b".into())).unwrap(), Some("b".into()));
        assert!(trail.advance(Some("a".into())).is_err());
        assert_eq!(trail.advance(None).unwrap(), None);
    }

    #[tokio::test]
    async fn list_follows_pagination_markers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/instances/mydb/logs"))
            .and(query_param("region", "ap-northeast-1"))
            .and(query_param_is_missing("marker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log_files": [
                    {"log_file_name": "error/mysql-error.log", "size": 120, "last_written": 1700000000000i64}
                ],
                "marker": "page-2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/instances/mydb/logs"))
            .and(query_param("marker", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log_files": [{"log_file_name": "slowquery/mysql-slowquery.log"}]
            })))
            .mount(&server)
            .await;

        let artifacts = source_for(&server).list_artifacts(&mydb()).await.unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].name, "error/mysql-error.log");
        assert_eq!(artifacts[0].size, Some(120));
        assert_eq!(artifacts[0].last_written, Some(1_700_000_000_000));
        assert_eq!(artifacts[1].name, "slowquery/mysql-slowquery.log");
        assert_eq!(artifacts[1].size, None);
    }

    #[tokio::test]
    async fn fetch_concatenates_portions() {
        let server = MockServer::start().await;
        let file_path = "/v1/instances/mydb/logs/error%2Fmysql-error.log";
        Mock::given(method("GET"))
            .and(path(file_path))
            .and(query_param_is_missing("marker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log_file_data": "first half\n",
                "marker": "m1",
                "additional_data_pending": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(file_path))
            .and(query_param("marker", "m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log_file_data": "second half\n",
                "marker": "m2",
                "additional_data_pending": false
            })))
            .mount(&server)
            .await;

        let content = source_for(&server)
            .fetch_artifact(&mydb(), &ArtifactRef::new("error/mysql-error.log"))
            .await
            .unwrap();

        assert_eq!(content, b"first half\nsecond half\n");
    }

    #[tokio::test]
    async fn null_log_data_yields_empty_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/instances/mydb/logs/error%2Fempty.log"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log_file_data": null,
                "additional_data_pending": false
            })))
            .mount(&server)
            .await;

        let content = source_for(&server)
            .fetch_artifact(&mydb(), &ArtifactRef::new("error/empty.log"))
            .await
            .unwrap();

        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn status_codes_map_to_source_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/instances/missing/logs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/instances/mydb/logs"))
            .respond_with(ResponseTemplate::new(503).set_body_string("throttled"))
            .mount(&server)
            .await;

        let source = source_for(&server);

        let missing = source
            .list_artifacts(&InstanceId::new("missing").unwrap())
            .await;
        assert!(matches!(missing, Err(SourceError::NotFound(ref what)) if what == "missing"));

        match source.list_artifacts(&mydb()).await {
            Err(SourceError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "throttled");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/instances/mydb/logs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let result = source_for(&server).list_artifacts(&mydb()).await;
        assert!(matches!(result, Err(SourceError::Decode(_))));
    }

    #[tokio::test]
    async fn bearer_token_and_path_prefix_are_applied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway/v1/instances/mydb/logs"))
            .and(header("authorization", "Bearer s3cret"))
            .and(query_param("region", "us-west-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"log_files": []})))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpLogSource::new(&SourceConfig {
            endpoint: Some(format!("{}/gateway", server.uri())),
            region: "us-west-2".into(),
            api_token: Some("s3cret".into()),
            ..SourceConfig::default()
        })
        .unwrap();

        let artifacts = source.list_artifacts(&mydb()).await.unwrap();
        assert!(artifacts.is_empty());
    }

    #[tokio::test]
    async fn huge_listed_size_does_not_reserve_memory() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/instances/mydb/logs/error%2Fhuge.log"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log_file_data": "tiny",
                "additional_data_pending": false
            })))
            .expect(2)
            .mount(&server)
            .await;

        let source = source_for(&server);
        for size in [u64::MAX, 1 << 44] {
            let artifact = ArtifactRef {
                size: Some(size),
                ..ArtifactRef::new("error/huge.log")
            };
            let content = source.fetch_artifact(&mydb(), &artifact).await.unwrap();
            assert_eq!(content, b"tiny");
        }
    }

    #[tokio::test]
    async fn pending_data_without_marker_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/instances/mydb/logs/error%2Fcut.log"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log_file_data": "partial",
                "additional_data_pending": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = source_for(&server)
            .fetch_artifact(&mydb(), &ArtifactRef::new("error/cut.log"))
            .await;

        match result {
            Err(SourceError::Other(message)) => {
                assert!(message.contains("pending data without a marker"), "{message}")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cycling_list_markers_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/instances/mydb/logs"))
            .and(query_param_is_missing("marker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log_files": [{"log_file_name": "error/a.log"}],
                "marker": "a"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/instances/mydb/logs"))
            .and(query_param("marker", "a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log_files": [{"log_file_name": "error/b.log"}],
                "marker": "b"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/instances/mydb/logs"))
            .and(query_param("marker", "b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log_files": [{"log_file_name": "error/c.log"}],
                "marker": "a"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = source_for(&server).list_artifacts(&mydb()).await;
        assert!(
            matches!(result, Err(SourceError::Other(ref m)) if m.contains("repeated pagination marker")),
            "{result:?}"
        );
    }
}
