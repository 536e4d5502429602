use crate::apis::{validate_partitions, SourceApi};
use crate::app::ports::{HttpClientPort, SourceRequest};
use crate::error::{EtlError, Result};
use crate::retry::{RetryError, RetryPolicy};
use crate::types::{PartitionKey, RawRecord};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Fetches one record per partition through the retry policy.
#[derive(Clone)]
pub struct Extractor {
    http: Arc<dyn HttpClientPort>,
    api: Arc<dyn SourceApi>,
    policy: RetryPolicy,
    timeout: Duration,
    retry_malformed: bool,
}

impl Extractor {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        api: Arc<dyn SourceApi>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            api,
            policy,
            timeout,
            retry_malformed: true,
        }
    }

    /// Whether a malformed response consumes retry budget (default) or fails at once.
    pub fn retry_malformed(mut self, retry: bool) -> Self {
        self.retry_malformed = retry;
        self
    }

    async fn fetch_once(&self, partition: &PartitionKey, request: &SourceRequest) -> Result<RawRecord> {
        counter!("etl_fetch_attempts_total", "source" => self.api.api_name()).increment(1);

        let resp = self
            .http
            .get(request, self.timeout)
            .await
            .map_err(EtlError::TransientSource)?;
        if !resp.is_success() {
            return Err(EtlError::HttpStatus {
                partition: partition.name.clone(),
                status: resp.status,
            });
        }

        let body: serde_json::Value = serde_json::from_slice(&resp.bytes).map_err(|e| {
            EtlError::malformed(
                &partition.name,
                format!("body ({}) is not valid JSON: {e}", resp.content_type),
            )
        })?;
        self.api.parse_record(partition, &body)
    }

    /// Fetch a single partition, retrying per the policy. Once `cancel` fires
    /// no further attempt is made and the result is `EtlError::Cancelled`.
    #[instrument(skip(self, partition, cancel), fields(partition = %partition.name, source = self.api.api_name()))]
    pub async fn extract_one(&self, partition: &PartitionKey, cancel: &CancellationToken) -> Result<RawRecord> {
        let request = self.api.build_request(partition)?;
        let retry_malformed = self.retry_malformed;

        let record = self
            .policy
            .execute_when(
                || self.fetch_once(partition, &request),
                |e: &EtlError| {
                    e.is_transient()
                        || (retry_malformed && matches!(e, EtlError::MalformedResponse { .. }))
                },
                cancel,
            )
            .await
            .map_err(|failure| match failure {
                RetryError::Cancelled { attempts } => {
                    debug!(attempts, "Fetch cancelled");
                    EtlError::Cancelled
                }
                RetryError::Exhausted {
                    attempts,
                    last_error,
                } => {
                    counter!("etl_fetch_failures_total", "source" => self.api.api_name()).increment(1);
                    EtlError::ExtractionExhausted {
                        partition: partition.name.clone(),
                        attempts,
                        source: Box::new(last_error),
                    }
                }
            })?;

        debug!("Fetched record");
        Ok(record)
    }

    /// Fetch every partition with at most `concurrency_limit` in flight.
    ///
    /// The result is positionally aligned with `partitions`. The first partition
    /// to exhaust its retries fails the whole call and aborts outstanding fetches.
    /// Once `cancel` fires no new fetch starts; in-flight ones are awaited and the
    /// call returns `EtlError::Cancelled`.
    pub async fn extract_all(
        &self,
        partitions: &[PartitionKey],
        concurrency_limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawRecord>> {
        if concurrency_limit == 0 {
            return Err(EtlError::Config(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        // Every partition must be fetchable before any request goes out.
        validate_partitions(self.api.as_ref(), partitions)?;
        info!(
            partitions = partitions.len(),
            concurrency_limit,
            source = self.api.api_name(),
            "Extracting partitions"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency_limit));
        let mut tasks = JoinSet::new();

        for (index, partition) in partitions.iter().cloned().enumerate() {
            let extractor = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return (index, Err(EtlError::Cancelled));
                };
                if cancel.is_cancelled() {
                    return (index, Err(EtlError::Cancelled));
                }
                (index, extractor.extract_one(&partition, &cancel).await)
            });
        }

        // Each task owns exactly one slot, addressed by its input index.
        let mut slots: Vec<Option<RawRecord>> = vec![None; partitions.len()];
        let mut cancelled = false;

        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tasks.abort_all();
                    return Err(EtlError::Worker(e.to_string()));
                }
            };
            match result {
                Ok(record) => slots[index] = Some(record),
                Err(EtlError::Cancelled) => cancelled = true,
                // a last attempt that failed after the token fired
                Err(_) if cancel.is_cancelled() => cancelled = true,
                Err(err) => {
                    error!(partition = %partitions[index].name, error = %err, "Partition failed, aborting extraction");
                    tasks.abort_all();
                    return Err(err);
                }
            }
        }

        if cancelled {
            return Err(EtlError::Cancelled);
        }

        slots
            .into_iter()
            .zip(partitions)
            .map(|(slot, partition)| {
                slot.ok_or_else(|| {
                    EtlError::Worker(format!("no result recorded for partition '{}'", partition.name))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::UsersApi;
    use crate::app::ports::HttpGetResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const BASE: &str = "http://users.test/users";

    /// Serves user bodies keyed by URL; can fail the first N calls, fail forever,
    /// answer with garbage, or stall before answering.
    #[derive(Default)]
    struct MockHttp {
        calls: Mutex<HashMap<String, u32>>,
        fail_first: HashMap<String, u32>,
        always_fail: Vec<String>,
        malformed: Vec<String>,
        html: Vec<String>,
        delay_ms: HashMap<String, u64>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockHttp {
        fn calls_for(&self, url: &str) -> u32 {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> u32 {
            self.calls.lock().unwrap().values().sum()
        }
    }

    fn user_body(id: u64) -> Vec<u8> {
        json!({
            "id": id, "name": format!("User {id}"), "username": format!("u{id}"),
            "email": format!("U{id}@Example.com"), "phone": "555", "website": "Example.org",
            "company": {"name": "Acme"},
            "address": {"street": "Main St", "suite": "Apt. 1", "city": "Springfield", "zipcode": "00001"}
        })
        .to_string()
        .into_bytes()
    }

    #[async_trait]
    impl HttpClientPort for MockHttp {
        async fn get(&self, request: &SourceRequest, _timeout: Duration) -> std::result::Result<HttpGetResult, String> {
            let url = request.url.clone();
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(url.clone()).or_insert(0);
                *n += 1;
                *n
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(ms) = self.delay_ms.get(&url) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.always_fail.contains(&url) {
                return Err("connection refused".to_string());
            }
            if call <= self.fail_first.get(&url).copied().unwrap_or(0) {
                return Ok(HttpGetResult {
                    status: 503,
                    bytes: Vec::new(),
                    content_type: "text/plain".into(),
                });
            }
            if self.html.contains(&url) {
                return Ok(HttpGetResult {
                    status: 200,
                    bytes: b"<html>maintenance</html>".to_vec(),
                    content_type: "text/html".into(),
                });
            }
            if self.malformed.contains(&url) {
                return Ok(HttpGetResult {
                    status: 200,
                    bytes: br#"{"id": 1}"#.to_vec(),
                    content_type: "application/json".into(),
                });
            }
            let id: u64 = url.rsplit('/').next().and_then(|s| s.parse().ok()).unwrap_or(0);
            Ok(HttpGetResult {
                status: 200,
                bytes: user_body(id),
                content_type: "application/json".into(),
            })
        }
    }

    fn partitions(n: u64) -> Vec<PartitionKey> {
        (1..=n)
            .map(|id| PartitionKey::new(format!("user-{id}")).with_param("id", id))
            .collect()
    }

    fn url(id: u64) -> String {
        format!("{BASE}/{id}")
    }

    fn extractor(http: Arc<MockHttp>, attempts: u32) -> Extractor {
        Extractor::new(
            http,
            Arc::new(UsersApi::new(BASE.to_string())),
            RetryPolicy::new(attempts, Duration::ZERO, 2.0).unwrap(),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_results_follow_input_order_not_completion_order() {
        let mut http = MockHttp::default();
        // Earlier partitions finish last.
        http.delay_ms.insert(url(1), 60);
        http.delay_ms.insert(url(2), 40);
        http.delay_ms.insert(url(3), 20);
        let http = Arc::new(http);

        let records = extractor(http.clone(), 3)
            .extract_all(&partitions(4), 4, &CancellationToken::new())
            .await
            .unwrap();

        let names: Vec<&str> = records.iter().map(|r| r.partition.as_str()).collect();
        assert_eq!(names, vec!["user-1", "user-2", "user-3", "user-4"]);
        assert_eq!(http.total_calls(), 4);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mut http = MockHttp::default();
        http.fail_first.insert(url(2), 2);
        let http = Arc::new(http);

        let records = extractor(http.clone(), 3)
            .extract_all(&partitions(3), 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(http.calls_for(&url(2)), 3);
        assert_eq!(http.calls_for(&url(1)), 1);
    }

    #[tokio::test]
    async fn test_exhausted_partition_fails_whole_extraction() {
        let mut http = MockHttp::default();
        http.always_fail.push(url(3));
        let http = Arc::new(http);

        let err = extractor(http.clone(), 3)
            .extract_all(&partitions(4), 4, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            EtlError::ExtractionExhausted {
                partition,
                attempts,
                source,
            } => {
                assert_eq!(partition, "user-3");
                assert_eq!(attempts, 3);
                assert!(matches!(*source, EtlError::TransientSource(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(http.calls_for(&url(3)), 3);
    }

    #[tokio::test]
    async fn test_malformed_response_retry_is_configurable() {
        let mut http = MockHttp::default();
        http.malformed.push(url(1));
        let http = Arc::new(http);

        let err = extractor(http.clone(), 3)
            .extract_one(&partitions(1)[0], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::ExtractionExhausted { attempts: 3, .. }));
        assert_eq!(http.calls_for(&url(1)), 3);

        let err = extractor(http.clone(), 3)
            .retry_malformed(false)
            .extract_one(&partitions(1)[0], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::ExtractionExhausted { attempts: 1, .. }));
        assert_eq!(http.calls_for(&url(1)), 4);
    }

    #[tokio::test]
    async fn test_non_json_body_reports_its_content_type() {
        let mut http = MockHttp::default();
        http.html.push(url(1));
        let http = Arc::new(http);

        let err = extractor(http, 1)
            .extract_one(&partitions(1)[0], &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            EtlError::ExtractionExhausted { source, .. } => {
                assert!(matches!(*source, EtlError::MalformedResponse { .. }));
                assert!(source.to_string().contains("body (text/html) is not valid JSON"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut http = MockHttp::default();
        for id in 1..=8 {
            http.delay_ms.insert(url(id), 15);
        }
        let http = Arc::new(http);

        let records = extractor(http.clone(), 1)
            .extract_all(&partitions(8), 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(records.len(), 8);
        let max = http.max_in_flight.load(Ordering::SeqCst);
        assert!((1..=2).contains(&max), "max in flight was {max}");
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_no_fetches() {
        let http = Arc::new(MockHttp::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = extractor(http.clone(), 3)
            .extract_all(&partitions(4), 4, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Cancelled));
        assert_eq!(http.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let http = Arc::new(MockHttp::default());
        let err = extractor(http, 3)
            .extract_all(&partitions(1), 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[tokio::test]
    async fn test_cancel_mid_run_stops_retries_and_pending_fetches() {
        let mut http = MockHttp::default();
        for id in 1..=4 {
            http.always_fail.push(url(id));
        }
        let http = Arc::new(http);
        let extractor = Extractor::new(
            http.clone(),
            Arc::new(UsersApi::new(BASE.to_string())),
            RetryPolicy::new(3, Duration::from_millis(300), 2.0).unwrap(),
            Duration::from_secs(10),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = extractor
            .extract_all(&partitions(4), 2, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::Cancelled), "got {err}");
        // only the first attempt of the two partitions holding permits
        assert_eq!(http.total_calls(), 2);
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_partition_missing_param_fails_before_any_fetch() {
        let http = Arc::new(MockHttp::default());
        let mut parts = partitions(3);
        parts[2] = PartitionKey::new("user-x");

        let err = extractor(http.clone(), 3)
            .extract_all(&parts, 2, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
        assert!(err.to_string().contains("user-x"));
        assert_eq!(http.total_calls(), 0);
    }
}
