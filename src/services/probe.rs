// src/services/probe.rs

//! Endpoint probe.
//!
//! Fetches the detail page of one serial id through the configured endpoint
//! templates and classifies the result as found, miss or transient failure.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use reqwest::StatusCode;
use scraper::Html;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::error::Result;
use crate::models::{
    Config, CrawlerConfig, EndpointTemplate, NormalizeConfig, RawRecord, SiteEntry,
};
use crate::services::shapes::{self, ResponseShape};
use crate::utils::http::{FetchedPage, PageFetcher, create_async_client};
use crate::utils::{build_url, resolve_url, same_page};

/// Result of probing one serial id.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// A structured record was parsed
    Found(RawRecord),
    /// No endpoint serves the id
    Miss,
    /// At least one endpoint failed in a way worth retrying
    Transient { endpoint: String, reason: String },
}

/// Anything that can be asked for the record behind a serial id.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn probe(&self, key: u64) -> ProbeOutcome;
}

/// Classification of one endpoint's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum PageClass {
    Found(RawRecord),
    Miss(String),
    Transient(String),
}

/// HTTP-backed [`RecordSource`] trying endpoints in priority order.
pub struct EndpointProbe {
    fetcher: Box<dyn PageFetcher>,
    endpoints: Vec<EndpointTemplate>,
    crawler: CrawlerConfig,
    normalize: NormalizeConfig,
    last_request: Mutex<Option<Instant>>,
}

impl EndpointProbe {
    /// Create a probe with its own HTTP client.
    pub fn new(config: &Config) -> Result<Self> {
        let client = create_async_client(&config.crawler)?;
        Ok(Self::with_fetcher(config, client))
    }

    /// Create a probe that reads pages through `fetcher`.
    pub fn with_fetcher(config: &Config, fetcher: impl PageFetcher + 'static) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            endpoints: config.endpoints.clone(),
            crawler: config.crawler.clone(),
            normalize: config.normalize.clone(),
            last_request: Mutex::new(None),
        }
    }

    /// Probe one endpoint, including its institution fragment.
    async fn probe_endpoint(&self, endpoint: &EndpointTemplate, key: u64) -> PageClass {
        let url = match build_url(&endpoint.url, key) {
            Ok(url) => url,
            Err(e) => return PageClass::Transient(e.to_string()),
        };
        let page = match self.fetch_with_retries(url.as_str(), key).await {
            Ok(page) => page,
            Err(reason) => return PageClass::Transient(reason),
        };

        let mut record = match classify_page(endpoint, &url, key, &page, &self.normalize) {
            PageClass::Found(record) => record,
            other => return other,
        };
        let Some(fragment) = &endpoint.institutions_url else {
            return PageClass::Found(record);
        };

        // The institution tab is loaded after the page settles
        let fragment_url = resolve_url(&url, &fragment.replace("{sn}", &key.to_string()));
        tokio::time::sleep(Duration::from_millis(self.crawler.settle_delay_ms)).await;
        let fragment_page = match self.fetch_with_retries(&fragment_url, key).await {
            Ok(page) if page.status.is_success() => page,
            Ok(page) => {
                return PageClass::Transient(format!(
                    "institution fragment returned HTTP {}",
                    page.status.as_u16()
                ));
            }
            Err(reason) => return PageClass::Transient(reason),
        };
        match parse_fragment_sites(&fragment_page.body) {
            Ok(sites) if !sites.is_empty() => record.sites = sites,
            Ok(_) => {}
            Err(e) => return PageClass::Transient(e.to_string()),
        }
        PageClass::Found(record)
    }

    /// Fetch with pacing, retrying transient failures with linear backoff.
    async fn fetch_with_retries(
        &self,
        url: &str,
        key: u64,
    ) -> std::result::Result<FetchedPage, String> {
        let mut reason = String::new();
        for attempt in 0..=self.crawler.request_retries {
            if attempt > 0 {
                let backoff = self.crawler.retry_backoff_ms * u64::from(attempt);
                log::debug!("Retry {attempt} for {url} in {backoff}ms: {reason}");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            self.pace(key).await;
            match self.fetcher.fetch(url).await {
                Ok(page) if is_transient_status(page.status) => {
                    reason = format!("HTTP {}", page.status.as_u16());
                }
                Ok(page) => return Ok(page),
                Err(e) => reason = e.to_string(),
            }
        }
        Err(reason)
    }

    /// Wait until the inter-request delay has passed since the previous request.
    async fn pace(&self, key: u64) {
        let mut last = self.last_request.lock().await;
        let gap = Duration::from_millis(
            self.crawler.request_delay_ms + jitter_ms(key, self.crawler.jitter_ms),
        );
        if let Some(previous) = *last {
            let ready_at = previous + gap;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl RecordSource for EndpointProbe {
    async fn probe(&self, key: u64) -> ProbeOutcome {
        let mut transient: Option<(String, String)> = None;
        for endpoint in &self.endpoints {
            match self.probe_endpoint(endpoint, key).await {
                PageClass::Found(record) => {
                    log::debug!("{key}: found via {}", endpoint.name);
                    return ProbeOutcome::Found(record);
                }
                PageClass::Miss(reason) => {
                    log::debug!("{key}: miss via {} ({reason})", endpoint.name);
                }
                PageClass::Transient(reason) => {
                    log::warn!("{key}: transient failure via {}: {reason}", endpoint.name);
                    transient = Some((endpoint.name.clone(), reason));
                }
            }
        }
        match transient {
            Some((endpoint, reason)) => ProbeOutcome::Transient { endpoint, reason },
            None => ProbeOutcome::Miss,
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Deterministic spread in `0..=max` derived from the key.
pub fn jitter_ms(key: u64, max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    // splitmix64 finalizer
    let mut z = key.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    (z ^ (z >> 31)) % (max + 1)
}

fn parse_fragment_sites(body: &str) -> Result<Vec<SiteEntry>> {
    let document = Html::parse_fragment(body);
    shapes::parse_institutions(&document)
}

/// Classify one fetched page. Pure; the HTTP layer has already retried.
pub fn classify_page(
    endpoint: &EndpointTemplate,
    requested: &Url,
    key: u64,
    page: &FetchedPage,
    normalize: &NormalizeConfig,
) -> PageClass {
    let status = page.status;
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return PageClass::Miss(format!("HTTP {}", status.as_u16()));
    }
    if is_transient_status(status) || !status.is_success() {
        return PageClass::Transient(format!("HTTP {}", status.as_u16()));
    }
    if !same_page(requested, &page.final_url) {
        return PageClass::Miss(format!("redirected to {}", page.final_url));
    }
    if let Some(marker) = endpoint
        .miss_markers
        .iter()
        .find(|m| !m.is_empty() && page.body.contains(m.as_str()))
    {
        return PageClass::Miss(format!("page says '{marker}'"));
    }

    let document = Html::parse_document(&page.body);
    let shape = match ResponseShape::detect(&document) {
        Ok(Some(shape)) => shape,
        Ok(None) => return PageClass::Transient("unrecognized response shape".to_string()),
        Err(e) => return PageClass::Transient(e.to_string()),
    };
    let parsed = match shape.parse(&document) {
        Ok(parsed) => parsed,
        Err(e) => return PageClass::Transient(e.to_string()),
    };
    if parsed.title.is_empty() || normalize.looks_garbage(&parsed.title) {
        return PageClass::Miss(format!("empty {} shell", shape.name()));
    }

    PageClass::Found(RawRecord {
        key,
        title: parsed.title,
        fields: parsed.fields,
        sites: parsed.sites,
        fetched_at: Some(Local::now().naive_local()),
        endpoint: endpoint.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::columns;
    use crate::services::shapes::fixtures;

    fn endpoint() -> EndpointTemplate {
        EndpointTemplate {
            name: "konect".to_string(),
            url: "https://example.com/clnctest/view.do?clncTestSn={sn}".to_string(),
            institutions_url: None,
            miss_markers: vec!["존재하지 않는 임상시험".to_string()],
        }
    }

    fn page(status: u16, final_url: &str, body: &str) -> FetchedPage {
        FetchedPage {
            status: StatusCode::from_u16(status).unwrap(),
            final_url: final_url.to_string(),
            body: body.to_string(),
        }
    }

    fn classify(status: u16, final_url: &str, body: &str) -> PageClass {
        let ep = endpoint();
        let url = build_url(&ep.url, 77).unwrap();
        classify_page(&ep, &url, 77, &page(status, final_url, body), &NormalizeConfig::default())
    }

    const DETAIL: &str = "https://example.com/clnctest/view.do?clncTestSn=77";

    #[test]
    fn test_not_found_and_gone_are_misses() {
        assert!(matches!(classify(404, DETAIL, ""), PageClass::Miss(_)));
        assert!(matches!(classify(410, DETAIL, ""), PageClass::Miss(_)));
    }

    #[test]
    fn test_throttling_and_server_errors_are_transient() {
        assert!(matches!(classify(429, DETAIL, ""), PageClass::Transient(_)));
        assert!(matches!(classify(503, DETAIL, ""), PageClass::Transient(_)));
        assert!(matches!(classify(403, DETAIL, ""), PageClass::Transient(_)));
    }

    #[test]
    fn test_detail_page_is_found() {
        match classify(200, DETAIL, fixtures::RECRUIT_DETAIL) {
            PageClass::Found(record) => {
                assert_eq!(record.key, 77);
                assert_eq!(record.endpoint, "konect");
                assert_eq!(record.field(columns::PHASE), "3상");
                assert!(record.fetched_at.is_some());
            }
            other => panic!("expected found, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_shell_is_miss() {
        assert!(matches!(
            classify(200, DETAIL, fixtures::EMPTY_SHELL),
            PageClass::Miss(_)
        ));
    }

    #[test]
    fn test_redirect_to_list_is_miss() {
        let class = classify(
            200,
            "https://example.com/clnctest/list.do",
            fixtures::RECRUIT_DETAIL,
        );
        assert!(matches!(class, PageClass::Miss(_)));
    }

    #[test]
    fn test_miss_marker_is_miss() {
        let body = "<html><body><p>존재하지 않는 임상시험입니다.</p></body></html>";
        assert!(matches!(classify(200, DETAIL, body), PageClass::Miss(_)));
    }

    #[test]
    fn test_unknown_page_is_transient_not_miss() {
        match classify(200, DETAIL, fixtures::LIST_PAGE) {
            PageClass::Transient(reason) => assert!(reason.contains("unrecognized")),
            other => panic!("expected transient, got {other:?}"),
        }
    }

    /// Serves canned pages per URL; the last page of a queue repeats.
    struct CannedPages {
        pages: std::sync::Mutex<std::collections::HashMap<String, Vec<FetchedPage>>>,
        requests: std::sync::Mutex<Vec<String>>,
    }

    impl CannedPages {
        fn new(pages: Vec<(&str, Vec<FetchedPage>)>) -> Self {
            Self {
                pages: std::sync::Mutex::new(
                    pages
                        .into_iter()
                        .map(|(url, queue)| (url.to_string(), queue))
                        .collect(),
                ),
                requests: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for std::sync::Arc<CannedPages> {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
            self.requests.lock().unwrap().push(url.to_string());
            let mut pages = self.pages.lock().unwrap();
            let queue = pages.get_mut(url);
            Ok(match queue {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) => queue[0].clone(),
                None => page(404, url, ""),
            })
        }
    }

    const A: &str = "https://a.example/clnctest/view.do?clncTestSn=77";
    const B: &str = "https://b.example/clnctest/view.do?clncTestSn=77";

    fn two_endpoint_config() -> Config {
        let mut config = Config::default();
        config.crawler.request_delay_ms = 0;
        config.crawler.jitter_ms = 0;
        config.crawler.retry_backoff_ms = 0;
        config.crawler.settle_delay_ms = 0;
        config.crawler.request_retries = 2;
        config.endpoints = ["a", "b"]
            .iter()
            .map(|name| EndpointTemplate {
                name: name.to_string(),
                url: format!("https://{name}.example/clnctest/view.do?clncTestSn={{sn}}"),
                institutions_url: None,
                miss_markers: Vec::new(),
            })
            .collect();
        config
    }

    fn probe_over(
        config: &Config,
        pages: Vec<(&str, Vec<FetchedPage>)>,
    ) -> (EndpointProbe, std::sync::Arc<CannedPages>) {
        let canned = std::sync::Arc::new(CannedPages::new(pages));
        (EndpointProbe::with_fetcher(config, canned.clone()), canned)
    }

    #[tokio::test]
    async fn test_first_found_endpoint_wins() {
        let config = two_endpoint_config();
        let (probe, canned) = probe_over(
            &config,
            vec![
                (A, vec![page(200, A, fixtures::RECRUIT_DETAIL)]),
                (B, vec![page(200, B, fixtures::VIEW_TABLE)]),
            ],
        );
        match probe.probe(77).await {
            ProbeOutcome::Found(record) => assert_eq!(record.endpoint, "a"),
            other => panic!("expected found, got {other:?}"),
        }
        assert_eq!(*canned.requests.lock().unwrap(), vec![A.to_string()]);
    }

    #[tokio::test]
    async fn test_miss_falls_through_to_next_endpoint() {
        let config = two_endpoint_config();
        let (probe, _) = probe_over(
            &config,
            vec![
                (A, vec![page(404, A, "")]),
                (B, vec![page(200, B, fixtures::RECRUIT_DETAIL)]),
            ],
        );
        match probe.probe(77).await {
            ProbeOutcome::Found(record) => assert_eq!(record.endpoint, "b"),
            other => panic!("expected found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_all_endpoints_missing_is_miss() {
        let config = two_endpoint_config();
        let (probe, _) = probe_over(
            &config,
            vec![
                (A, vec![page(404, A, "")]),
                (B, vec![page(200, B, fixtures::EMPTY_SHELL)]),
            ],
        );
        assert_eq!(probe.probe(77).await, ProbeOutcome::Miss);
    }

    #[tokio::test]
    async fn test_miss_plus_transient_is_transient() {
        let config = two_endpoint_config();
        let (probe, canned) = probe_over(
            &config,
            vec![(A, vec![page(404, A, "")]), (B, vec![page(503, B, "")])],
        );
        match probe.probe(77).await {
            ProbeOutcome::Transient { endpoint, reason } => {
                assert_eq!(endpoint, "b");
                assert_eq!(reason, "HTTP 503");
            }
            other => panic!("expected transient, got {other:?}"),
        }
        // One request to a, then the first try plus two retries to b
        let requests = canned.requests.lock().unwrap();
        assert_eq!(requests.iter().filter(|u| u.as_str() == B).count(), 3);
        assert_eq!(requests.len(), 4);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_server_error() {
        let config = two_endpoint_config();
        let (probe, canned) = probe_over(
            &config,
            vec![(
                A,
                vec![page(503, A, ""), page(200, A, fixtures::RECRUIT_DETAIL)],
            )],
        );
        assert!(matches!(probe.probe(77).await, ProbeOutcome::Found(_)));
        assert_eq!(canned.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_institution_fragment_fills_sites() {
        let mut config = two_endpoint_config();
        config.endpoints.truncate(1);
        config.endpoints[0].institutions_url =
            Some("/clnctest/institutions.do?clncTestSn={sn}".to_string());
        let fragment = "https://a.example/clnctest/institutions.do?clncTestSn=77";
        let (probe, canned) = probe_over(
            &config,
            vec![
                (A, vec![page(200, A, fixtures::RECRUIT_DETAIL)]),
                (fragment, vec![page(200, fragment, fixtures::INSTITUTION_FRAGMENT)]),
            ],
        );
        match probe.probe(77).await {
            ProbeOutcome::Found(record) => {
                assert_eq!(record.sites.len(), 1);
                assert_eq!(record.sites[0].name, "삼성서울병원");
            }
            other => panic!("expected found, got {other:?}"),
        }
        assert_eq!(canned.requests.lock().unwrap().last().unwrap(), fragment);
    }

    #[tokio::test]
    async fn test_failing_fragment_is_transient() {
        let mut config = two_endpoint_config();
        config.endpoints.truncate(1);
        config.endpoints[0].institutions_url =
            Some("/clnctest/institutions.do?clncTestSn={sn}".to_string());
        let fragment = "https://a.example/clnctest/institutions.do?clncTestSn=77";
        let (probe, _) = probe_over(
            &config,
            vec![
                (A, vec![page(200, A, fixtures::RECRUIT_DETAIL)]),
                (fragment, vec![page(502, fragment, "")]),
            ],
        );
        assert!(matches!(
            probe.probe(77).await,
            ProbeOutcome::Transient { .. }
        ));
    }

    #[test]
    fn test_jitter_is_bounded_and_stable() {
        for key in 0..500 {
            let j = jitter_ms(key, 200);
            assert!(j <= 200);
            assert_eq!(j, jitter_ms(key, 200));
        }
        assert_eq!(jitter_ms(42, 0), 0);
    }
}
