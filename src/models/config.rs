// src/models/config.rs

//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{AppError, Result};
use crate::models::{Status, ViewDefinition, ViewPredicate};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP and request pacing settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Scan start and stop rules
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Detail page templates, in priority order
    #[serde(default = "defaults::endpoints")]
    pub endpoints: Vec<EndpointTemplate>,

    /// Record cleaning settings
    #[serde(default)]
    pub normalize: NormalizeConfig,

    /// Store tables and output locations
    #[serde(default)]
    pub store: StoreConfig,

    /// Thresholds for the premium view
    #[serde(default)]
    pub premium: PremiumCriteria,

    /// Filter views regenerated after every merge
    #[serde(default = "defaults::views")]
    pub views: Vec<ViewDefinition>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.cursor.max_consecutive_miss == 0 {
            return Err(AppError::validation(
                "cursor.max_consecutive_miss must be > 0",
            ));
        }
        if self.cursor.min_start_key == 0 {
            return Err(AppError::validation("cursor.min_start_key must be > 0"));
        }
        if self.endpoints.is_empty() {
            return Err(AppError::validation("No endpoints defined"));
        }
        for endpoint in &self.endpoints {
            if !endpoint.url.contains("{sn}") {
                return Err(AppError::validation(format!(
                    "endpoint '{}' url has no {{sn}} placeholder",
                    endpoint.name
                )));
            }
        }
        if self.normalize.status_priority.is_empty() {
            return Err(AppError::validation("normalize.status_priority is empty"));
        }
        if self
            .normalize
            .status_priority
            .contains(&Status::Unclassified)
        {
            return Err(AppError::validation(
                "normalize.status_priority cannot list the unclassified status",
            ));
        }
        if self.store.table.trim().is_empty() {
            return Err(AppError::validation("store.table is empty"));
        }

        let mut names = std::collections::HashSet::new();
        for view in &self.views {
            if view.name.trim().is_empty() {
                return Err(AppError::validation("view name is empty"));
            }
            if view.name == self.store.table {
                return Err(AppError::validation(format!(
                    "view '{}' shadows the store table",
                    view.name
                )));
            }
            if !names.insert(view.name.as_str()) {
                return Err(AppError::validation(format!(
                    "view '{}' is defined twice",
                    view.name
                )));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig::default(),
            cursor: CursorConfig::default(),
            endpoints: defaults::endpoints(),
            normalize: NormalizeConfig::default(),
            store: StoreConfig::default(),
            premium: PremiumCriteria::default(),
            views: defaults::views(),
        }
    }
}

/// HTTP client and request pacing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Minimum delay between detail requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Upper bound of the per-key spread added to the request delay
    #[serde(default = "defaults::jitter")]
    pub jitter_ms: u64,

    /// Wait before fetching dynamically loaded page fragments
    #[serde(default = "defaults::settle_delay")]
    pub settle_delay_ms: u64,

    /// Retries for a single transient request failure
    #[serde(default = "defaults::request_retries")]
    pub request_retries: u32,

    /// Backoff step between retries in milliseconds
    #[serde(default = "defaults::retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            jitter_ms: defaults::jitter(),
            settle_delay_ms: defaults::settle_delay(),
            request_retries: defaults::request_retries(),
            retry_backoff_ms: defaults::retry_backoff(),
        }
    }
}

/// Scan start and stop rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    /// Keys re-probed below the store maximum
    #[serde(default = "defaults::buffer")]
    pub buffer: u64,

    /// Consecutive misses that mark the end of issued keys
    #[serde(default = "defaults::max_consecutive_miss")]
    pub max_consecutive_miss: u32,

    /// Lowest key a scan may start from
    #[serde(default = "defaults::min_start_key")]
    pub min_start_key: u64,

    /// Times one key is re-probed after transient failures before the run aborts
    #[serde(default = "defaults::max_id_retries")]
    pub max_id_retries: u32,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            buffer: defaults::buffer(),
            max_consecutive_miss: defaults::max_consecutive_miss(),
            min_start_key: defaults::min_start_key(),
            max_id_retries: defaults::max_id_retries(),
        }
    }
}

/// A detail page URL template for one access endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointTemplate {
    /// Name used in logs and checkpoints
    pub name: String,

    /// Detail page URL with a `{sn}` placeholder
    pub url: String,

    /// Optional fragment URL serving the institution tab
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institutions_url: Option<String>,

    /// Page texts that mean the id is not issued on this endpoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub miss_markers: Vec<String>,
}

/// Record cleaning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Status keywords in tie-break order (first match wins)
    #[serde(default = "defaults::status_priority")]
    pub status_priority: Vec<Status>,

    /// Operational columns removed from cleaned rows
    #[serde(default = "defaults::operational_columns")]
    pub operational_columns: Vec<String>,

    /// Navigation texts that mark a layout page instead of a trial title
    #[serde(default = "defaults::garbage_keywords")]
    pub garbage_keywords: Vec<String>,

    /// Longest plausible title, in graphemes
    #[serde(default = "defaults::max_title_len")]
    pub max_title_len: usize,
}

impl NormalizeConfig {
    /// Whether a title is page chrome rather than a trial title.
    ///
    /// Layout pages repeat the navigation labels; two or more of them, or a
    /// title longer than `max_title_len` graphemes, mark the page as garbage.
    pub fn looks_garbage(&self, title: &str) -> bool {
        if title.graphemes(true).count() > self.max_title_len {
            return true;
        }
        let hits = self
            .garbage_keywords
            .iter()
            .filter(|k| !k.is_empty() && title.contains(k.as_str()))
            .count();
        hits >= 2
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            status_priority: defaults::status_priority(),
            operational_columns: defaults::operational_columns(),
            garbage_keywords: defaults::garbage_keywords(),
            max_title_len: defaults::max_title_len(),
        }
    }
}

/// Store tables and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Name of the main trials table
    #[serde(default = "defaults::store_table")]
    pub table: String,

    /// Whether the main table also carries the annotation column
    #[serde(default)]
    pub annotate_main: bool,

    /// Directory for raw and cleaned batch checkpoints, relative to the storage root
    #[serde(default = "defaults::output_dir")]
    pub output_dir: String,
}

impl StoreConfig {
    /// Resolve the checkpoint directory against a storage root.
    pub fn output_path(&self, root: &Path) -> PathBuf {
        let dir = Path::new(&self.output_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            root.join(dir)
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table: defaults::store_table(),
            annotate_main: false,
            output_dir: defaults::output_dir(),
        }
    }
}

/// Thresholds for the premium view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiumCriteria {
    /// Statuses a premium trial may have
    #[serde(default = "defaults::premium_statuses")]
    pub statuses: Vec<Status>,

    /// Lowest accepted phase
    #[serde(default = "defaults::min_phase")]
    pub min_phase: u8,

    /// Lowest domestic enrollment target
    #[serde(default = "defaults::min_domestic_enrollment")]
    pub min_domestic_enrollment: u32,

    /// Shortest trial period in months
    #[serde(default = "defaults::min_duration_months")]
    pub min_duration_months: i64,

    /// Title or disease keywords of healthy-volunteer studies
    #[serde(default = "defaults::healthy_volunteer_keywords")]
    pub healthy_volunteer_keywords: Vec<String>,

    /// Phase or title markers of investigator-initiated trials
    #[serde(default = "defaults::investigator_patterns")]
    pub investigator_patterns: Vec<String>,

    /// Sponsor name fragments that denote an institution rather than a company
    #[serde(default = "defaults::institution_sponsor_patterns")]
    pub institution_sponsor_patterns: Vec<String>,
}

impl Default for PremiumCriteria {
    fn default() -> Self {
        Self {
            statuses: defaults::premium_statuses(),
            min_phase: defaults::min_phase(),
            min_domestic_enrollment: defaults::min_domestic_enrollment(),
            min_duration_months: defaults::min_duration_months(),
            healthy_volunteer_keywords: defaults::healthy_volunteer_keywords(),
            investigator_patterns: defaults::investigator_patterns(),
            institution_sponsor_patterns: defaults::institution_sponsor_patterns(),
        }
    }
}

mod defaults {
    use super::{EndpointTemplate, Status, ViewDefinition, ViewPredicate};

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; trialcrawl/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        350
    }
    pub fn jitter() -> u64 {
        200
    }
    pub fn settle_delay() -> u64 {
        2000
    }
    pub fn request_retries() -> u32 {
        2
    }
    pub fn retry_backoff() -> u64 {
        1000
    }

    // Cursor defaults
    pub fn buffer() -> u64 {
        10
    }
    pub fn max_consecutive_miss() -> u32 {
        20
    }
    pub fn min_start_key() -> u64 {
        1
    }
    pub fn max_id_retries() -> u32 {
        3
    }

    pub fn endpoints() -> Vec<EndpointTemplate> {
        vec![
            EndpointTemplate {
                name: "konect".to_string(),
                url: "https://trialforme.konect.or.kr/clnctest/view.do?pageNo=&clncTestSn={sn}&relatedSearchKeyword=&searchText=&recruitStartDate=&recruitEndDate=&status=".to_string(),
                institutions_url: None,
                miss_markers: miss_markers(),
            },
            EndpointTemplate {
                name: "koreaclinicaltrials".to_string(),
                url: "https://www.koreaclinicaltrials.org/clnctest/view.do?pageNo=&clncTestSn={sn}&relatedSearchKeyword=&searchText=&recruitStartDate=&recruitEndDate=&status=".to_string(),
                institutions_url: None,
                miss_markers: miss_markers(),
            },
        ]
    }

    pub fn miss_markers() -> Vec<String> {
        vec!["존재하지 않는 임상시험".into(), "잘못된 접근".into()]
    }

    // Normalize defaults
    pub fn status_priority() -> Vec<Status> {
        vec![
            Status::Completed,
            Status::RecruitmentClosed,
            Status::Recruiting,
            Status::Approved,
        ]
    }
    pub fn operational_columns() -> Vec<String> {
        vec!["크롤링일시".into(), "수집경로".into()]
    }
    pub fn garbage_keywords() -> Vec<String> {
        vec![
            "임상시험 정보".into(),
            "식약처 승인 목록".into(),
            "목록으로".into(),
            "의약품 정보".into(),
            "실시기관 정보".into(),
            "대상자 선정기준".into(),
            "대상자 제외기준".into(),
            "연구설계 및 수행방법".into(),
            "최초 사람대상 연구여부".into(),
        ]
    }
    pub fn max_title_len() -> usize {
        300
    }

    // Store defaults
    pub fn store_table() -> String {
        "trials".into()
    }
    pub fn output_dir() -> String {
        "outputs".into()
    }

    // Premium defaults
    pub fn premium_statuses() -> Vec<Status> {
        vec![Status::Approved, Status::Recruiting]
    }
    pub fn min_phase() -> u8 {
        2
    }
    pub fn min_domestic_enrollment() -> u32 {
        10
    }
    pub fn min_duration_months() -> i64 {
        12
    }
    pub fn healthy_volunteer_keywords() -> Vec<String> {
        [
            "건강한",
            "건강한 성인",
            "건강한 자원자",
            "생동성",
            "생물학적 동등성",
            "약동학적 특성",
            "BE 시험",
            "PK 시험",
            "건강한 피험자",
            "약동학",
            "생체이용률",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
    pub fn investigator_patterns() -> Vec<String> {
        ["연구자 임상시험", "연구자주도", "연구자 주도", "IIT", "의사주도"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
    pub fn institution_sponsor_patterns() -> Vec<String> {
        ["병원", "의료원", "센터", "의과대학", "대학교"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn views() -> Vec<ViewDefinition> {
        vec![
            ViewDefinition {
                name: "filtered_premium".to_string(),
                description: "프리미엄 필터링 (모든 조건 만족)".to_string(),
                predicate: ViewPredicate::Premium,
            },
            ViewDefinition {
                name: "filtered_recruiting".to_string(),
                description: "모집중인 임상시험".to_string(),
                predicate: ViewPredicate::Status {
                    status: Status::Recruiting,
                },
            },
            ViewDefinition {
                name: "filtered_approved".to_string(),
                description: "승인완료된 임상시험".to_string(),
                predicate: ViewPredicate::Status {
                    status: Status::Approved,
                },
            },
        ]
    }
}
