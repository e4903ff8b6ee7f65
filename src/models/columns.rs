// src/models/columns.rs

//! Column names of the trial tables.
//!
//! Headers follow the catalog's own Korean field labels so that the tables
//! stay readable for the people editing them.

pub const KEY: &str = "clncTestSn";
pub const STATUS: &str = "진행상태";
pub const FETCHED_AT: &str = "크롤링일시";
pub const ENDPOINT: &str = "수집경로";
pub const TITLE: &str = "임상시험명";
pub const SPONSOR: &str = "임상시험 의뢰자";
pub const LOCATION: &str = "소재지";
pub const CONDITION: &str = "대상질환";
pub const CONDITION_NAME: &str = "대상질환명";
pub const PHASE: &str = "임상시험 단계";
pub const PERIOD: &str = "임상시험 기간";
pub const PERIOD_START: &str = "임상시험 시작월";
pub const PERIOD_END: &str = "임상시험 종료월";
pub const SEX: &str = "성별";
pub const AGE: &str = "나이";
pub const ENROLLMENT_DOMESTIC: &str = "목표 대상자 수(국내)";
pub const APPROVAL_DATE: &str = "임상시험 승인일자";
pub const LAST_MODIFIED: &str = "최근 변경일자";
pub const INQUIRY: &str = "이용문의";
pub const VIEW_COUNT: &str = "조회수";
pub const REGISTERED: &str = "등록일자";
pub const ANNOTATION: &str = "컨택상태";

/// Derived columns added to premium view rows.
pub const DOMESTIC_COUNT: &str = "국내_모집인원";
pub const DURATION_MONTHS: &str = "연구기간_월";

pub const SITE_PREFIX: &str = "실시기관";
pub const SITE_CONTACT_SUFFIX: &str = "_담당자";
pub const SITE_EXTRA_SUFFIX: &str = "_기타";

/// Fields that make a record worth keeping; a record with all of them empty is a dummy.
pub const CORE_FIELDS: [&str; 3] = [SPONSOR, PHASE, APPROVAL_DATE];

/// Leading columns of a raw batch checkpoint.
pub const RAW_LEADING: [&str; 16] = [
    KEY,
    STATUS,
    FETCHED_AT,
    TITLE,
    SPONSOR,
    LOCATION,
    CONDITION,
    CONDITION_NAME,
    PHASE,
    PERIOD,
    SEX,
    AGE,
    ENROLLMENT_DOMESTIC,
    APPROVAL_DATE,
    LAST_MODIFIED,
    INQUIRY,
];

/// Store columns placed before the site columns.
pub const STORE_LEADING: [&str; 17] = [
    KEY,
    STATUS,
    TITLE,
    SPONSOR,
    LOCATION,
    CONDITION,
    CONDITION_NAME,
    PHASE,
    PERIOD,
    PERIOD_START,
    PERIOD_END,
    SEX,
    AGE,
    ENROLLMENT_DOMESTIC,
    APPROVAL_DATE,
    LAST_MODIFIED,
    INQUIRY,
];

/// Store columns placed after the site columns.
pub const STORE_TRAILING: [&str; 2] = [VIEW_COUNT, REGISTERED];

/// Which part of a site entry a column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitePart {
    Name,
    Contact,
    Extra,
}

/// Column holding the name of the `index`-th site (1-based).
pub fn site_column(index: usize) -> String {
    format!("{SITE_PREFIX}{index}")
}

/// Column holding a part of the `index`-th site (1-based).
pub fn site_part_column(index: usize, part: SitePart) -> String {
    match part {
        SitePart::Name => site_column(index),
        SitePart::Contact => format!("{SITE_PREFIX}{index}{SITE_CONTACT_SUFFIX}"),
        SitePart::Extra => format!("{SITE_PREFIX}{index}{SITE_EXTRA_SUFFIX}"),
    }
}

/// Parse `실시기관3`, `실시기관3_담당자` or `실시기관3_기타`.
pub fn parse_site_column(column: &str) -> Option<(usize, SitePart)> {
    let rest = column.strip_prefix(SITE_PREFIX)?;
    let digits_end = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(rest.len(), |(i, _)| i);
    if digits_end == 0 {
        return None;
    }
    let index: usize = rest[..digits_end].parse().ok()?;
    if index == 0 {
        return None;
    }
    let part = match &rest[digits_end..] {
        "" => SitePart::Name,
        SITE_CONTACT_SUFFIX => SitePart::Contact,
        SITE_EXTRA_SUFFIX => SitePart::Extra,
        _ => return None,
    };
    Some((index, part))
}
