// src/pipeline/views.rs

//! View materializer.
//!
//! Each view is recomputed from the store on every run. Membership is fully
//! recomputed; the annotation column is carried over by key from the view's
//! previous table. Premium rows also get their domestic enrollment and
//! duration as derived columns, and the premium view reports how many rows
//! survive each of its stages.

use std::collections::BTreeSet;

use regex::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::models::{
    Annotation, CanonicalRow, PremiumCriteria, Store, ViewDefinition, ViewPredicate, columns,
};

/// Membership change of one view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewDelta {
    pub entered: usize,
    pub left: usize,
    pub retained: usize,
}

/// Rows left after each premium stage, applied in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PremiumFunnel {
    /// Store rows looked at
    pub original: usize,
    pub status: usize,
    pub exclude_healthy: usize,
    pub exclude_investigator: usize,
    pub min_phase: usize,
    pub min_enrollment: usize,
    pub min_duration: usize,
}

impl PremiumFunnel {
    /// Count a row that passed the first `stages` stages.
    fn record(&mut self, stages: usize) {
        self.original += 1;
        let counters = [
            &mut self.status,
            &mut self.exclude_healthy,
            &mut self.exclude_investigator,
            &mut self.min_phase,
            &mut self.min_enrollment,
            &mut self.min_duration,
        ];
        for counter in counters.into_iter().take(stages) {
            *counter += 1;
        }
    }

    /// Stage labels with their remaining counts, for logging.
    pub fn stages(&self) -> [(&'static str, usize); 7] {
        [
            ("original", self.original),
            ("status", self.status),
            ("exclude_healthy", self.exclude_healthy),
            ("exclude_investigator", self.exclude_investigator),
            ("min_phase", self.min_phase),
            ("min_enrollment", self.min_enrollment),
            ("min_duration", self.min_duration),
        ]
    }
}

/// A view's rows, ready to be written.
#[derive(Debug, Clone)]
pub struct MaterializedView {
    pub definition: ViewDefinition,
    pub rows: Store,
    pub delta: ViewDelta,
    /// Stage counts, for premium views only
    pub funnel: Option<PremiumFunnel>,
}

const PREMIUM_STAGES: usize = 6;

/// Evaluates view predicates against canonical rows.
pub struct ViewMatcher {
    criteria: PremiumCriteria,
    phase_span: Regex,
    phase_token: Regex,
    domestic_count: Regex,
}

impl ViewMatcher {
    pub fn new(criteria: &PremiumCriteria) -> Result<Self> {
        Ok(Self {
            criteria: criteria.clone(),
            phase_span: Regex::new(
                r"(?i)((?:IV|III|II|I|\d)[ab]?(?:\s*[/-]\s*(?:IV|III|II|I|\d)[ab]?)*)\s*상",
            )?,
            phase_token: Regex::new(r"(?i)IV|III|II|I|\d")?,
            domestic_count: Regex::new(r"\((\d+)\)")?,
        })
    }

    pub fn matches(&self, predicate: &ViewPredicate, row: &CanonicalRow) -> bool {
        match predicate {
            ViewPredicate::Premium => self.is_premium(row),
            ViewPredicate::Status { status } => row.status == *status,
        }
    }

    /// Sponsor-run, long, multi-site-scale trials in phase 2 or later.
    pub fn is_premium(&self, row: &CanonicalRow) -> bool {
        self.premium_stages(row) == PREMIUM_STAGES
    }

    /// Number of premium stages passed in order before the first failure.
    pub fn premium_stages(&self, row: &CanonicalRow) -> usize {
        let c = &self.criteria;
        let stages: [&dyn Fn() -> bool; PREMIUM_STAGES] = [
            &|| c.statuses.contains(&row.status),
            &|| !self.is_healthy_volunteer(row),
            &|| !self.is_investigator_initiated(row),
            &|| self.highest_phase(row.field(columns::PHASE)) >= Some(c.min_phase),
            &|| self.domestic_enrollment(row) >= c.min_domestic_enrollment,
            &|| row.duration_months().unwrap_or(0) >= c.min_duration_months,
        ];
        stages.iter().take_while(|passes| passes()).count()
    }

    /// Number in parentheses of the domestic enrollment text, or 0.
    pub fn domestic_enrollment(&self, row: &CanonicalRow) -> u32 {
        self.domestic_count
            .captures(row.field(columns::ENROLLMENT_DOMESTIC))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    }

    pub fn is_healthy_volunteer(&self, row: &CanonicalRow) -> bool {
        let text = format!("{} {}", row.title, row.field(columns::CONDITION_NAME)).to_lowercase();
        if self
            .criteria
            .healthy_volunteer_keywords
            .iter()
            .any(|k| text.contains(&k.to_lowercase()))
        {
            return true;
        }
        let phase = row.field(columns::PHASE);
        let upper = phase.to_uppercase();
        phase.contains("생동") || upper.contains("BE") || upper.contains("PK")
    }

    pub fn is_investigator_initiated(&self, row: &CanonicalRow) -> bool {
        let phase = row.field(columns::PHASE);
        if self
            .criteria
            .investigator_patterns
            .iter()
            .any(|p| phase.contains(p.as_str()) || row.title.contains(p.as_str()))
        {
            return true;
        }
        let sponsor = row.field(columns::SPONSOR);
        self.criteria
            .institution_sponsor_patterns
            .iter()
            .any(|p| sponsor.contains(p.as_str()))
    }

    /// Highest phase number named in a phase text (`2/3상` → 3, `IIb상` → 2).
    pub fn highest_phase(&self, phase: &str) -> Option<u8> {
        self.phase_span
            .captures_iter(phase)
            .filter_map(|caps| caps.get(1))
            .flat_map(|span| self.phase_token.find_iter(span.as_str()))
            .filter_map(|token| phase_number(token.as_str()))
            .max()
    }
}

fn phase_number(token: &str) -> Option<u8> {
    match token.to_ascii_uppercase().as_str() {
        "I" => Some(1),
        "II" => Some(2),
        "III" => Some(3),
        "IV" => Some(4),
        digit => digit.parse().ok(),
    }
}


/// Recompute one view from the store.
///
/// `previous` is the view's last written table, if any; its annotations are
/// carried over for rows that stay in the view.
pub fn materialize(
    store: &Store,
    definition: &ViewDefinition,
    previous: Option<&Store>,
    matcher: &ViewMatcher,
) -> MaterializedView {
    let header = previous
        .filter(|p| !p.header().is_empty())
        .map_or_else(|| store.header().to_vec(), |p| p.header().to_vec());
    let mut rows = Store::with_header(&definition.name, header, true);
    let mut delta = ViewDelta::default();
    let premium = definition.predicate == ViewPredicate::Premium;
    let mut funnel = premium.then(PremiumFunnel::default);

    for row in store.rows() {
        let canonical = row.canonical();
        let member = match funnel.as_mut() {
            Some(funnel) => {
                let stages = matcher.premium_stages(&canonical);
                funnel.record(stages);
                stages == PREMIUM_STAGES
            }
            None => matcher.matches(&definition.predicate, &canonical),
        };
        if !member {
            continue;
        }
        let annotation = match previous.and_then(|p| p.get(row.key)) {
            Some(kept) => {
                delta.retained += 1;
                kept.annotation.clone()
            }
            None => {
                delta.entered += 1;
                Annotation::unset()
            }
        };
        let mut kept = row.with_annotation(annotation);
        if premium {
            kept = kept
                .with_cell(
                    columns::DOMESTIC_COUNT,
                    matcher.domestic_enrollment(&canonical).to_string(),
                )
                .with_cell(
                    columns::DURATION_MONTHS,
                    canonical
                        .duration_months()
                        .map(|m| m.to_string())
                        .unwrap_or_default(),
                );
        }
        rows.insert_stored(kept);
    }

    if let Some(previous) = previous {
        let members: BTreeSet<u64> = rows.keys().collect();
        delta.left = previous.keys().filter(|k| !members.contains(k)).count();
    }

    log::debug!(
        "View {} ({}): {} rows, +{} -{}",
        definition.name,
        definition.predicate.describe(),
        rows.len(),
        delta.entered,
        delta.left
    );
    MaterializedView {
        definition: definition.clone(),
        rows,
        delta,
        funnel,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::models::{MonthStamp, Status, Table};

    fn matcher() -> ViewMatcher {
        ViewMatcher::new(&PremiumCriteria::default()).unwrap()
    }

    fn premium_row(key: u64) -> CanonicalRow {
        let fields = BTreeMap::from([
            (columns::SPONSOR.to_string(), "한국제약(주)".to_string()),
            (columns::PHASE.to_string(), "3상".to_string()),
            (columns::ENROLLMENT_DOMESTIC.to_string(), "300 (40)".to_string()),
            (columns::CONDITION_NAME.to_string(), "제2형 당뇨병".to_string()),
        ]);
        CanonicalRow {
            key,
            title: "제2형 당뇨병 환자 대상 연구".to_string(),
            status: Status::Recruiting,
            period_start_month: MonthStamp::new(2024, 1),
            period_end_month: MonthStamp::new(2026, 1),
            sites: vec!["서울대학교병원".to_string()],
            fields,
        }
    }

    fn premium_view() -> ViewDefinition {
        ViewDefinition {
            name: "filtered_premium".to_string(),
            description: String::new(),
            predicate: ViewPredicate::Premium,
        }
    }

    fn status_view(name: &str, status: Status) -> ViewDefinition {
        ViewDefinition {
            name: name.to_string(),
            description: String::new(),
            predicate: ViewPredicate::Status { status },
        }
    }

    #[test]
    fn test_phase_numbers() {
        let m = matcher();
        assert_eq!(m.highest_phase("3상"), Some(3));
        assert_eq!(m.highest_phase("2/3상"), Some(3));
        assert_eq!(m.highest_phase("1/2상"), Some(2));
        assert_eq!(m.highest_phase("IIb상"), Some(2));
        assert_eq!(m.highest_phase("iv상"), Some(4));
        assert_eq!(m.highest_phase("1상"), Some(1));
        assert_eq!(m.highest_phase("해당없음"), None);
    }

    #[test]
    fn test_premium_accepts_sponsor_trial() {
        assert!(matcher().is_premium(&premium_row(1)));
    }

    #[test]
    fn test_premium_rejections() {
        let m = matcher();

        let mut closed = premium_row(1);
        closed.status = Status::Completed;
        assert!(!m.is_premium(&closed));

        let mut healthy = premium_row(1);
        healthy.title = "건강한 성인 대상 약동학 연구".to_string();
        assert!(!m.is_premium(&healthy));

        let mut be = premium_row(1);
        be.fields.insert(columns::PHASE.to_string(), "BE 3상".to_string());
        assert!(!m.is_premium(&be));

        let mut hospital = premium_row(1);
        hospital.fields.insert(columns::SPONSOR.to_string(), "서울대학교병원".to_string());
        assert!(!m.is_premium(&hospital));

        let mut early = premium_row(1);
        early.fields.insert(columns::PHASE.to_string(), "1상".to_string());
        assert!(!m.is_premium(&early));

        let mut small = premium_row(1);
        small.fields.insert(columns::ENROLLMENT_DOMESTIC.to_string(), "300 (9)".to_string());
        assert!(!m.is_premium(&small));

        let mut short = premium_row(1);
        short.period_end_month = MonthStamp::new(2024, 12);
        assert!(!m.is_premium(&short));

        let mut year_only = premium_row(1);
        year_only.period_end_month = Some(MonthStamp::year_only(2027));
        assert!(!m.is_premium(&year_only));
    }

    fn store_with(rows: &[CanonicalRow]) -> Store {
        let mut store = Store::new("trials", false);
        for row in rows {
            store.insert_new(row, Annotation::unset());
        }
        store
    }

    #[test]
    fn test_recruiting_row_lands_in_recruiting_view_only() {
        let store = store_with(&[premium_row(1)]);
        let m = matcher();
        let recruiting = materialize(&store, &status_view("r", Status::Recruiting), None, &m);
        let approved = materialize(&store, &status_view("a", Status::Approved), None, &m);
        assert!(recruiting.rows.contains(1));
        assert!(!approved.rows.contains(1));
    }

    #[test]
    fn test_annotations_carry_over_by_key() {
        let mut second = premium_row(2);
        second.status = Status::Approved;
        let store = store_with(&[premium_row(1), second, premium_row(3)]);

        // Previous view: 1 annotated, 2 (now approved) annotated
        let previous_table = Table {
            header: vec![columns::KEY.to_string(), columns::ANNOTATION.to_string()],
            rows: vec![
                vec!["1".to_string(), "컨택중".to_string()],
                vec!["2".to_string(), "계약완료".to_string()],
            ],
        };
        let previous = Store::from_table("r", &previous_table, true).unwrap();

        let view = materialize(
            &store,
            &status_view("r", Status::Recruiting),
            Some(&previous),
            &matcher(),
        );
        assert_eq!(view.rows.get(1).unwrap().annotation.as_str(), "컨택중");
        assert!(view.rows.get(3).unwrap().annotation.is_unset());
        assert!(!view.rows.contains(2));
        assert_eq!(
            view.delta,
            ViewDelta {
                entered: 1,
                left: 1,
                retained: 1
            }
        );

        let table = view.rows.to_table();
        assert_eq!(table.header[0], columns::KEY);
        assert_eq!(table.header[1], columns::ANNOTATION);
    }

    #[test]
    fn test_regenerating_twice_is_stable() {
        let store = store_with(&[premium_row(1), premium_row(2)]);
        let m = matcher();
        let definition = premium_view();
        let first = materialize(&store, &definition, None, &m);
        let second = materialize(&store, &definition, Some(&first.rows), &m);
        assert_eq!(first.rows.to_table(), second.rows.to_table());
        assert_eq!(second.delta.retained, 2);
        assert_eq!(second.delta.entered, 0);
    }

    #[test]
    fn test_premium_funnel_counts_each_stage() {
        let mut closed = premium_row(2);
        closed.status = Status::Completed;
        let mut hospital = premium_row(3);
        hospital.fields.insert(columns::SPONSOR.to_string(), "서울대학교병원".to_string());
        let mut short = premium_row(4);
        short.period_end_month = MonthStamp::new(2024, 6);
        let store = store_with(&[premium_row(1), closed, hospital, short]);

        let view = materialize(&store, &premium_view(), None, &matcher());
        assert_eq!(
            view.funnel,
            Some(PremiumFunnel {
                original: 4,
                status: 3,
                exclude_healthy: 3,
                exclude_investigator: 2,
                min_phase: 2,
                min_enrollment: 2,
                min_duration: 1,
            })
        );
        assert_eq!(view.rows.keys().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_premium_rows_carry_derived_columns() {
        let store = store_with(&[premium_row(1)]);
        let view = materialize(&store, &premium_view(), None, &matcher());
        let row = view.rows.get(1).unwrap();
        assert_eq!(row.cell(columns::DOMESTIC_COUNT), "40");
        assert_eq!(row.cell(columns::DURATION_MONTHS), "24");

        let table = view.rows.to_table();
        assert!(table.column_index(columns::DOMESTIC_COUNT).is_some());
        assert!(table.column_index(columns::DURATION_MONTHS).is_some());
    }

    #[test]
    fn test_status_views_have_no_funnel_or_derived_columns() {
        let store = store_with(&[premium_row(1)]);
        let view = materialize(&store, &status_view("r", Status::Recruiting), None, &matcher());
        assert!(view.funnel.is_none());
        assert_eq!(view.rows.get(1).unwrap().cell(columns::DOMESTIC_COUNT), "");
    }
}
