// src/models/view.rs

//! Derived view definitions.

use serde::{Deserialize, Serialize};

use crate::models::Status;

/// A named, filtered subset of the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewDefinition {
    /// Table name of the view (must differ from the store table)
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Row selection rule
    pub predicate: ViewPredicate,
}

/// Rule deciding whether a store row belongs to a view.
///
/// In TOML: `predicate = { kind = "status", status = "모집중" }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewPredicate {
    /// Premium criteria from the `[premium]` section
    Premium,

    /// Rows whose status equals `status`
    Status { status: Status },
}

impl ViewPredicate {
    /// Short label used in logs.
    pub fn describe(&self) -> String {
        match self {
            ViewPredicate::Premium => "premium".to_string(),
            ViewPredicate::Status { status } => format!("status={status}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        views: Vec<ViewDefinition>,
    }

    #[test]
    fn test_parses_tagged_predicates() {
        let toml_str = r#"
            [[views]]
            name = "filtered_premium"
            predicate = { kind = "premium" }

            [[views]]
            name = "filtered_recruiting"
            description = "recruiting trials"
            predicate = { kind = "status", status = "모집중" }
        "#;
        let parsed: Wrapper = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.views[0].predicate, ViewPredicate::Premium);
        assert_eq!(
            parsed.views[1].predicate,
            ViewPredicate::Status {
                status: Status::Recruiting
            }
        );
        assert_eq!(parsed.views[0].description, "");
    }

    #[test]
    fn test_rejects_unknown_status() {
        let toml_str = r#"
            [[views]]
            name = "x"
            predicate = { kind = "status", status = "보류" }
        "#;
        assert!(toml::from_str::<Wrapper>(toml_str).is_err());
    }
}
