use serde::{Deserialize, Serialize};

use super::point::PointId;

/// Predicate over payload fields narrowing search results.
///
/// A point matches when all `must` conditions match, at least one `should`
/// condition matches (if any), and no `must_not` condition matches.
/// The predicate is evaluated by the server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub must: Option<Vec<Condition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should: Option<Vec<Condition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub must_not: Option<Vec<Condition>>,
}

impl Filter {
    pub fn must(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self {
            must: Some(conditions.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn should(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self {
            should: Some(conditions.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn must_not(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self {
            must_not: Some(conditions.into_iter().collect()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Condition {
    Field(FieldCondition),
    HasId(HasIdCondition),
    Filter(Filter),
}

impl From<FieldCondition> for Condition {
    fn from(condition: FieldCondition) -> Self {
        Self::Field(condition)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldCondition {
    pub key: String,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub r#match: Option<Match>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

impl FieldCondition {
    pub fn range(key: impl Into<String>, range: Range) -> Self {
        Self {
            key: key.into(),
            r#match: None,
            range: Some(range),
        }
    }

    pub fn matches(key: impl Into<String>, value: impl Into<MatchValue>) -> Self {
        Self {
            key: key.into(),
            r#match: Some(Match {
                value: value.into(),
            }),
            range: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HasIdCondition {
    pub has_id: Vec<PointId>,
}

/// Numeric bounds, any combination of them
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct Range {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
}

impl Range {
    pub fn gte(threshold: f64) -> Self {
        Self {
            gte: Some(threshold),
            ..Default::default()
        }
    }

    pub fn lt(threshold: f64) -> Self {
        Self {
            lt: Some(threshold),
            ..Default::default()
        }
    }

    /// Whether `value` lies within all the bounds
    pub fn contains(&self, value: f64) -> bool {
        self.gt.map_or(true, |gt| value > gt)
            && self.gte.map_or(true, |gte| value >= gte)
            && self.lt.map_or(true, |lt| value < lt)
            && self.lte.map_or(true, |lte| value <= lte)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Match {
    pub value: MatchValue,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MatchValue {
    Bool(bool),
    Integer(i64),
    Keyword(String),
}

impl From<bool> for MatchValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MatchValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for MatchValue {
    fn from(value: &str) -> Self {
        Self::Keyword(value.to_string())
    }
}

impl From<String> for MatchValue {
    fn from(value: String) -> Self {
        Self::Keyword(value)
    }
}
