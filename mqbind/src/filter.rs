//! Subscription filter expressions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag expression matching every message
pub const SUB_ALL: &str = "*";

/// Separator between alternatives in a tag expression
const TAG_ALTERNATIVE: &str = "||";

/// How the broker interprets a filter expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SelectorKind {
    /// `*` or `tagA || tagB`
    #[default]
    Tag,
    /// SQL92 predicate over message properties
    Sql92,
}

/// Filter bound to one subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterExpression {
    expression: String,
    kind: SelectorKind,
}

impl FilterExpression {
    /// Blank expressions fall back to [`SUB_ALL`]
    pub fn new<S: AsRef<str>>(expression: S, kind: SelectorKind) -> Self {
        let expression = expression.as_ref().trim();
        let expression = if expression.is_empty() {
            SUB_ALL
        } else {
            expression
        };
        Self {
            expression: expression.to_string(),
            kind,
        }
    }

    pub fn sub_all() -> Self {
        Self::new(SUB_ALL, SelectorKind::Tag)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn kind(&self) -> SelectorKind {
        self.kind
    }

    /// Evaluate a tag expression against a message tag.
    ///
    /// Returns `None` for SQL92 expressions, which only the broker can evaluate.
    pub fn matches_tag(&self, tag: Option<&str>) -> Option<bool> {
        match self.kind {
            SelectorKind::Sql92 => None,
            SelectorKind::Tag => {
                if self.expression == SUB_ALL {
                    return Some(true);
                }
                let Some(tag) = tag else {
                    return Some(false);
                };
                Some(
                    self.expression
                        .split(TAG_ALTERNATIVE)
                        .map(str::trim)
                        .any(|candidate| candidate == tag),
                )
            }
        }
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.expression)
    }
}
