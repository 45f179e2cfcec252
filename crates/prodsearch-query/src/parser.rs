//! Price constraint extraction from free-text queries.
//!
//! A query is lowercased and stripped of thousands separators, then tried
//! against an ordered list of matchers. The first matcher that fires wins,
//! so `"between $10 and $20"` is a range even though it also contains a
//! bare `10 ... 20` span.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use prodsearch_core::PriceConstraint;

/// A non-negative decimal, optionally preceded by `$` and whitespace.
const AMOUNT: &str = r"\$?\s*(\d+(?:\.\d+)?)";

/// What a matcher's captures mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    /// Two captures, ordered into `[min, max]`.
    Range,
    /// One capture, an inclusive upper bound.
    AtMost,
    /// One capture, an inclusive lower bound.
    AtLeast,
}

/// One entry of the matcher list.
#[derive(Debug, Clone)]
pub struct PriceMatcher {
    pub name: &'static str,
    pub kind: BoundKind,
    pattern: Regex,
}

impl PriceMatcher {
    pub fn new(name: &'static str, kind: BoundKind, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            kind,
            pattern: Regex::new(pattern)?,
        })
    }

    /// Try this matcher on an already-normalized query.
    fn apply(&self, normalized: &str) -> Option<PriceConstraint> {
        let caps = self.pattern.captures(normalized)?;
        let amount = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());

        match self.kind {
            BoundKind::Range => Some(PriceConstraint::between(amount(1)?, amount(2)?)),
            BoundKind::AtMost => Some(PriceConstraint::at_most(amount(1)?)),
            BoundKind::AtLeast => Some(PriceConstraint::at_least(amount(1)?)),
        }
    }
}

/// Ordered, first-match-wins price parser.
#[derive(Debug, Clone)]
pub struct PriceConstraintParser {
    matchers: Vec<PriceMatcher>,
}

static DEFAULT_PARSER: Lazy<PriceConstraintParser> = Lazy::new(|| {
    PriceConstraintParser::with_default_matchers().expect("Invalid price constraint pattern")
});

impl PriceConstraintParser {
    /// Build a parser from an explicit matcher list.
    pub fn new(matchers: Vec<PriceMatcher>) -> Self {
        Self { matchers }
    }

    /// The standard matcher list:
    ///
    /// 1. `between|from A and|to|- B`
    /// 2. `under|below|<=|less than|lt A`
    /// 3. `over|above|>=|greater than|gt A`
    /// 4. bare `A - B`
    pub fn with_default_matchers() -> Result<Self, regex::Error> {
        Ok(Self::new(vec![
            PriceMatcher::new(
                "range_phrase",
                BoundKind::Range,
                &format!(r"(?:between|from)\s*{AMOUNT}\s*(?:and|to|-)\s*{AMOUNT}"),
            )?,
            PriceMatcher::new(
                "upper_bound",
                BoundKind::AtMost,
                &format!(r"(?:under|below|<=|less than|lt)\s*{AMOUNT}"),
            )?,
            PriceMatcher::new(
                "lower_bound",
                BoundKind::AtLeast,
                &format!(r"(?:over|above|>=|greater than|gt)\s*{AMOUNT}"),
            )?,
            PriceMatcher::new(
                "bare_range",
                BoundKind::Range,
                &format!(r"{AMOUNT}\s*-\s*{AMOUNT}"),
            )?,
        ]))
    }

    /// Shared instance of the standard parser.
    pub fn standard() -> &'static Self {
        &DEFAULT_PARSER
    }

    /// Matcher names in precedence order.
    pub fn matcher_names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.name).collect()
    }

    /// Extract a price constraint; no match yields an unbounded constraint.
    pub fn parse(&self, query: &str) -> PriceConstraint {
        let normalized = query.to_lowercase().replace(',', "");

        for matcher in &self.matchers {
            if let Some(constraint) = matcher.apply(&normalized) {
                debug!("Price matcher '{}' -> {}", matcher.name, constraint);
                return constraint;
            }
        }

        PriceConstraint::unbounded()
    }
}

/// Parse with the standard matcher list.
pub fn parse_price_constraint(query: &str) -> PriceConstraint {
    PriceConstraintParser::standard().parse(query)
}
