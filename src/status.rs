use anyhow::{bail, Result};
use axum::http::StatusCode;
use std::fmt;
use std::ops::RangeInclusive;

/// Caller-visible outcome class of a storage response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    ClientError,
    ServerError,
}

impl StatusClass {
    /// Classify a raw status code. Informational and redirect codes have no class.
    pub fn of(code: u16) -> Option<Self> {
        match code {
            200..=299 => Some(StatusClass::Success),
            400..=499 => Some(StatusClass::ClientError),
            500..=599 => Some(StatusClass::ServerError),
            _ => None,
        }
    }

    pub const ALL: [StatusClass; 3] = [
        StatusClass::Success,
        StatusClass::ClientError,
        StatusClass::ServerError,
    ];
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusClass::Success => write!(f, "success"),
            StatusClass::ClientError => write!(f, "client-error"),
            StatusClass::ServerError => write!(f, "server-error"),
        }
    }
}

/// Pattern a storage status code is selected by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPattern {
    /// A single code, e.g. `200`
    Exact(u16),
    /// A whole hundred block: `Hundreds(4)` is the selection pattern `4\d{2}`
    Hundreds(u8),
}

impl StatusPattern {
    pub fn codes(self) -> RangeInclusive<u16> {
        match self {
            StatusPattern::Exact(code) => code..=code,
            StatusPattern::Hundreds(block) => {
                let base = u16::from(block) * 100;
                base..=base + 99
            }
        }
    }

    pub fn matches(self, code: u16) -> bool {
        self.codes().contains(&code)
    }

    pub fn overlaps(self, other: StatusPattern) -> bool {
        let (a, b) = (self.codes(), other.codes());
        a.start() <= b.end() && b.start() <= a.end()
    }

    /// The class every code of this pattern falls in, if it is a single class.
    pub fn class(self) -> Option<StatusClass> {
        let codes = self.codes();
        let first = StatusClass::of(*codes.start())?;
        (StatusClass::of(*codes.end()) == Some(first)).then_some(first)
    }
}

impl fmt::Display for StatusPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusPattern::Exact(code) => write!(f, "{}", code),
            StatusPattern::Hundreds(block) => write!(f, "{}\\d{{2}}", block),
        }
    }
}

/// One entry of a route's ordered status rule list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRule {
    pub pattern: StatusPattern,
    pub respond_with: StatusCode,
}

impl StatusRule {
    pub const fn new(pattern: StatusPattern, respond_with: StatusCode) -> Self {
        Self {
            pattern,
            respond_with,
        }
    }

    pub fn class(&self) -> Option<StatusClass> {
        self.pattern.class()
    }
}

/// The rule list every declared route uses: `200`, `4\d{2}`, `5\d{2}`
pub fn default_rules() -> Vec<StatusRule> {
    vec![
        StatusRule::new(StatusPattern::Exact(200), StatusCode::OK),
        StatusRule::new(StatusPattern::Hundreds(4), StatusCode::BAD_REQUEST),
        StatusRule::new(StatusPattern::Hundreds(5), StatusCode::INTERNAL_SERVER_ERROR),
    ]
}

/// First rule whose pattern matches `code`, in declaration order
pub fn select(rules: &[StatusRule], code: u16) -> Option<&StatusRule> {
    rules.iter().find(|rule| rule.pattern.matches(code))
}

/// Checks that the rules cover all three outcome classes and that no code is
/// selected by more than one rule.
pub fn validate_rules(rules: &[StatusRule]) -> Result<()> {
    for rule in rules {
        match rule.pattern {
            StatusPattern::Exact(code) if !(100..=599).contains(&code) => {
                bail!("status pattern {} is not a valid HTTP status", rule.pattern)
            }
            StatusPattern::Hundreds(block) if !(1..=5).contains(&block) => {
                bail!("status pattern {} is not a valid HTTP status block", rule.pattern)
            }
            _ => {}
        }
        if rule.class().is_none() {
            bail!(
                "status pattern {} does not fall in a single status class",
                rule.pattern
            );
        }
    }

    for class in StatusClass::ALL {
        if !rules.iter().any(|rule| rule.class() == Some(class)) {
            bail!("status rules do not cover the {} class", class);
        }
    }

    for (i, rule) in rules.iter().enumerate() {
        if let Some(other) = rules[i + 1..]
            .iter()
            .find(|other| rule.pattern.overlaps(other.pattern))
        {
            bail!(
                "status patterns {} and {} overlap",
                rule.pattern,
                other.pattern
            );
        }
    }

    Ok(())
}
