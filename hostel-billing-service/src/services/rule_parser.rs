//! Restricted natural-language rule sentences.
//!
//! A rule sentence such as "checkout duration is at least fifteen days" is
//! reduced to the canonical `duration >= 15` and compared with integer
//! semantics. The grammar is closed: one variable, one operator from a fixed
//! set, one non-negative integer threshold. Nothing in a rule is executed.

use crate::error::BillingError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

const CANONICAL_FORM: &str =
    "duration <op> <integer>, where <op> is one of <, >, ==, <=, >=, !=";

/// Operator phrases, longest first so "greater than or equal to" wins over
/// "greater than". Bare "is" is handled separately.
const OPERATOR_PHRASES: &[(&str, &str)] = &[
    ("greater than or equal to", ">="),
    ("less than or equal to", "<="),
    ("is not equal to", "!="),
    ("not equal to", "!="),
    ("is equal to", "=="),
    ("is not", "!="),
    ("at least", ">="),
    ("at most", "<="),
    ("greater than", ">"),
    ("more than", ">"),
    ("less than", "<"),
    ("fewer than", "<"),
    ("equals", "=="),
];

const NUMBER_WORDS: &[(&str, u32)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
    ("thirteen", 13),
    ("fourteen", 14),
    ("fifteen", 15),
    ("sixteen", 16),
    ("seventeen", 17),
    ("eighteen", 18),
    ("nineteen", 19),
    ("twenty", 20),
    ("thirty", 30),
];

const STOP_WORDS: &[&str] = &[
    "the", "student", "total", "days", "day", "checkout", "checkin", "stay", "duration",
];

static PHRASE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    OPERATOR_PHRASES
        .iter()
        .map(|(phrase, symbol)| (word_pattern(phrase), *symbol))
        .collect()
});

static IS_PATTERN: Lazy<Regex> = Lazy::new(|| word_pattern("is"));

static TWENTY_COMPOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\btwenty-(one|two|three|four|five|six|seven|eight|nine)\b")
        .expect("valid compound number pattern")
});

static NUMBER_PATTERNS: Lazy<Vec<(Regex, String)>> = Lazy::new(|| {
    NUMBER_WORDS
        .iter()
        .map(|(word, value)| (word_pattern(word), value.to_string()))
        .collect()
});

static STOP_WORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b(?:{})\b", STOP_WORDS.join("|"))).expect("valid stop word pattern")
});

static OPERATOR_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(<=|>=|==|!=|<|>)").expect("valid operator pattern"));

static CANONICAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^duration\s*(<=|>=|==|!=|<|>)\s*(\d+)$").expect("valid canonical pattern")
});

fn word_pattern(phrase: &str) -> Regex {
    Regex::new(&format!(r"\b{}\b", regex::escape(phrase))).expect("valid phrase pattern")
}

/// Comparison operators a rule may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    LessThan,
    GreaterThan,
    Equal,
    LessOrEqual,
    GreaterOrEqual,
    NotEqual,
}

impl ComparisonOperator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "<" => Some(ComparisonOperator::LessThan),
            ">" => Some(ComparisonOperator::GreaterThan),
            "==" => Some(ComparisonOperator::Equal),
            "<=" => Some(ComparisonOperator::LessOrEqual),
            ">=" => Some(ComparisonOperator::GreaterOrEqual),
            "!=" => Some(ComparisonOperator::NotEqual),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::Equal => "==",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::NotEqual => "!=",
        }
    }

    pub fn compare(&self, actual: i64, threshold: i64) -> bool {
        match self {
            ComparisonOperator::LessThan => actual < threshold,
            ComparisonOperator::GreaterThan => actual > threshold,
            ComparisonOperator::Equal => actual == threshold,
            ComparisonOperator::LessOrEqual => actual <= threshold,
            ComparisonOperator::GreaterOrEqual => actual >= threshold,
            ComparisonOperator::NotEqual => actual != threshold,
        }
    }
}

/// `{variable, operator, threshold}` triple of a parsed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRule {
    pub variable: &'static str,
    pub operator: ComparisonOperator,
    pub threshold: i64,
}

impl ParsedRule {
    pub fn matches(&self, actual: i64) -> bool {
        self.operator.compare(actual, self.threshold)
    }
}

impl fmt::Display for ParsedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.variable, self.operator.symbol(), self.threshold)
    }
}

/// Parser and evaluator for rule sentences.
pub struct RuleParser;

impl RuleParser {
    /// Evaluate `actual` against a rule sentence.
    pub fn evaluate(actual: i64, rule: &str) -> Result<bool, BillingError> {
        Ok(Self::parse(rule)?.matches(actual))
    }

    /// Reduce a rule sentence to its canonical triple.
    pub fn parse(rule: &str) -> Result<ParsedRule, BillingError> {
        let normalized = Self::normalize(rule);

        let captures = CANONICAL
            .captures(&normalized)
            .ok_or_else(|| invalid(rule))?;

        // The canonical pattern only admits known symbols; an unknown one still fails closed.
        let operator = ComparisonOperator::from_symbol(&captures[1]).ok_or_else(|| invalid(rule))?;
        let threshold = captures[2].parse::<i64>().map_err(|_| invalid(rule))?;

        Ok(ParsedRule {
            variable: "duration",
            operator,
            threshold,
        })
    }

    /// Normalized form of a rule sentence, e.g. `duration >= 15`.
    pub fn normalize(rule: &str) -> String {
        let mut text = rule.trim().to_lowercase();
        text = text.trim_end_matches(['.', '!', '?']).to_string();

        for (pattern, symbol) in PHRASE_PATTERNS.iter() {
            text = pattern
                .replace_all(&text, format!(" {} ", symbol).as_str())
                .into_owned();
        }

        // "is" is equality on its own and filler in front of another operator.
        let is_replacement = if OPERATOR_SYMBOL.is_match(&text) {
            " "
        } else {
            " == "
        };
        text = IS_PATTERN.replace_all(&text, is_replacement).into_owned();

        text = TWENTY_COMPOUND
            .replace_all(&text, |caps: &regex::Captures| {
                let unit = NUMBER_WORDS
                    .iter()
                    .find(|(word, _)| *word == &caps[1])
                    .map(|(_, value)| *value)
                    .unwrap_or(0);
                (20 + unit).to_string()
            })
            .into_owned();

        for (pattern, digits) in NUMBER_PATTERNS.iter() {
            text = pattern.replace_all(&text, digits.as_str()).into_owned();
        }

        text = STOP_WORD_PATTERN.replace_all(&text, " ").into_owned();

        let body = text.split_whitespace().collect::<Vec<_>>().join(" ");
        format!("duration {}", body).trim_end().to_string()
    }
}

fn invalid(rule: &str) -> BillingError {
    BillingError::InvalidRuleFormat(format!(
        "could not parse rule '{}'; expected {}",
        rule.trim(),
        CANONICAL_FORM
    ))
}
