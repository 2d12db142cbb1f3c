

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::utils::collapse_whitespace;

lazy_static! {
    /// Causal-inference abbreviations and their canonical expansions.
    pub static ref ABBREVIATION_MAP: HashMap<&'static str, &'static str> = HashMap::from([
        ("iv", "instrumental variables"),
        ("ivs", "instrumental variables"),
        ("2sls", "two-stage least squares"),
        ("tsls", "two-stage least squares"),
        ("did", "difference-in-differences"),
        ("dd", "difference-in-differences"),
        ("diff-in-diff", "difference-in-differences"),
        ("rdd", "regression discontinuity design"),
        ("rd", "regression discontinuity"),
        ("psm", "propensity score matching"),
        ("ate", "average treatment effect"),
        ("att", "average treatment effect on the treated"),
        ("atc", "average treatment effect on the controls"),
        ("atu", "average treatment effect on the untreated"),
        ("late", "local average treatment effect"),
        ("cate", "conditional average treatment effect"),
        ("itt", "intention to treat"),
        ("toa", "treatment on the treated"),
        ("ols", "ordinary least squares"),
        ("gls", "generalized least squares"),
        ("gmm", "generalized method of moments"),
        ("ml", "machine learning"),
        ("dml", "double machine learning"),
        ("lasso", "least absolute shrinkage and selection operator"),
        ("rf", "random forest"),
        ("gbm", "gradient boosting machine"),
        ("xgboost", "extreme gradient boosting"),
        ("dag", "directed acyclic graph"),
        ("scm", "structural causal model"),
        ("sem", "structural equation model"),
        ("rct", "randomized controlled trial"),
        ("fe", "fixed effects"),
        ("re", "random effects"),
        ("cia", "conditional independence assumption"),
        ("sutva", "stable unit treatment value assumption"),
        ("nuc", "no unmeasured confounding"),
    ]);

    static ref TRAILING_PARENTHETICAL: Regex = Regex::new(r"\s*\([^()]*\)\s*$").unwrap();
    static ref HYPHEN_RUN: Regex = Regex::new(r"-{2,}").unwrap();
}

const QUOTES: &[char] = &['"', '\'', '`', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}'];

/// Deterministic identity form of a concept name. Idempotent.
pub fn canonicalize(name: &str) -> String {
    let lowered = name.to_lowercase();
    let unquoted = lowered.trim().trim_matches(QUOTES);
    let mut s = collapse_whitespace(unquoted);

    let without_paren = TRAILING_PARENTHETICAL.replace(&s, "").into_owned();
    if !without_paren.trim().is_empty() {
        s = without_paren;
    }

    let stripped: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    let stripped = HYPHEN_RUN.replace_all(&stripped, "-");

    let chars: Vec<char> = stripped.chars().collect();
    let dehyphenated: String = chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            if c != '-' {
                return c;
            }
            let before = i > 0 && chars[i - 1].is_alphanumeric();
            let after = chars.get(i + 1).is_some_and(|n| n.is_alphanumeric());
            if before && after { '-' } else { ' ' }
        })
        .collect();
    let normalized = collapse_whitespace(&dehyphenated);

    match ABBREVIATION_MAP.get(normalized.as_str()) {
        Some(expansion) => (*expansion).to_string(),
        None => normalized,
    }
}

/// Abbreviations that expand to `canonical`.
pub fn reverse_abbreviations(canonical: &str) -> impl Iterator<Item = &'static str> + '_ {
    ABBREVIATION_MAP
        .iter()
        .filter(move |(_, expansion)| **expansion == canonical)
        .map(|(abbrev, _)| *abbrev)
}
