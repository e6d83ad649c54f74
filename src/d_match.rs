use crate::d_diag::{Diagnostic, Severity};
use log::debug;
use regex::Regex;

/// Which optional fields must agree for an expected diagnostic to match an
/// emitted one. Line, column, and message are always significant when the
/// expected side supplies them.
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    pub severity_significant: bool,
    pub file_significant: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        MatchPolicy {
            severity_significant: true,
            file_significant: true,
        }
    }
}

/// The reconciliation partitions for one compilation step.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// Expected diagnostics that at least one emitted diagnostic satisfied.
    pub matched: Vec<Diagnostic>,
    /// Expected diagnostics no emitted diagnostic satisfied.
    pub missing: Vec<Diagnostic>,
    /// Emitted diagnostics no expectation accounts for.
    pub spurious: Vec<Diagnostic>,
    /// True when any emitted diagnostic carried error severity; a step that
    /// produced real errors never proceeds to execution.
    pub errors_occurred: bool,
}

impl MatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.spurious.is_empty()
    }
}

/// The verdict for one step: either the compiler crashed (which trumps all
/// other checking) or the full reconciliation result.
#[derive(Debug, Clone)]
pub enum MatchVerdict {
    /// An emitted diagnostic had the synthetic internal-error severity.
    CompilerCrash,
    Checked(MatchOutcome),
}

/// Reconciles the emitted diagnostics against the expected ones.
///
/// Every emitted diagnostic is tested against every expected diagnostic;
/// matching is deliberately not one-to-one, so a single emitted diagnostic
/// may satisfy several expectations. The first internal-error diagnostic
/// short-circuits the whole reconciliation.
pub fn reconcile(
    emitted: &[Diagnostic],
    expected: &[Diagnostic],
    policy: &MatchPolicy,
) -> MatchVerdict {
    let mut outcome = MatchOutcome::default();
    let mut matched_indexes = vec![false; expected.len()];

    for diagnostic in emitted {
        if diagnostic.is_internal_error() {
            return MatchVerdict::CompilerCrash;
        }
        if diagnostic.severity == Some(Severity::Error) {
            outcome.errors_occurred = true;
        }
        let mut is_expected = false;
        for (index, expectation) in expected.iter().enumerate() {
            if satisfies(diagnostic, expectation, policy) {
                matched_indexes[index] = true;
                is_expected = true;
            }
        }
        if !is_expected {
            debug!("spurious diagnostic: {diagnostic}");
            outcome.spurious.push(diagnostic.clone());
        }
    }

    for (index, expectation) in expected.iter().enumerate() {
        if matched_indexes[index] {
            outcome.matched.push(expectation.clone());
        } else {
            debug!("missing diagnostic: {expectation}");
            outcome.missing.push(expectation.clone());
        }
    }

    MatchVerdict::Checked(outcome)
}

/// The match predicate. Any field the expectation leaves unset is skipped.
fn satisfies(emitted: &Diagnostic, expected: &Diagnostic, policy: &MatchPolicy) -> bool {
    if let Some(expected_pos) = &expected.position {
        let emitted_pos = match &emitted.position {
            Some(p) => p,
            None => return false,
        };
        if expected_pos.line != 0 && emitted_pos.line != expected_pos.line {
            return false;
        }
        if policy.file_significant
            && !expected_pos.file.is_empty()
            && emitted_pos.base_name() != expected_pos.base_name()
        {
            return false;
        }
        if expected_pos.column != 0 && emitted_pos.column != expected_pos.column {
            return false;
        }
    }

    if policy.severity_significant {
        if let Some(expected_severity) = expected.severity {
            if emitted.severity != Some(expected_severity) {
                return false;
            }
        }
    }

    if let Some(pattern) = &expected.message {
        let text = emitted.message.as_deref().unwrap_or("");
        if !message_matches(pattern, text) {
            return false;
        }
    }

    true
}

/// The expected message is a search pattern; an invalid pattern degrades to
/// plain substring search.
fn message_matches(pattern: &str, text: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(text),
        Err(_) => text.contains(pattern),
    }
}
