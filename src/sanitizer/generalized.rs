//! Sanitizer that tokenizes values into recorded variables

use regex::Regex;

use super::variables::MARK_OPEN;
use super::{replace_matches, Sanitizer, Target, VariableTable};

/// Replaces each match with a `${name}` placeholder and records the
/// original value, so playback can put it back.
#[derive(Debug)]
pub struct VariableSanitizer {
    target: Target,
    regex: Regex,
    group: Option<usize>,
    variable: String,
}

impl VariableSanitizer {
    /// Create a variable sanitizer
    #[must_use]
    pub fn new(target: Target, regex: Regex, group: Option<usize>, variable: String) -> Self {
        Self {
            target,
            regex,
            group,
            variable,
        }
    }
}

impl Sanitizer for VariableSanitizer {
    fn target(&self) -> &Target {
        &self.target
    }

    fn apply(&self, value: &str, variables: &mut VariableTable) -> Option<String> {
        replace_matches(&self.regex, self.group, value, |original| {
            // Already tokenized by an earlier pass.
            if original.contains(MARK_OPEN) {
                return original.to_string();
            }
            variables.assign(&self.variable, original)
        })
        .filter(|replaced| replaced != value)
    }

    fn variable(&self) -> Option<&str> {
        Some(&self.variable)
    }
}
