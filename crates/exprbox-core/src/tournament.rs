//! Validation/transform step applied to compiled code before it reaches a bridge.
//!
//! The evaluator only knows the `Tournament` trait. `PatternTournament` is a
//! conservative built-in implementation that rejects code mentioning
//! escape hatches out of the sandboxed scope.

use regex::Regex;
use thiserror::Error;

/// Outcome of `Tournament::validate`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn rejected(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TournamentError {
    #[error("transform failed: {0}")]
    Transform(String),
}

/// External transform/validator collaborator.
pub trait Tournament: Send + Sync {
    fn validate(&self, code: &str) -> ValidationResult;

    fn transform(&self, code: &str) -> Result<String, TournamentError>;
}

/// Regex denylist validator with an identity transform.
pub struct PatternTournament {
    identifier_rules: Vec<(Regex, &'static str)>,
    literal_rules: Vec<(Regex, &'static str)>,
    string_literal: Regex,
    max_code_length: usize,
}

const IDENTIFIER_RULES: &[(&str, &str)] = &[
    (r"\beval\b", "eval is not allowed"),
    (r"\bFunction\b", "the Function constructor is not allowed"),
    (r"\bconstructor\b", "access to constructor is not allowed"),
    (r"__proto__", "access to __proto__ is not allowed"),
    (r"\bprototype\b", "access to prototype is not allowed"),
    (r"\brequire\b", "require is not allowed"),
    (r"\bimport\b", "import is not allowed"),
    (r"\bprocess\b", "process is not allowed"),
    (r"\bglobalThis\b", "globalThis is not allowed"),
    (r"\bthis\b", "this is not allowed"),
];

// Property names that are dangerous even when spelled as string keys.
const LITERAL_RULES: &[(&str, &str)] = &[
    (r"\bconstructor\b", "access to constructor is not allowed"),
    (r"__proto__", "access to __proto__ is not allowed"),
    (r"\bprototype\b", "access to prototype is not allowed"),
];

impl PatternTournament {
    pub fn new(max_code_length: usize) -> Result<Self, regex::Error> {
        let compile = |rules: &[(&str, &'static str)]| -> Result<Vec<(Regex, &'static str)>, regex::Error> {
            rules
                .iter()
                .map(|(pattern, message)| Ok((Regex::new(pattern)?, *message)))
                .collect()
        };
        Ok(Self {
            identifier_rules: compile(IDENTIFIER_RULES)?,
            literal_rules: compile(LITERAL_RULES)?,
            string_literal: Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|`(?:[^`\\]|\\.)*`"#)?,
            max_code_length,
        })
    }
}

impl Tournament for PatternTournament {
    fn validate(&self, code: &str) -> ValidationResult {
        let mut errors = Vec::new();
        if code.len() > self.max_code_length {
            errors.push(format!(
                "expression is {} bytes, limit is {}",
                code.len(),
                self.max_code_length
            ));
        }

        let code_only = self.string_literal.replace_all(code, "\"\"");
        for (rule, message) in &self.identifier_rules {
            if rule.is_match(&code_only) {
                errors.push((*message).to_string());
            }
        }
        for literal in self.string_literal.find_iter(code) {
            for (rule, message) in &self.literal_rules {
                if rule.is_match(literal.as_str()) && !errors.iter().any(|e| e == message) {
                    errors.push((*message).to_string());
                }
            }
        }

        if errors.is_empty() {
            ValidationResult::ok()
        } else {
            ValidationResult::rejected(errors)
        }
    }

    fn transform(&self, code: &str) -> Result<String, TournamentError> {
        Ok(code.to_string())
    }
}

impl std::fmt::Debug for PatternTournament {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternTournament")
            .field("rules", &(self.identifier_rules.len() + self.literal_rules.len()))
            .field("max_code_length", &self.max_code_length)
            .finish()
    }
}
