/// Trigger expression evaluation
///
/// Decides once per cycle whether a node with a trigger expression fires. The
/// expression language is a small interpreted grammar (comparisons, `&&`, `||`,
/// `!`, literals and `$input` paths), so an expression can never reach the process,
/// filesystem or any name besides `$input`. A deny-list over the raw text runs
/// first as a second line of defence.

pub mod eval;
pub mod lexer;
pub mod parser;

use crate::error::TriggerError;
use crate::runtime::state_cache::InputStateCache;
use parser::Expr;
use regex::Regex;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

/// Longest expression accepted.
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Words and constructs that never belong in a trigger expression
fn deny_list() -> &'static [(Regex, &'static str)] {
    static DENY: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    DENY.get_or_init(|| {
        let globals = [
            "require", "import", "eval", "Function", "process", "global", "globalThis",
            "window", "document", "module", "exports", "this", "new", "child_process", "fs",
            "setTimeout", "setInterval", "fetch", "Reflect", "Proxy",
        ];
        let members = ["constructor", "prototype", "__proto__"];

        // Global names are only denied in root position; after '.' they are plain
        // $input lookups. Prototype members are denied everywhere.
        let mut rules: Vec<(Regex, &'static str)> = globals
            .iter()
            .filter_map(|word| {
                Regex::new(&format!(r"(?:^|[^.\w$]){}\b", regex::escape(word)))
                    .ok()
                    .map(|re| (re, *word))
            })
            .chain(members.iter().filter_map(|word| {
                Regex::new(&format!(r"\b{}\b", regex::escape(word)))
                    .ok()
                    .map(|re| (re, *word))
            }))
            .collect();
        for (pattern, label) in [(r"=>", "=>"), (r"[;{}`]", "statement syntax")] {
            if let Ok(re) = Regex::new(pattern) {
                rules.push((re, label));
            }
        }
        rules
    })
}

/// Replace the contents of quoted literals with spaces so the deny-list only sees code
fn mask_string_literals(expression: &str) -> String {
    let mut masked = String::with_capacity(expression.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in expression.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                    masked.push(' ');
                } else if c == '\\' {
                    escaped = true;
                    masked.push(' ');
                } else if c == q {
                    quote = None;
                    masked.push(c);
                } else {
                    masked.push(' ');
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                }
                masked.push(c);
            }
        }
    }
    masked
}

/// Result of an edit-time check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-session trigger evaluator with a cache of compiled expressions
#[derive(Debug, Default)]
pub struct TriggerEvaluator {
    compiled: HashMap<String, Result<Arc<Expr>, TriggerError>>,
}

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny-list check followed by a dry compile
    pub fn compile(expression: &str) -> Result<Expr, TriggerError> {
        if expression.len() > MAX_EXPRESSION_LEN {
            return Err(TriggerError::invalid(
                expression,
                format!("longer than {MAX_EXPRESSION_LEN} characters"),
            ));
        }

        let masked = mask_string_literals(expression);
        if let Some((_, token)) = deny_list().iter().find(|(re, _)| re.is_match(&masked)) {
            return Err(TriggerError::Forbidden {
                expression: expression.to_string(),
                token: token.to_string(),
            });
        }

        let tokens = lexer::tokenize(expression)?;
        parser::parse(expression, &tokens)
    }

    /// Static check usable at edit time, independent of any running flow
    pub fn validate(expression: &str) -> TriggerValidation {
        match Self::compile(expression) {
            Ok(_) => TriggerValidation { valid: true, error: None },
            Err(e) => TriggerValidation {
                valid: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Evaluate `expression` against the current inputs of `node_id`
    ///
    /// The node's input snapshot is the only value bound into the evaluation.
    pub fn evaluate(
        &mut self,
        cache: &InputStateCache,
        node_id: &str,
        expression: &str,
    ) -> Result<bool, TriggerError> {
        let compiled = self
            .compiled
            .entry(expression.to_string())
            .or_insert_with(|| Self::compile(expression).map(Arc::new))
            .clone()?;

        let input = cache.input_object(node_id);
        Ok(eval::evaluate(&compiled, &input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::PortValue;
    use serde_json::json;

    #[test]
    fn validate_rejects_process_access() {
        let result = TriggerEvaluator::validate("process.exit()");
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("process"));
    }

    #[test]
    fn validate_rejects_escape_constructs() {
        for expression in [
            "require('fs')",
            "$input.constructor",
            "this.x",
            "(() => 1)",
            "$input.a; 1",
            "globalThis",
            "new Date()",
        ] {
            let result = TriggerEvaluator::validate(expression);
            assert!(!result.valid, "expected '{expression}' to be rejected");
        }
    }

    #[test]
    fn deny_list_ignores_string_contents_and_property_names() {
        assert!(TriggerEvaluator::validate("$input.mode === 'process'").valid);
        assert!(TriggerEvaluator::validate("$input.process > 1").valid);
    }

    #[test]
    fn validate_checks_syntax() {
        assert!(TriggerEvaluator::validate("$input.temp > 100").valid);
        assert!(!TriggerEvaluator::validate("$input.temp >").valid);
        assert!(!TriggerEvaluator::validate("").valid);
        assert!(!TriggerEvaluator::validate(&"1 ".repeat(MAX_EXPRESSION_LEN)).valid);
    }

    #[test]
    fn evaluate_uses_cached_inputs() {
        let mut cache = InputStateCache::new();
        let mut evaluator = TriggerEvaluator::new();

        cache.update("n1", "temp", PortValue::good(json!(150)));
        assert!(evaluator.evaluate(&cache, "n1", "$input.temp > 100").unwrap());

        cache.update("n1", "temp", PortValue::good(json!(50)));
        assert!(!evaluator.evaluate(&cache, "n1", "$input.temp > 100").unwrap());
    }

    #[test]
    fn evaluate_reports_invalid_expressions() {
        let cache = InputStateCache::new();
        let mut evaluator = TriggerEvaluator::new();

        let err = evaluator.evaluate(&cache, "n1", "$input.temp >").unwrap_err();
        assert!(matches!(err, TriggerError::InvalidExpression { .. }));
        // cached failure is returned again
        assert!(evaluator.evaluate(&cache, "n1", "$input.temp >").is_err());
    }
}
