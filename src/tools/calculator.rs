//! A stateless expression/statistics evaluator, carried over near-verbatim from the
//! reference crate's `tools/calculator.rs`: statistical aggregates over bracketed
//! arrays (mean/median/mode/std/var/sum/count/min/max), general math via `evalexpr`'s
//! `math::` namespace with human-friendly function names rewritten onto it.

use evalexpr::{context_map, eval_with_context, Value as EvalValue};
use std::fmt;

#[derive(Debug, Clone)]
pub struct CalculatorError(pub String);

impl fmt::Display for CalculatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "calculator error: {}", self.0)
    }
}

impl std::error::Error for CalculatorError {}

pub type CalculatorResult = Result<f64, CalculatorError>;

#[derive(Debug, Clone, Default)]
pub struct Calculator;

const MATH_FUNCTIONS: &[&str] = &[
    "sin", "cos", "tan", "asin", "acos", "atan", "sqrt", "ln", "log2", "log10", "exp", "abs",
];

impl Calculator {
    pub fn new() -> Self {
        Calculator
    }

    pub async fn evaluate(&self, expression: &str) -> CalculatorResult {
        let trimmed = expression.trim();
        if let Some(result) = self.try_statistical(trimmed)? {
            return Ok(result);
        }
        self.evaluate_math_expression(trimmed)
    }

    fn try_statistical(&self, expression: &str) -> Result<Option<f64>, CalculatorError> {
        for (prefix, op) in [
            ("mean(", StatOp::Mean),
            ("median(", StatOp::Median),
            ("mode(", StatOp::Mode),
            ("std(", StatOp::Std),
            ("stdpop(", StatOp::StdPop),
            ("var(", StatOp::Var),
            ("varpop(", StatOp::VarPop),
            ("sum(", StatOp::Sum),
            ("count(", StatOp::Count),
            ("min(", StatOp::Min),
            ("max(", StatOp::Max),
        ] {
            if let Some(rest) = expression.strip_prefix(prefix) {
                let inner = rest.strip_suffix(')').ok_or_else(|| {
                    CalculatorError(format!("unterminated call: {expression}"))
                })?;
                let values = parse_numeric_array(inner)?;
                return Ok(Some(apply_stat_op(op, &values)?));
            }
        }
        Ok(None)
    }

    fn evaluate_math_expression(&self, expression: &str) -> CalculatorResult {
        let prepared = prepare_expression(expression);
        let context = context_map! {
            "PI" => std::f64::consts::PI,
            "E" => std::f64::consts::E,
        }
        .map_err(|e| CalculatorError(e.to_string()))?;

        let result = eval_with_context(&prepared, &context).map_err(|e| CalculatorError(e.to_string()))?;
        match result {
            EvalValue::Float(f) => Ok(f),
            EvalValue::Int(i) => Ok(i as f64),
            other => Err(CalculatorError(format!("expression did not evaluate to a number: {other:?}"))),
        }
    }
}

#[derive(Clone, Copy)]
enum StatOp {
    Mean,
    Median,
    Mode,
    Std,
    StdPop,
    Var,
    VarPop,
    Sum,
    Count,
    Min,
    Max,
}

fn parse_numeric_array(inner: &str) -> Result<Vec<f64>, CalculatorError> {
    let cleaned = inner.trim().trim_start_matches('[').trim_end_matches(']');
    if cleaned.trim().is_empty() {
        return Err(CalculatorError("empty argument list".to_string()));
    }
    cleaned
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|_| CalculatorError(format!("not a number: {part}"))))
        .collect()
}

fn apply_stat_op(op: StatOp, values: &[f64]) -> Result<f64, CalculatorError> {
    if values.is_empty() {
        return Err(CalculatorError("cannot aggregate an empty list".to_string()));
    }
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    let mean = sum / n;

    Ok(match op {
        StatOp::Sum => sum,
        StatOp::Count => n,
        StatOp::Mean => mean,
        StatOp::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        StatOp::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        StatOp::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            }
        }
        StatOp::Mode => {
            let mut counts: Vec<(f64, u32)> = Vec::new();
            for &v in values {
                if let Some(entry) = counts.iter_mut().find(|(existing, _)| (*existing - v).abs() < f64::EPSILON) {
                    entry.1 += 1;
                } else {
                    counts.push((v, 1));
                }
            }
            counts.into_iter().max_by_key(|(_, c)| *c).map(|(v, _)| v).unwrap()
        }
        StatOp::VarPop => values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n,
        StatOp::Var => {
            if values.len() < 2 {
                return Err(CalculatorError("variance requires at least two values".to_string()));
            }
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
        }
        StatOp::StdPop => (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt(),
        StatOp::Std => {
            if values.len() < 2 {
                return Err(CalculatorError("stddev requires at least two values".to_string()));
            }
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        }
    })
}

/// Rewrites human-friendly math function names onto evalexpr's `math::` namespace,
/// avoiding double-prefixing and respecting word boundaries.
fn prepare_expression(expr: &str) -> String {
    let mut result = expr.replace("^", "**");
    for func in MATH_FUNCTIONS {
        let already_prefixed = format!("math::{func}");
        if result.contains(&already_prefixed) {
            continue;
        }
        let pattern = format!("{func}(");
        let replacement = format!("math::{func}(");
        result = replace_word_boundary(&result, &pattern, &replacement);
    }
    result
}

fn replace_word_boundary(haystack: &str, pattern: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(pos) = rest.find(pattern) {
        let preceding_is_word_char = pos > 0 && rest.as_bytes()[pos - 1].is_ascii_alphanumeric();
        out.push_str(&rest[..pos]);
        if preceding_is_word_char {
            out.push_str(&rest[pos..pos + pattern.len()]);
        } else {
            out.push_str(replacement);
        }
        rest = &rest[pos + pattern.len()..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evaluates_basic_arithmetic() {
        let calc = Calculator::new();
        assert_eq!(calc.evaluate("2 + 2").await.unwrap(), 4.0);
    }

    #[tokio::test]
    async fn evaluates_math_namespace_functions() {
        let calc = Calculator::new();
        let result = calc.evaluate("sqrt(16)").await.unwrap();
        assert_eq!(result, 4.0);
    }

    #[tokio::test]
    async fn evaluates_statistical_aggregates() {
        let calc = Calculator::new();
        assert_eq!(calc.evaluate("mean(1,2,3,4)").await.unwrap(), 2.5);
        assert_eq!(calc.evaluate("sum(1,2,3)").await.unwrap(), 6.0);
        assert_eq!(calc.evaluate("max(1,9,3)").await.unwrap(), 9.0);
    }

    #[tokio::test]
    async fn rejects_empty_aggregate_argument_list() {
        let calc = Calculator::new();
        assert!(calc.evaluate("mean()").await.is_err());
    }

    #[test]
    fn prepare_expression_does_not_double_prefix() {
        assert_eq!(prepare_expression("math::sqrt(4)"), "math::sqrt(4)");
    }
}
