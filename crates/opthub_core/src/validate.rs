use serde_json::Value;

use crate::error::{OptHubError, Result};
use crate::model::Numeric;

/// Parses a solution typed by a user or read from a file.
///
/// Accepted forms are a JSON number, a JSON array of numbers, the wire form
/// `{"scalar": x}` / `{"vector": [..]}`, or comma-separated numbers.
/// ```
/// use opthub_core::model::Numeric;
/// use opthub_core::validate::parse_solution;
///
/// assert_eq!(parse_solution("1.5").unwrap(), Numeric::Scalar(1.5));
/// assert_eq!(parse_solution("[1, 2.5]").unwrap(), Numeric::Vector(vec![1.0, 2.5]));
/// assert_eq!(parse_solution("1, 2.5").unwrap(), Numeric::Vector(vec![1.0, 2.5]));
/// assert!(parse_solution("[1, \"a\"]").is_err());
/// ```
pub fn parse_solution(text: &str) -> Result<Numeric> {
    let text = text.trim();
    if text.is_empty() {
        return Err(OptHubError::validation("solution is empty"));
    }

    let numeric = match serde_json::from_str::<Value>(text) {
        Ok(value) => from_json(value)?,
        Err(e) if text.starts_with(['[', '{']) => {
            return Err(OptHubError::validation(format!("malformed JSON: {}", e)));
        }
        Err(_) => from_comma_separated(text)?,
    };

    check_variable(&numeric)?;
    Ok(numeric)
}

/// Rejects empty vectors and non-finite values.
pub fn check_variable(variable: &Numeric) -> Result<()> {
    if variable.dimension() == 0 {
        return Err(OptHubError::validation("solution vector is empty"));
    }
    if let Some((i, v)) = variable
        .values()
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite())
    {
        return Err(OptHubError::validation(format!(
            "value {} at position {} is not a finite number",
            v, i
        )));
    }
    Ok(())
}

fn from_json(value: Value) -> Result<Numeric> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(Numeric::Scalar)
            .ok_or_else(|| OptHubError::validation(format!("{} is not representable", n))),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Number(n) => n.as_f64().ok_or_else(|| {
                    OptHubError::validation(format!("{} is not representable", n))
                }),
                other => Err(OptHubError::validation(format!(
                    "item {} is not a number: {}",
                    i, other
                ))),
            })
            .collect::<Result<Vec<f64>>>()
            .map(Numeric::Vector),
        value @ Value::Object(_) => serde_json::from_value::<Numeric>(value).map_err(|e| {
            OptHubError::validation(format!("expected {{\"scalar\": ..}} or {{\"vector\": [..]}}: {}", e))
        }),
        other => Err(OptHubError::validation(format!(
            "expected a number or a list of numbers, got {}",
            other
        ))),
    }
}

fn from_comma_separated(text: &str) -> Result<Numeric> {
    text.split(',')
        .map(str::trim)
        .enumerate()
        .map(|(i, item)| {
            item.parse::<f64>().map_err(|_| {
                OptHubError::validation(format!("item {} is not a number: {:?}", i, item))
            })
        })
        .collect::<Result<Vec<f64>>>()
        .map(Numeric::Vector)
}
