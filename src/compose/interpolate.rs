//! Variable interpolation over a raw compose document

use crate::error::{BerthError, Result};
use regex::Regex;
use serde_yaml::Value;
use std::collections::HashMap;

/// Variable name at the start of the input
const NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*";

/// Substitutes `$VAR` style references using a fixed environment
pub struct Interpolator<'a> {
    env: &'a HashMap<String, String>,
    name: Regex,
}

impl<'a> Interpolator<'a> {
    pub fn new(env: &'a HashMap<String, String>) -> Result<Self> {
        let name = Regex::new(NAME_PATTERN)
            .map_err(|e| BerthError::Internal(format!("interpolation pattern: {}", e)))?;
        Ok(Self { env, name })
    }

    /// Interpolate every string value in the document. Mapping keys are
    /// left untouched.
    pub fn interpolate_value(&self, value: &mut Value) -> Result<()> {
        self.walk(value, "")
    }

    fn walk(&self, value: &mut Value, path: &str) -> Result<()> {
        match value {
            Value::String(s) => {
                *s = self.interpolate_str(s).map_err(|e| match e {
                    BerthError::Interpolation(msg) if !path.is_empty() => {
                        BerthError::Interpolation(format!("{}: {}", path, msg))
                    }
                    other => other,
                })?;
            }
            Value::Sequence(seq) => {
                for (i, item) in seq.iter_mut().enumerate() {
                    self.walk(item, &format!("{}[{}]", path, i))?;
                }
            }
            Value::Mapping(map) => {
                for (key, item) in map.iter_mut() {
                    let key = key.as_str().unwrap_or("?");
                    let child = if path.is_empty() {
                        key.to_string()
                    } else {
                        format!("{}.{}", path, key)
                    };
                    self.walk(item, &child)?;
                }
            }
            Value::Tagged(tagged) => self.walk(&mut tagged.value, path)?,
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
        Ok(())
    }

    /// Interpolate a single string
    pub fn interpolate_str(&self, s: &str) -> Result<String> {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            if let Some(tail) = after.strip_prefix('$') {
                out.push('$');
                rest = tail;
            } else if let Some(body) = after.strip_prefix('{') {
                let end = closing_brace(body).ok_or_else(|| {
                    BerthError::Interpolation(format!("invalid interpolation format near '${}'", after))
                })?;
                out.push_str(&self.expand(&body[..end])?);
                rest = &body[end + 1..];
            } else if let Some(name) = self.name.find(after) {
                out.push_str(&self.lookup(name.as_str()));
                rest = &after[name.end()..];
            } else {
                out.push('$');
                rest = after;
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    fn lookup(&self, name: &str) -> String {
        match self.env.get(name) {
            Some(v) => v.clone(),
            None => {
                tracing::warn!("The \"{}\" variable is not set. Defaulting to a blank string.", name);
                String::new()
            }
        }
    }

    /// Expand the inside of `${...}`
    fn expand(&self, body: &str) -> Result<String> {
        let invalid = || BerthError::Interpolation(format!("invalid interpolation format for '${{{}}}'", body));

        let name = self.name.find(body).ok_or_else(invalid)?.as_str();
        let modifier = &body[name.len()..];
        if modifier.is_empty() {
            return Ok(self.lookup(name));
        }

        let op_len = if modifier.starts_with(':') { 2 } else { 1 };
        let (op, operand) = match (modifier.get(..op_len), modifier.get(op_len..)) {
            (Some(op), Some(operand)) => (op, operand),
            _ => return Err(invalid()),
        };

        let value = self.env.get(name).map(String::as_str);
        let set = value.is_some();
        let non_empty = value.is_some_and(|v| !v.is_empty());

        match op {
            ":-" | "-" => {
                let use_value = if op == ":-" { non_empty } else { set };
                if use_value {
                    Ok(value.unwrap_or_default().to_string())
                } else {
                    self.interpolate_str(operand)
                }
            }
            ":?" | "?" => {
                let ok = if op == ":?" { non_empty } else { set };
                if ok {
                    Ok(value.unwrap_or_default().to_string())
                } else {
                    let message = if operand.is_empty() {
                        format!("required variable {} is missing a value", name)
                    } else {
                        format!(
                            "required variable {} is missing a value: {}",
                            name,
                            self.interpolate_str(operand)?
                        )
                    };
                    Err(BerthError::Interpolation(message))
                }
            }
            ":+" | "+" => {
                let use_alt = if op == ":+" { non_empty } else { set };
                if use_alt {
                    self.interpolate_str(operand)
                } else {
                    Ok(String::new())
                }
            }
            _ => Err(invalid()),
        }
    }
}

/// Index of the `}` closing a `${`, skipping nested braces
fn closing_brace(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(idx),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("TAG".to_string(), "1.0.0".to_string());
        env.insert("EMPTY".to_string(), String::new());
        env.insert("PORT".to_string(), "8000".to_string());
        env
    }

    fn run(s: &str) -> Result<String> {
        let env = env();
        Interpolator::new(&env)?.interpolate_str(s)
    }

    #[test]
    fn test_plain_references() {
        assert_eq!(run("nginx:${TAG}").unwrap(), "nginx:1.0.0");
        assert_eq!(run("nginx:$TAG").unwrap(), "nginx:1.0.0");
        assert_eq!(run("$PORT:$PORT").unwrap(), "8000:8000");
        assert_eq!(run("x${MISSING}y").unwrap(), "xy");
    }

    #[test]
    fn test_defaults() {
        assert_eq!(run("${MISSING:-3.12}").unwrap(), "3.12");
        assert_eq!(run("${EMPTY:-fallback}").unwrap(), "fallback");
        assert_eq!(run("${EMPTY-fallback}").unwrap(), "");
        assert_eq!(run("${MISSING-fallback}").unwrap(), "fallback");
        assert_eq!(run("${MISSING:-$TAG}").unwrap(), "1.0.0");
    }

    #[test]
    fn test_required() {
        assert!(matches!(
            run("${MISSING:?set it}"),
            Err(BerthError::Interpolation(msg)) if msg.contains("set it")
        ));
        assert!(run("${EMPTY:?}").is_err());
        assert_eq!(run("${EMPTY?}").unwrap(), "");
        assert_eq!(run("${TAG:?}").unwrap(), "1.0.0");
    }

    #[test]
    fn test_alternates() {
        assert_eq!(run("${TAG:+--verbose}").unwrap(), "--verbose");
        assert_eq!(run("${EMPTY:+--verbose}").unwrap(), "");
        assert_eq!(run("${EMPTY+--verbose}").unwrap(), "--verbose");
        assert_eq!(run("${MISSING+x}").unwrap(), "");
    }

    #[test]
    fn test_escapes_and_errors() {
        assert_eq!(run("cost $$5").unwrap(), "cost $5");
        assert_eq!(run("$${TAG}").unwrap(), "${TAG}");
        assert_eq!(run("trailing $").unwrap(), "trailing $");
        assert!(run("${bad name}").is_err());
        assert!(run("${TAG").is_err());
        assert!(run("${}").is_err());
    }

    #[test]
    fn test_nested_defaults() {
        assert_eq!(run("${MISSING:-${TAG}}").unwrap(), "1.0.0");
        assert_eq!(run("${PORT:-${TAG}}").unwrap(), "8000");
        assert_eq!(run("v${MISSING:-${ALSO_MISSING:-${TAG}}}-x").unwrap(), "v1.0.0-x");
        assert_eq!(run("${TAG:+${PORT}:${PORT}}").unwrap(), "8000:8000");
        assert!(matches!(
            run("${MISSING:-${NOPE:?needed}}"),
            Err(BerthError::Interpolation(msg)) if msg.contains("needed")
        ));
    }

    #[test]
    fn test_interpolate_document() {
        let env = env();
        let mut doc: Value = serde_yaml::from_str(
            r#"
services:
  web:
    image: "nginx:${TAG}"
    ports:
      - "${PORT}:80"
    environment:
      "${TAG}": kept
"#,
        )
        .unwrap();

        Interpolator::new(&env).unwrap().interpolate_value(&mut doc).unwrap();
        let web = &doc["services"]["web"];
        assert_eq!(web["image"].as_str(), Some("nginx:1.0.0"));
        assert_eq!(web["ports"][0].as_str(), Some("8000:80"));
        assert_eq!(web["environment"]["${TAG}"].as_str(), Some("kept"));
    }

    #[test]
    fn test_error_reports_path() {
        let env = env();
        let mut doc: Value = serde_yaml::from_str("services:\n  web:\n    image: \"${NOPE:?}\"\n").unwrap();
        let err = Interpolator::new(&env)
            .unwrap()
            .interpolate_value(&mut doc)
            .unwrap_err();
        assert!(err.to_string().contains("services.web.image"));
    }
}
