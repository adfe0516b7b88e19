//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` / `${VAR}`: value of VAR, error if unset
//! - `${VAR:-default}`: default when VAR is unset or empty
//! - `${VAR-default}`: default only when VAR is unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # 1: braced name
            (?:
                (:?-)                  # 2: default operator
                ([^}]*)                # 3: default value
            )?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # 4: bare name
        ",
    )
    .expect("static interpolation pattern compiles")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every problem found; all are reported together.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();
    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| substitute(caps, &mut errors))
        .into_owned();

    InterpolationResult { text, errors }
}

fn substitute(caps: &Captures, errors: &mut Vec<String>) -> String {
    let matched = &caps[0];
    if matched == "$$" {
        return "$".to_string();
    }

    let name = caps
        .get(1)
        .or_else(|| caps.get(4))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let operator = caps.get(2).map(|m| m.as_str());
    let default = caps.get(3).map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => {
            errors.push(format!(
                "environment variable '{name}' contains newlines, which is not allowed"
            ));
            matched.to_string()
        }
        Ok(value) if value.is_empty() && operator == Some(":-") => {
            default.unwrap_or_default().to_string()
        }
        Ok(value) => value,
        Err(_) => match default {
            Some(default) => default.to_string(),
            None => {
                errors.push(format!("environment variable '{name}' is not set"));
                matched.to_string()
            }
        },
    }
}
