//! Environment variable interpolation for config files.
//!
//! Lets secrets like the webhook URL live in the environment instead of
//! on disk. Supported syntax:
//! - `$VAR` or `${VAR}` - substitute, error if unset
//! - `${VAR:-default}` - substitute, falling back to `default` if unset
//!   or empty
//! - `$$` - literal `$`

use std::env;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                                 # literal dollar
        |
        \$\{([A-Za-z_][A-Za-z0-9_]*)         # ${VAR
            (?: :- ([^}]*) )?                # optional :-default
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)           # bare $VAR
        ",
    )
    .expect("interpolation pattern is valid")
});

/// Outcome of an interpolation pass. Errors are accumulated rather than
/// short-circuited so every missing variable is reported at once.
#[derive(Debug)]
pub struct InterpolationResult {
    pub text: String,
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Substitute environment variables in `input`.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            let whole = &caps[0];
            if whole == "$$" {
                return "$".to_string();
            }

            let name = caps
                .get(1)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let fallback = caps.get(2).map(|m| m.as_str());

            match env::var(name) {
                Ok(value) if value.is_empty() && fallback.is_some() => {
                    fallback.unwrap_or_default().to_string()
                }
                Ok(value) => value,
                Err(_) => match fallback {
                    Some(default) => default.to_string(),
                    None => {
                        errors.push(format!("environment variable '{name}' is not set"));
                        whole.to_string()
                    }
                },
            }
        })
        .to_string();

    InterpolationResult { text, errors }
}
