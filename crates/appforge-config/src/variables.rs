//! Variable interpolation for configuration values.
//!
//! Supports `${env.NAME}`, replaced with the value of environment variable
//! `NAME`. Unknown variables and unset environment variables are left as
//! written so the mistake is visible in the resulting value.

use regex::Regex;
use std::sync::LazyLock;

// Regex for matching ${scope.NAME} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\.([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap()
});

/// Source of environment values.
pub trait EnvLookup {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvLookup for std::collections::HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        std::collections::HashMap::get(self, name).cloned()
    }
}

/// Replace `${env.NAME}` references in `input`.
pub fn interpolate(input: &str, env: &dyn EnvLookup) -> String {
    VAR_REGEX
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let scope = &caps[1];
            let name = &caps[2];
            match scope {
                "env" => env.get(name).unwrap_or_else(|| caps[0].to_string()),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}
