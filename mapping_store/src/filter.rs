use regex::Regex;

use crate::error::{MappingStoreError, Result};

/// Glob filters over mapping base paths.
///
/// The flavor matches the backup agent's: `*` matches any run of characters,
/// separators included (`*.info` matches `data/file4.info`), while `?`
/// matches exactly one non-separator character. Patterns are anchored at
/// both ends. An empty set retains every record.
#[derive(Debug, Default)]
pub struct PathFilterSet {
    patterns: Vec<Regex>,
}

impl PathFilterSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            compiled.push(compile_glob(pattern.as_ref())?);
        }
        Ok(Self { patterns: compiled })
    }

    pub fn matches(&self, base_path: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(base_path))
    }
}

fn compile_glob(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 2);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push_str("[^/]"),
            ch => {
                let mut buf = [0u8; 4];
                expr.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
            },
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| MappingStoreError::InvalidPattern(format!("{pattern}: {e}")))
}
