//! Number translation rules
//!
//! A rule is one or more `s/pattern/replacement/[g]` substitutions chained
//! together, e.g. `s/^00/+//s/^\+1//g`. Back references in the replacement
//! may be written as `\1` or `$1`.

use regex::Regex;
use std::fmt;

use crate::{Error, Result};

#[derive(Clone)]
struct Substitution {
    pattern: Regex,
    replacement: String,
    global: bool,
}

#[derive(Clone)]
pub struct TranslationRule {
    source: String,
    steps: Vec<Substitution>,
}

impl TranslationRule {
    pub fn parse(rule: &str) -> Result<Self> {
        let parts: Vec<&str> = rule.split('/').collect();
        if parts.len() < 3 {
            return Err(Error::parse(format!("Invalid translation rule: {}", rule)));
        }

        let mut steps = Vec::new();
        for chunk in parts.chunks(4) {
            if chunk.len() < 3 {
                // Trailing empty segment after the final flags
                if chunk.iter().all(|s| s.is_empty()) {
                    continue;
                }
                return Err(Error::parse(format!("Incomplete substitution in rule: {}", rule)));
            }
            if !chunk[0].eq_ignore_ascii_case("s") {
                return Err(Error::parse(format!(
                    "Unsupported operation '{}' in rule: {}",
                    chunk[0], rule
                )));
            }
            let pattern = Regex::new(chunk[1])
                .map_err(|e| Error::parse(format!("Invalid pattern '{}': {}", chunk[1], e)))?;
            let flags = chunk.get(3).copied().unwrap_or("");
            if flags.chars().any(|c| c != 'g') {
                return Err(Error::parse(format!("Unsupported flags '{}' in rule: {}", flags, rule)));
            }
            steps.push(Substitution {
                pattern,
                replacement: convert_back_references(chunk[2]),
                global: flags.contains('g'),
            });
        }

        if steps.is_empty() {
            return Err(Error::parse(format!("Invalid translation rule: {}", rule)));
        }

        Ok(Self {
            source: rule.to_string(),
            steps,
        })
    }

    pub fn apply(&self, input: &str) -> String {
        let mut value = input.to_string();
        for step in &self.steps {
            value = if step.global {
                step.pattern.replace_all(&value, step.replacement.as_str()).into_owned()
            } else {
                step.pattern.replace(&value, step.replacement.as_str()).into_owned()
            };
        }
        value
    }
}

impl fmt::Debug for TranslationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TranslationRule").field(&self.source).finish()
    }
}

// `\1` style references become `${1}` so adjacent digits stay literal
fn convert_back_references(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(d) if d.is_ascii_digit() => {
                    out.push_str("${");
                    out.push(*d);
                    out.push('}');
                    chars.next();
                }
                Some(_) => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                None => out.push('\\'),
            },
            _ => out.push(c),
        }
    }
    out
}
