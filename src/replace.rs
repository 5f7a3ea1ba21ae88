use crate::{config::ReplacementRule, error::MigrateError};
use regex::Regex;

#[derive(Debug)]
enum CompiledRule {
    Literal {
        find: String,
        replace: String,
    },
    Pattern {
        regex: Regex,
        replace: String,
        label: Option<String>,
    },
}

/// One applied edit. Literal rules report a single record per file with the
/// number of occurrences; pattern rules report each match separately, tagged
/// with the rule's label when it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub label: Option<String>,
    pub old: String,
    pub new: String,
    pub count: usize,
}

impl Substitution {
    pub fn describe(&self, file: &str) -> String {
        let old = self.old.trim();
        let new = self.new.trim();
        let mut line = if new.is_empty() {
            format!("Removed '{old}' from {file}")
        } else if self.count > 1 {
            format!("Replaced '{old}' with '{new}' in {file} ({} occurrences)", self.count)
        } else {
            format!("Replaced '{old}' with '{new}' in {file}")
        };
        if let Some(label) = &self.label {
            line.push_str(&format!(" [{label}]"));
        }
        line
    }
}

#[derive(Debug)]
pub struct Patched {
    pub text: String,
    pub substitutions: Vec<Substitution>,
}

impl Patched {
    pub fn changed(&self) -> bool {
        !self.substitutions.is_empty()
    }

    pub fn total(&self) -> usize {
        self.substitutions.iter().map(|sub| sub.count).sum()
    }
}

#[derive(Debug)]
pub struct ReplacementTable {
    rules: Vec<CompiledRule>,
}

impl ReplacementTable {
    pub fn compile(rules: &[ReplacementRule]) -> Result<Self, MigrateError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            compiled.push(match rule {
                ReplacementRule::Literal { find, replace } => CompiledRule::Literal {
                    find: find.clone(),
                    replace: replace.clone(),
                },
                ReplacementRule::Pattern {
                    pattern,
                    replace,
                    label,
                } => {
                    let regex =
                        Regex::new(pattern).map_err(|source| MigrateError::InvalidPattern {
                            pattern: pattern.clone(),
                            source,
                        })?;
                    CompiledRule::Pattern {
                        regex,
                        replace: replace.clone(),
                        label: label.clone(),
                    }
                }
            });
        }
        Ok(ReplacementTable { rules: compiled })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Runs every rule in order; each rule sees the previous rule's output.
    pub fn apply(&self, input: &str) -> Patched {
        let mut text = input.to_string();
        let mut substitutions = Vec::new();
        for rule in &self.rules {
            match rule {
                CompiledRule::Literal { find, replace } => {
                    let count = text.matches(find.as_str()).count();
                    if count == 0 {
                        continue;
                    }
                    text = text.replace(find.as_str(), replace);
                    substitutions.push(Substitution {
                        label: None,
                        old: find.clone(),
                        new: replace.clone(),
                        count,
                    });
                }
                CompiledRule::Pattern {
                    regex,
                    replace,
                    label,
                } => {
                    let mut out = String::with_capacity(text.len());
                    let mut last = 0;
                    for caps in regex.captures_iter(&text) {
                        let Some(whole) = caps.get(0) else {
                            continue;
                        };
                        if whole.as_str().is_empty() {
                            continue;
                        }
                        let mut expanded = String::new();
                        caps.expand(replace, &mut expanded);
                        out.push_str(&text[last..whole.start()]);
                        out.push_str(&expanded);
                        last = whole.end();
                        substitutions.push(Substitution {
                            label: label.clone(),
                            old: whole.as_str().to_string(),
                            new: expanded,
                            count: 1,
                        });
                    }
                    if last > 0 {
                        out.push_str(&text[last..]);
                        text = out;
                    }
                }
            }
        }
        Patched {
            text,
            substitutions,
        }
    }
}
