//! Differences between a deployed stack and the stack a release asks for.

use std::fmt;

use serde::Serialize;

use convoy_core::{StackDescription, StackSpec};

/// What changed between the deployed and the desired instance stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateDrift {
    pub template_changed: bool,
    /// Parameter keys present in both with different values.
    pub changed: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl TemplateDrift {
    pub fn between(current: &StackDescription, desired: &StackSpec) -> Self {
        let mut drift = TemplateDrift {
            template_changed: current.template != desired.template,
            ..Default::default()
        };
        for (key, value) in &desired.parameters {
            match current.parameters.get(key) {
                None => drift.added.push(key.clone()),
                Some(old) if old != value => drift.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        drift.removed = current
            .parameters
            .keys()
            .filter(|k| !desired.parameters.contains_key(*k))
            .cloned()
            .collect();
        drift
    }

    pub fn is_empty(&self) -> bool {
        !self.template_changed
            && self.changed.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
    }
}

impl fmt::Display for TemplateDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no drift");
        }
        let mut parts = Vec::new();
        if self.template_changed {
            parts.push("template changed".to_string());
        }
        for (label, keys) in [
            ("changed", &self.changed),
            ("added", &self.added),
            ("removed", &self.removed),
        ] {
            if !keys.is_empty() {
                parts.push(format!("{label}: {}", keys.join(",")));
            }
        }
        f.write_str(&parts.join("; "))
    }
}
