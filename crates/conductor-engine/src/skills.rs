use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A named block of instructions an agent can opt into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub instructions: String,
}

impl Skill {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            instructions: instructions.into(),
        }
    }
}

/// Registry of available skills. Populated by the definition loader.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Skill>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, skill: Skill) {
        self.skills.insert(skill.name.clone(), skill);
    }

    pub fn with_skill(mut self, skill: Skill) -> Self {
        self.register(skill);
        self
    }

    /// Get a skill by name.
    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.get(name)
    }

    /// List all skill names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.skills.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Total skill count.
    pub fn count(&self) -> usize {
        self.skills.len()
    }

    /// Resolve the declared skills into the catalog injected into the
    /// system prompt. Unknown names are skipped.
    pub fn format_catalog(&self, names: &[String]) -> Option<String> {
        let mut parts = Vec::new();
        for name in names {
            match self.skills.get(name) {
                Some(skill) => parts.push(format!(
                    "<skill name=\"{}\" description=\"{}\">\n{}\n</skill>",
                    skill.name, skill.description, skill.instructions
                )),
                None => warn!(skill = %name, "declared skill is not registered"),
            }
        }
        if parts.is_empty() {
            return None;
        }
        Some(format!("<skills>\n{}\n</skills>", parts.join("\n")))
    }
}
