//! Skill documents: markdown files with a YAML frontmatter block, loaded
//! from a conventionally located directory.
//!
//! A skill lives either as `<dir>/<id>.md` or `<dir>/<id>/skill.md`. The
//! frontmatter carries `name`, `description`, and `allowed-tools`; the
//! markdown body is the prompt content.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SkillFrontmatter {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "allowed-tools")]
    allowed_tools: Vec<String>,
}

/// Full skill document, returned by `GET /api/skills/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct SkillDocument {
    pub id: String,
    pub name: String,
    pub description: String,
    pub allowed_tools: Vec<String>,
    pub content: String,
}

/// Listing entry, returned by `GET /api/skills`.
#[derive(Debug, Clone, Serialize)]
pub struct SkillInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub allowed_tools: Vec<String>,
}

impl From<&SkillDocument> for SkillInfo {
    fn from(doc: &SkillDocument) -> Self {
        Self {
            id: doc.id.clone(),
            name: doc.name.clone(),
            description: doc.description.clone(),
            allowed_tools: doc.allowed_tools.clone(),
        }
    }
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SkillStore {
    dir: PathBuf,
}

impl SkillStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// List every parseable skill in the directory, sorted by id. Files
    /// that fail to parse are skipped with a warning.
    pub fn list(&self) -> Vec<SkillInfo> {
        let mut skills = Vec::new();
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return skills;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let candidate = if path.is_dir() {
                path.join("skill.md")
            } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
                path.clone()
            } else {
                continue;
            };
            if !candidate.exists() {
                continue;
            }
            let id = skill_id(&path);
            match load_skill_file(&candidate, &id) {
                Ok(doc) => skills.push(SkillInfo::from(&doc)),
                Err(e) => tracing::warn!("skipping skill {candidate:?}: {e}"),
            }
        }
        skills.sort_by(|a, b| a.id.cmp(&b.id));
        skills
    }

    /// Fetch one skill by id.
    pub fn get(&self, id: &str) -> GatewayResult<SkillDocument> {
        if id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(GatewayError::SkillNotFound(id.to_owned()));
        }
        let nested = self.dir.join(id).join("skill.md");
        if nested.exists() {
            return load_skill_file(&nested, id);
        }
        let direct = self.dir.join(format!("{id}.md"));
        if direct.exists() {
            return load_skill_file(&direct, id);
        }
        Err(GatewayError::SkillNotFound(id.to_owned()))
    }
}

fn skill_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn load_skill_file(path: &Path, id: &str) -> GatewayResult<SkillDocument> {
    let content = fs::read_to_string(path)?;
    parse_skill_content(&content, id)
}

/// Split the leading `---` fenced YAML frontmatter from the body.
fn parse_skill_content(content: &str, id: &str) -> GatewayResult<SkillDocument> {
    let content = content.trim_start();
    let Some(rest) = content.strip_prefix("---") else {
        return Err(GatewayError::SkillParse(
            "skill file must start with YAML frontmatter (---)".to_owned(),
        ));
    };
    let Some(end) = rest.find("\n---") else {
        return Err(GatewayError::SkillParse(
            "missing closing --- for YAML frontmatter".to_owned(),
        ));
    };
    let yaml = &rest[..end];
    let body = rest[end + 4..].trim().to_owned();

    let frontmatter: SkillFrontmatter = serde_yaml::from_str(yaml)?;
    Ok(SkillDocument {
        id: id.to_owned(),
        name: frontmatter.name,
        description: frontmatter.description,
        allowed_tools: frontmatter.allowed_tools,
        content: body,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
