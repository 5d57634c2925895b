//! Specialist definitions - the prompt personas behind LLM-backed agents.
//!
//! A specialist can be written as YAML:
//!
//! ```yaml
//! id: "research"
//! name: "Researcher"
//! description: "Gathers facts and sources on a topic"
//! role: "RESEARCH"
//! model_tier: "smart"
//! role_reminder: "Cite where each fact came from."
//! system_prompt: |
//!   You are a research specialist...
//! ```
//!
//! or as Markdown with YAML frontmatter, the body being the system prompt.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// A specialist agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistDef {
    /// Specialist ID; also the agent name phases refer to
    pub id: String,

    /// Display name
    pub name: String,

    /// Description of what this specialist does
    #[serde(default)]
    pub description: Option<String>,

    /// Pipeline role: RESEARCH, CREATIVE, QA, IMAGE, PUBLISHING
    #[serde(default = "default_role")]
    pub role: String,

    /// Model tier: fast, smart, reasoning
    #[serde(default = "default_model_tier")]
    pub model_tier: String,

    /// The system prompt for this specialist
    pub system_prompt: String,

    /// A brief reminder appended to messages
    #[serde(default)]
    pub role_reminder: Option<String>,

    /// Default adapter type to use with this specialist
    #[serde(default)]
    pub default_adapter: Option<String>,

    /// Default model to use
    #[serde(default)]
    pub default_model: Option<String>,

    /// Custom metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_role() -> String {
    "GENERAL".to_string()
}

fn default_model_tier() -> String {
    "smart".to_string()
}

impl SpecialistDef {
    /// Parse a specialist definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml)
            .map_err(|e| format!("Failed to parse specialist YAML: {}", e))
    }

    /// Load a specialist definition from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read specialist file '{}': {}", path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse a specialist from a Markdown file with YAML frontmatter.
    /// The file stem becomes the ID.
    pub fn from_markdown(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read specialist markdown '{}': {}", path, e))?;

        // Parse YAML frontmatter between --- delimiters
        let parts: Vec<&str> = content.splitn(3, "---").collect();
        if parts.len() < 3 {
            return Err(format!(
                "Invalid specialist markdown '{}': missing YAML frontmatter",
                path
            ));
        }

        let frontmatter = parts[1].trim();
        let body = parts[2].trim();

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct FrontMatter {
            name: String,
            description: Option<String>,
            model_tier: Option<String>,
            role: Option<String>,
            role_reminder: Option<String>,
        }

        let fm: FrontMatter = serde_yaml::from_str(frontmatter)
            .map_err(|e| format!("Failed to parse frontmatter in '{}': {}", path, e))?;

        // Derive ID from filename
        let id = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            id,
            name: fm.name,
            description: fm.description,
            role: fm.role.unwrap_or_else(default_role),
            model_tier: fm.model_tier.unwrap_or_else(default_model_tier),
            system_prompt: body.to_string(),
            role_reminder: fm.role_reminder,
            default_adapter: None,
            default_model: None,
            metadata: HashMap::new(),
        })
    }
}

/// Loads specialist definitions from built-ins and directories.
#[derive(Debug, Clone, Default)]
pub struct SpecialistLoader {
    /// Loaded specialists indexed by ID
    pub specialists: HashMap<String, SpecialistDef>,
}

impl SpecialistLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader pre-populated with the content pipeline specialists.
    pub fn with_builtins() -> Self {
        let mut loader = Self::new();
        for specialist in Self::builtin_specialists() {
            loader.insert(specialist);
        }
        loader
    }

    /// Add or replace a specialist.
    pub fn insert(&mut self, specialist: SpecialistDef) {
        self.specialists.insert(specialist.id.clone(), specialist);
    }

    /// Load all specialists from a directory.
    /// Supports both `.yaml`/`.yml` and `.md` (markdown with frontmatter) files.
    pub fn load_dir(&mut self, dir: &str) -> Result<usize, String> {
        let dir_path = Path::new(dir);
        if !dir_path.is_dir() {
            return Err(format!("Specialist directory '{}' does not exist", dir));
        }

        let mut count = 0;
        for entry in std::fs::read_dir(dir_path)
            .map_err(|e| format!("Failed to read directory '{}': {}", dir, e))?
        {
            let entry = entry.map_err(|e| format!("Directory entry error: {}", e))?;
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

            let specialist = match ext {
                "yaml" | "yml" => SpecialistDef::from_file(path.to_str().unwrap_or(""))?,
                "md" => SpecialistDef::from_markdown(path.to_str().unwrap_or(""))?,
                _ => continue,
            };

            tracing::info!("[SpecialistLoader] Loaded specialist: {} ({})", specialist.id, specialist.name);
            self.insert(specialist);
            count += 1;
        }

        Ok(count)
    }

    /// Get a specialist by ID.
    pub fn get(&self, id: &str) -> Option<&SpecialistDef> {
        self.specialists.get(id)
    }

    /// Get all loaded specialists.
    pub fn all(&self) -> &HashMap<String, SpecialistDef> {
        &self.specialists
    }

    /// Load from the conventional `specialists/` directories if present.
    pub fn load_default_dirs(&mut self) -> usize {
        let mut total = 0;

        for dir in ["specialists", "resources/specialists"] {
            if Path::new(dir).is_dir() {
                match self.load_dir(dir) {
                    Ok(n) => {
                        tracing::info!("[SpecialistLoader] Loaded {} specialists from '{}'", n, dir);
                        total += n;
                    }
                    Err(e) => {
                        tracing::warn!("[SpecialistLoader] Failed to load from '{}': {}", dir, e);
                    }
                }
            }
        }

        total
    }

    fn builtin(
        id: &str,
        name: &str,
        description: &str,
        role: &str,
        model_tier: &str,
        system_prompt: &str,
        role_reminder: &str,
    ) -> SpecialistDef {
        SpecialistDef {
            id: id.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            role: role.to_string(),
            model_tier: model_tier.to_string(),
            system_prompt: system_prompt.to_string(),
            role_reminder: Some(role_reminder.to_string()),
            default_adapter: None,
            default_model: None,
            metadata: HashMap::new(),
        }
    }

    /// Built-in content pipeline specialists (no files needed).
    pub fn builtin_specialists() -> Vec<SpecialistDef> {
        vec![
            Self::builtin(
                "research",
                "Researcher",
                "Gathers facts, sources and angles on a topic",
                "RESEARCH",
                "smart",
                "You are a research specialist. Given a topic and any prior findings, \
                 collect the key facts, statistics and open questions a writer needs. \
                 Return a structured summary with a list of sources.",
                "Cite where each fact came from. Do not write the article.",
            ),
            Self::builtin(
                "creative",
                "Writer",
                "Drafts long-form content from research notes",
                "CREATIVE",
                "smart",
                "You are a content writer. Turn the research notes in your input into \
                 a clear, engaging draft with a title, an introduction and sections. \
                 Keep the facts exactly as researched.",
                "Write from the research provided. Do not invent facts.",
            ),
            Self::builtin(
                "qa",
                "Editor",
                "Reviews drafts for accuracy, clarity and tone",
                "QA",
                "smart",
                "You are an editor. Review the draft against the research and score it \
                 from 0 to 1. If a quality_threshold is given and the score is below it, \
                 list the concrete fixes needed. Otherwise return the polished text.",
                "Report a numeric score. Be specific about every issue.",
            ),
            Self::builtin(
                "image",
                "Illustrator",
                "Writes image prompts and alt text for a piece",
                "IMAGE",
                "fast",
                "You design visuals for written content. Propose a hero image and up to \
                 three inline images, each with a generation prompt and alt text.",
                "Describe images; never claim to have rendered them.",
            ),
            Self::builtin(
                "publishing",
                "Publisher",
                "Prepares the final piece for publication",
                "PUBLISHING",
                "fast",
                "You prepare content for publication. Produce the final title, slug, \
                 meta description, tags and the formatted body in Markdown.",
                "Only format and package. Do not rewrite the content.",
            ),
        ]
    }
}
