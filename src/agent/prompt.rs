use crate::tools::ToolRegistry;
use anyhow::Result;
use chrono::Local;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Project guideline file picked up from the workspace or any parent.
pub const PROJECT_CONTEXT_FILE: &str = "FLACO.md";
const PROJECT_CONTEXT_MAX_CHARS: usize = 20_000;

/// Optional focus area appended to the base prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Specialization {
    #[default]
    General,
    Networking,
    CodeReview,
    Database,
    Frontend,
    Backend,
    Devops,
    Security,
    Api,
}

impl Specialization {
    fn prompt_addition(self) -> Option<&'static str> {
        let text = match self {
            Specialization::General => return None,
            Specialization::Networking => {
                "## Networking Specialist\n\n\
                 Focus on network configuration, HTTP and WebSocket protocols, API connectivity \
                 and distributed systems. Consider rate limiting and failure handling in every \
                 network operation."
            }
            Specialization::CodeReview => {
                "## Code Review Specialist\n\n\
                 Workflow: Glob to locate files, Read to load their contents, then analyze and \
                 report. Never review from file names alone. Cite line numbers, quote the code \
                 and order findings by severity."
            }
            Specialization::Database => {
                "## Database Specialist\n\n\
                 Focus on schema design, query performance, indexing, migrations and \
                 transactional correctness."
            }
            Specialization::Frontend => {
                "## Frontend Specialist\n\n\
                 Focus on UI components, state management, accessibility and browser \
                 performance."
            }
            Specialization::Backend => {
                "## Backend Specialist\n\n\
                 Focus on service architecture, API handlers, data validation, concurrency and \
                 error handling."
            }
            Specialization::Devops => {
                "## DevOps Specialist\n\n\
                 Focus on CI/CD pipelines, containers, infrastructure as code, deployment and \
                 observability."
            }
            Specialization::Security => {
                "## Security Specialist\n\n\
                 Focus on vulnerabilities, input validation, authentication, secrets handling \
                 and least privilege."
            }
            Specialization::Api => {
                "## API Specialist\n\n\
                 Focus on API design, versioning, request/response schemas, documentation and \
                 backwards compatibility."
            }
        };
        Some(text)
    }
}

pub struct PromptContext<'a> {
    pub workspace_dir: &'a Path,
    pub model_name: &'a str,
    pub tools: &'a ToolRegistry,
    /// Whether tool schemas are sent natively with each request.
    pub native_tools: bool,
    pub specialization: Specialization,
}

pub trait PromptSection: Send + Sync {
    fn name(&self) -> &str;
    fn build(&self, ctx: &PromptContext<'_>) -> Result<String>;
}

#[derive(Default)]
pub struct SystemPromptBuilder {
    sections: Vec<Box<dyn PromptSection>>,
}

impl SystemPromptBuilder {
    pub fn with_defaults() -> Self {
        Self {
            sections: vec![
                Box::new(IdentitySection),
                Box::new(ToolsSection),
                Box::new(SpecializationSection),
                Box::new(WorkspaceSection),
                Box::new(ProjectContextSection),
                Box::new(DateTimeSection),
            ],
        }
    }

    pub fn add_section(mut self, section: Box<dyn PromptSection>) -> Self {
        self.sections.push(section);
        self
    }

    pub fn build(&self, ctx: &PromptContext<'_>) -> Result<String> {
        let mut output = String::new();
        for section in &self.sections {
            let part = section.build(ctx)?;
            if part.trim().is_empty() {
                continue;
            }
            output.push_str(part.trim_end());
            output.push_str("\n\n");
        }
        Ok(output)
    }
}

pub struct IdentitySection;
pub struct ToolsSection;
pub struct SpecializationSection;
pub struct WorkspaceSection;
pub struct ProjectContextSection;
pub struct DateTimeSection;

impl PromptSection for IdentitySection {
    fn name(&self) -> &str {
        "identity"
    }

    fn build(&self, _ctx: &PromptContext<'_>) -> Result<String> {
        Ok("You are Flaco, an AI coding assistant running locally via Ollama.\n\n\
            You help developers write, edit and debug code, understand codebases, run commands, \
            manage git repositories and write documentation.\n\n\
            ## Communication\n\n\
            - Be concise and direct.\n\
            - Use markdown for readability.\n\
            - Ask when requirements are unclear.\n\
            - When asked to review code, Read the files first; file listings are not reviews."
            .into())
    }
}

impl PromptSection for ToolsSection {
    fn name(&self) -> &str {
        "tools"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> Result<String> {
        let mut out = String::from(
            "## Tool Execution\n\n\
             Execute tools to complete tasks instead of describing what you would do.\n\
             - Use the tool calling functionality when available.\n\
             - Otherwise output JSON: {\"name\": \"ToolName\", \"arguments\": {...}}\n\
             - Read files before editing them.\n\
             - Use TodoWrite to track multi-step work.\n\
             - Destructive actions are gated by the user's permission.\n",
        );

        if !ctx.native_tools {
            out.push_str("\n### Available Tools\n\n");
            for spec in ctx.tools.specs() {
                let _ = writeln!(
                    out,
                    "- **{}**: {}\n  Parameters: `{}`",
                    spec.name, spec.description, spec.parameters
                );
            }
        }
        Ok(out)
    }
}

impl PromptSection for SpecializationSection {
    fn name(&self) -> &str {
        "specialization"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> Result<String> {
        Ok(ctx
            .specialization
            .prompt_addition()
            .unwrap_or_default()
            .to_string())
    }
}

impl PromptSection for WorkspaceSection {
    fn name(&self) -> &str {
        "workspace"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> Result<String> {
        Ok(format!(
            "## Workspace\n\nWorking directory: `{}` | OS: {} | Model: {}",
            ctx.workspace_dir.display(),
            std::env::consts::OS,
            ctx.model_name
        ))
    }
}

impl PromptSection for ProjectContextSection {
    fn name(&self) -> &str {
        "project_context"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> Result<String> {
        let Some(path) = find_project_context_file(ctx.workspace_dir) else {
            return Ok(String::new());
        };
        let mut prompt = String::from("## Project Context\n\n");
        inject_context_file(&mut prompt, &path);
        Ok(prompt)
    }
}

impl PromptSection for DateTimeSection {
    fn name(&self) -> &str {
        "datetime"
    }

    fn build(&self, _ctx: &PromptContext<'_>) -> Result<String> {
        let now = Local::now();
        Ok(format!(
            "## Current Date & Time\n\n{} ({})",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.format("%Z")
        ))
    }
}

/// Nearest `FLACO.md` in `start` or one of its ancestors.
pub fn find_project_context_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONTEXT_FILE))
        .find(|candidate| candidate.is_file())
}

fn inject_context_file(prompt: &mut String, path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        tracing::debug!(path = %path.display(), "project context file unreadable");
        return;
    };
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return;
    }
    let _ = writeln!(prompt, "From `{}`:\n", path.display());
    let truncated = crate::util::char_prefix(trimmed, PROJECT_CONTEXT_MAX_CHARS);
    prompt.push_str(truncated);
    if truncated.len() < trimmed.len() {
        let _ = writeln!(
            prompt,
            "\n\n[... truncated at {PROJECT_CONTEXT_MAX_CHARS} chars, use Read for the full file]"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{PathScope, SecurityValidator};
    use crate::tools::default_registry;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registry(dir: &Path) -> ToolRegistry {
        default_registry(Arc::new(SecurityValidator::new(PathScope::new(dir, dir))))
    }

    fn build(dir: &Path, native_tools: bool, specialization: Specialization) -> String {
        let tools = registry(dir);
        let ctx = PromptContext {
            workspace_dir: dir,
            model_name: "test-model",
            tools: &tools,
            native_tools,
            specialization,
        };
        SystemPromptBuilder::with_defaults().build(&ctx).unwrap()
    }

    #[test]
    fn default_prompt_has_identity_and_workspace() {
        let dir = TempDir::new().unwrap();
        let prompt = build(dir.path(), true, Specialization::General);
        assert!(prompt.starts_with("You are Flaco"));
        assert!(prompt.contains("## Tool Execution"));
        assert!(prompt.contains("Model: test-model"));
        assert!(!prompt.contains("### Available Tools"));
        assert!(!prompt.contains("Specialist"));
    }

    #[test]
    fn tool_list_is_inlined_without_native_tools() {
        let dir = TempDir::new().unwrap();
        let prompt = build(dir.path(), false, Specialization::General);
        assert!(prompt.contains("### Available Tools"));
        assert!(prompt.contains("- **TodoWrite**"));
    }

    #[test]
    fn specialization_section_is_added() {
        let dir = TempDir::new().unwrap();
        let prompt = build(dir.path(), true, Specialization::CodeReview);
        assert!(prompt.contains("## Code Review Specialist"));
    }

    #[test]
    fn project_context_is_found_in_ancestor() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(PROJECT_CONTEXT_FILE), "Use tabs. PROJECT_RULES_LOADED").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(
            find_project_context_file(&nested),
            Some(dir.path().join(PROJECT_CONTEXT_FILE))
        );
        let prompt = build(&nested, true, Specialization::General);
        assert!(prompt.contains("## Project Context"));
        assert!(prompt.contains("PROJECT_RULES_LOADED"));
    }

    #[test]
    fn oversized_project_context_is_truncated() {
        let dir = TempDir::new().unwrap();
        let big = "x".repeat(PROJECT_CONTEXT_MAX_CHARS + 100);
        std::fs::write(dir.path().join(PROJECT_CONTEXT_FILE), &big).unwrap();
        let prompt = build(dir.path(), true, Specialization::General);
        assert!(prompt.contains("[... truncated at 20000 chars"));
        assert!(!prompt.contains(&big));
    }

    #[test]
    fn custom_section_is_appended() {
        struct Marker;
        impl PromptSection for Marker {
            fn name(&self) -> &str {
                "marker"
            }
            fn build(&self, _ctx: &PromptContext<'_>) -> Result<String> {
                Ok("CUSTOM_SECTION".into())
            }
        }

        let dir = TempDir::new().unwrap();
        let tools = registry(dir.path());
        let ctx = PromptContext {
            workspace_dir: dir.path(),
            model_name: "m",
            tools: &tools,
            native_tools: true,
            specialization: Specialization::General,
        };
        let prompt = SystemPromptBuilder::default()
            .add_section(Box::new(Marker))
            .build(&ctx)
            .unwrap();
        assert_eq!(prompt, "CUSTOM_SECTION\n\n");
    }
}
