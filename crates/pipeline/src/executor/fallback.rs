//! Deterministic local executor used when no generator service is
//! configured.
//!
//! Output is derived purely from the job parameters and earlier stage
//! outputs, so identical inputs always produce identical journals.

use async_trait::async_trait;
use journal_core::params::{parse_params, ExportParams, GenerationParams};
use serde_json::{json, Value};

use super::{StageContext, StageError, StageExecutor, StageOutput};
use crate::stage::Stage;

/// Entries grouped into one outline section.
const ENTRIES_PER_SECTION: u32 = 7;

/// Approximate entries laid out per page.
const ENTRIES_PER_PAGE: usize = 2;

/// Rotating reflection prompts used for generated entries.
const PROMPT_TEMPLATES: &[&str] = &[
    "What does {theme} mean to you today?",
    "Describe a moment this week when {theme} felt within reach.",
    "Which small habit could bring more {theme} into tomorrow?",
    "Write a letter to yourself about {theme}.",
    "What got in the way of {theme} recently, and what helped?",
    "List three things connected to {theme} you are grateful for.",
    "How would your future self describe your progress with {theme}?",
];

#[derive(Debug, Default)]
pub struct FallbackExecutor;

impl FallbackExecutor {
    pub fn new() -> Self {
        Self
    }

    fn generation_params(ctx: &StageContext) -> Result<GenerationParams, StageError> {
        parse_params(&ctx.parameters).map_err(|e| StageError::Failed(e.to_string()))
    }

    fn theme_analysis(ctx: &StageContext) -> Result<StageOutput, StageError> {
        let params = Self::generation_params(ctx)?;
        let keywords: Vec<String> = params
            .theme
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();
        Ok(StageOutput::data(json!({
            "theme": params.theme.trim(),
            "style": params.style(),
            "keywords": keywords,
            "tone": format!("{} and reflective", params.style()),
        })))
    }

    fn title_generation(ctx: &StageContext) -> Result<StageOutput, StageError> {
        let params = Self::generation_params(ctx)?;
        let title = match &params.title {
            Some(title) => title.clone(),
            None => format!(
                "{}: A {}-Day {} Journal",
                capitalize(params.theme.trim()),
                params.entry_count(),
                capitalize(params.style()),
            ),
        };
        Ok(StageOutput::data(json!({ "title": title })))
    }

    fn outline(ctx: &StageContext) -> Result<StageOutput, StageError> {
        let params = Self::generation_params(ctx)?;
        let count = params.entry_count();
        let sections: Vec<Value> = (0..count.div_ceil(ENTRIES_PER_SECTION))
            .map(|i| {
                let first = i * ENTRIES_PER_SECTION + 1;
                let last = ((i + 1) * ENTRIES_PER_SECTION).min(count);
                json!({
                    "heading": format!("Part {}", i + 1),
                    "first_entry": first,
                    "last_entry": last,
                })
            })
            .collect();
        Ok(StageOutput::data(json!({ "sections": sections })))
    }

    fn content_writing(ctx: &StageContext) -> Result<StageOutput, StageError> {
        let params = Self::generation_params(ctx)?;
        let theme = params.theme.trim().to_lowercase();
        let entries: Vec<Value> = (0..params.entry_count())
            .map(|i| {
                let template = PROMPT_TEMPLATES[i as usize % PROMPT_TEMPLATES.len()];
                json!({
                    "day": i + 1,
                    "prompt": template.replace("{theme}", &theme),
                })
            })
            .collect();
        Ok(StageOutput::data(json!({ "entries": entries })))
    }

    fn editing(ctx: &StageContext) -> Result<StageOutput, StageError> {
        let drafted = ctx
            .output("content_writing")
            .and_then(|o| o.get("entries"))
            .and_then(Value::as_array)
            .ok_or_else(|| StageError::Failed("no drafted entries to edit".into()))?;
        let entries: Vec<Value> = drafted
            .iter()
            .map(|entry| {
                let mut edited = entry.clone();
                if let Some(prompt) = entry.get("prompt").and_then(Value::as_str) {
                    edited["prompt"] = Value::String(prompt.trim().to_string());
                }
                edited
            })
            .collect();
        Ok(StageOutput::data(json!({
            "entries": entries,
            "revisions": 0,
        })))
    }

    fn media_prompts(ctx: &StageContext) -> Result<StageOutput, StageError> {
        let params = Self::generation_params(ctx)?;
        Ok(StageOutput::data(json!({
            "cover": format!(
                "A calm {} illustration evoking {}",
                params.style(),
                params.theme.trim()
            ),
            "section_art": format!("Minimal line art about {}", params.theme.trim()),
        })))
    }

    fn source_validation(ctx: &StageContext) -> Result<StageOutput, StageError> {
        let project = ctx
            .source_project
            .as_ref()
            .ok_or_else(|| StageError::Failed("source project is not available".into()))?;
        let entry_count = project
            .content
            .get("entries")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        Ok(StageOutput::data(json!({
            "project_id": project.id,
            "title": project.title,
            "entry_count": entry_count,
        })))
    }

    fn layout(ctx: &StageContext) -> Result<StageOutput, StageError> {
        let params: ExportParams =
            parse_params(&ctx.parameters).map_err(|e| StageError::Failed(e.to_string()))?;
        let entries = ctx
            .output("source_validation")
            .and_then(|o| o.get("entry_count"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        // Title page plus entry pages.
        let page_count = 1 + entries.div_ceil(ENTRIES_PER_PAGE);
        Ok(StageOutput::data(json!({
            "format": params.format.as_str(),
            "trim_size": params.trim_size.as_deref().unwrap_or("6x9"),
            "page_count": page_count,
        })))
    }

    fn rendering(ctx: &StageContext) -> Result<StageOutput, StageError> {
        let project = ctx
            .source_project
            .as_ref()
            .ok_or_else(|| StageError::Failed("source project is not available".into()))?;
        let params: ExportParams =
            parse_params(&ctx.parameters).map_err(|e| StageError::Failed(e.to_string()))?;

        let mut document = format!("{}\n\n", project.title);
        if let Some(entries) = project.content.get("entries").and_then(Value::as_array) {
            for entry in entries {
                let day = entry.get("day").and_then(Value::as_u64).unwrap_or(0);
                let prompt = entry.get("prompt").and_then(Value::as_str).unwrap_or("");
                document.push_str(&format!("Day {day}\n{prompt}\n\n"));
            }
        }

        let bytes = document.into_bytes();
        Ok(StageOutput::data(json!({
            "format": params.format.as_str(),
            "mime_type": params.format.mime_type(),
            "size_bytes": bytes.len(),
        }))
        .with_bytes(bytes))
    }
}

#[async_trait]
impl StageExecutor for FallbackExecutor {
    async fn execute(&self, stage: &Stage, ctx: &StageContext) -> Result<StageOutput, StageError> {
        match stage.name {
            "theme_analysis" => Self::theme_analysis(ctx),
            "title_generation" => Self::title_generation(ctx),
            "outline" => Self::outline(ctx),
            "content_writing" => Self::content_writing(ctx),
            "editing" => Self::editing(ctx),
            "media_prompts" => Self::media_prompts(ctx),
            "source_validation" => Self::source_validation(ctx),
            "layout" => Self::layout(ctx),
            "rendering" => Self::rendering(ctx),
            other => Err(StageError::Failed(format!(
                "no fallback available for stage '{other}'"
            ))),
        }
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
