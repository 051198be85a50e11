//! Prompt enhancement through a completion provider
//!
//! The model rewrites the prompt and grades it; the grades are taken as
//! returned apart from clamping into 0..=100.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::providers::{ChatMessage, CompletionOptions, CompletionProvider};

pub const DEFAULT_MODEL: &str = "anthropic/claude-3.5-sonnet";
pub const DEFAULT_MODE: &str = "standard";

const SYSTEM_PROMPT: &str = r#"You are an expert prompt engineer. Your task is to transform a basic user prompt into a high-performance, optimized prompt for leading AI models.

When enhancing a prompt, you must:
1. Identify the core intent and category.
2. Add clear objectives, context, and role-playing if necessary.
3. Include specific constraints and formatting requirements.
4. Add few-shot examples if appropriate.
5. Use chain-of-thought or other advanced prompting techniques.
6. Provide a benchmark score (0-100) based on clarity, specificity, context, and structure.
7. Suggest 3-5 relevant tags.

You MUST return a JSON object with the following structure:
{
  "enhanced_prompt": "string",
  "benchmark_score": number,
  "intent_category": "string",
  "tags": ["string"],
  "analysis_result": {
    "score": number,
    "clarity": number,
    "specificity": number,
    "context": number,
    "structure": number
  }
}

Do not include any other text in your response, only the JSON object."#;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhanceRequest {
    pub prompt: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub ultra_mode: bool,
}

impl EnhanceRequest {
    pub fn mode(&self) -> &str {
        self.mode
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_MODE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScoreBreakdown {
    pub score: u32,
    pub clarity: u32,
    pub specificity: u32,
    pub context: u32,
    pub structure: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnhancementResult {
    pub enhanced_prompt: String,
    pub benchmark_score: u32,
    pub intent_category: Option<String>,
    pub tags: Vec<String>,
    pub analysis_result: ScoreBreakdown,
}

/// Reply as the model sends it; numbers may be fractional or out of range
#[derive(Deserialize)]
struct RawEnhancement {
    enhanced_prompt: String,
    #[serde(default)]
    benchmark_score: Option<f64>,
    #[serde(default)]
    intent_category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    analysis_result: Option<RawBreakdown>,
}

#[derive(Deserialize, Default)]
struct RawBreakdown {
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    clarity: f64,
    #[serde(default)]
    specificity: f64,
    #[serde(default)]
    context: f64,
    #[serde(default)]
    structure: f64,
}

fn clamp_score(value: f64) -> u32 {
    if value.is_nan() {
        0
    } else {
        value.round().clamp(0.0, 100.0) as u32
    }
}

pub fn build_user_message(request: &EnhanceRequest) -> String {
    format!(
        "Enhance this prompt using {} mode{}: \"{}\"",
        request.mode(),
        if request.ultra_mode {
            " with Ultra enhancement"
        } else {
            ""
        },
        request.prompt
    )
}

/// Parse the model reply, tolerating a Markdown code fence around the JSON.
pub fn parse_enhancement(content: &str) -> Result<EnhancementResult> {
    let fence = Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$")?;
    let json = fence
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| content.trim());

    let raw: RawEnhancement =
        serde_json::from_str(json).context("Model reply is not the expected JSON object")?;

    let breakdown = raw.analysis_result.unwrap_or_default();
    let benchmark_score = raw
        .benchmark_score
        .or(breakdown.score)
        .map(clamp_score)
        .unwrap_or(0);

    Ok(EnhancementResult {
        enhanced_prompt: raw.enhanced_prompt,
        benchmark_score,
        intent_category: raw.intent_category.filter(|c| !c.trim().is_empty()),
        tags: raw
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        analysis_result: ScoreBreakdown {
            score: breakdown.score.map(clamp_score).unwrap_or(benchmark_score),
            clarity: clamp_score(breakdown.clarity),
            specificity: clamp_score(breakdown.specificity),
            context: clamp_score(breakdown.context),
            structure: clamp_score(breakdown.structure),
        },
    })
}

pub async fn enhance(
    provider: &dyn CompletionProvider,
    request: &EnhanceRequest,
) -> Result<EnhancementResult> {
    if request.prompt.trim().is_empty() {
        anyhow::bail!("Prompt is empty");
    }

    let messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(build_user_message(request)),
    ];
    let options = CompletionOptions {
        model: request.model.clone(),
        json_mode: true,
        max_tokens: None,
    };

    tracing::info!(
        "Enhancing prompt with {} ({} mode, ultra: {})",
        provider.name(),
        request.mode(),
        request.ultra_mode
    );

    let content = provider.chat(messages, &options).await?;
    parse_enhancement(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const REPLY: &str = r#"{
        "enhanced_prompt": "You are a senior Rust reviewer...",
        "benchmark_score": 87,
        "intent_category": "Code Review",
        "tags": ["rust", " review ", ""],
        "analysis_result": { "score": 87, "clarity": 90, "specificity": 84.6, "context": 80, "structure": 95 }
    }"#;

    struct FixedProvider {
        reply: String,
        seen: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl CompletionProvider for FixedProvider {
        async fn chat(&self, messages: Vec<ChatMessage>, options: &CompletionOptions) -> Result<String> {
            assert!(options.json_mode);
            *self.seen.lock().unwrap() = messages;
            Ok(self.reply.clone())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn request(prompt: &str) -> EnhanceRequest {
        EnhanceRequest {
            prompt: prompt.to_string(),
            mode: None,
            model: None,
            ultra_mode: false,
        }
    }

    #[test]
    fn test_user_message() {
        assert_eq!(
            build_user_message(&request("review my code")),
            "Enhance this prompt using standard mode: \"review my code\""
        );

        let ultra = EnhanceRequest {
            mode: Some("creative".to_string()),
            ultra_mode: true,
            ..request("write a poem")
        };
        assert_eq!(
            build_user_message(&ultra),
            "Enhance this prompt using creative mode with Ultra enhancement: \"write a poem\""
        );
    }

    #[test]
    fn test_parse_enhancement() {
        let result = parse_enhancement(REPLY).unwrap();
        assert_eq!(result.benchmark_score, 87);
        assert_eq!(result.intent_category.as_deref(), Some("Code Review"));
        assert_eq!(result.tags, vec!["rust", "review"]);
        assert_eq!(result.analysis_result.specificity, 85);
        assert_eq!(result.analysis_result.structure, 95);
    }

    #[test]
    fn test_parse_fenced_reply() {
        let fenced = format!("```json\n{}\n```", REPLY);
        let result = parse_enhancement(&fenced).unwrap();
        assert_eq!(result.benchmark_score, 87);
    }

    #[test]
    fn test_scores_are_clamped() {
        let result = parse_enhancement(
            r#"{ "enhanced_prompt": "x", "benchmark_score": 140, "analysis_result": { "clarity": -5 } }"#,
        )
        .unwrap();
        assert_eq!(result.benchmark_score, 100);
        assert_eq!(result.analysis_result.score, 100);
        assert_eq!(result.analysis_result.clarity, 0);
        assert!(result.tags.is_empty());
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_enhancement("Sure! Here is your prompt.").is_err());
    }

    #[tokio::test]
    async fn test_enhance_sends_system_prompt() {
        let provider = FixedProvider {
            reply: REPLY.to_string(),
            seen: Mutex::new(Vec::new()),
        };
        let result = enhance(&provider, &request("review my code")).await.unwrap();
        assert_eq!(result.benchmark_score, 87);

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].role, "system");
        assert!(seen[0].content.contains("benchmark_score"));
        assert_eq!(seen[1].role, "user");
    }

    #[tokio::test]
    async fn test_enhance_rejects_empty_prompt() {
        let provider = FixedProvider {
            reply: REPLY.to_string(),
            seen: Mutex::new(Vec::new()),
        };
        assert!(enhance(&provider, &request("   ")).await.is_err());
        assert!(provider.seen.lock().unwrap().is_empty());
    }
}
