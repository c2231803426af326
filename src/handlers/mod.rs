//! Built-in handlers and the factory list the system initializer runs.

pub mod chat_completion;
pub mod gemini;
pub mod image_search;
pub mod local_text;

use reqwest::Url;

use crate::{
    capability::{
        ANALYZE_SEO, DISCOVER_TRENDS, EXTRACT_KEYWORDS, GENERATE_ARTICLE, GENERATE_CONTENT,
        RESEARCH, REWRITE_CONTENT, SUMMARIZE, TRANSLATE,
    },
    handler::HandlerRequest,
    initializer::{HandlerFactory, RegistrationError},
};

/// Capabilities every general purpose text model can serve.
pub const TEXT_CAPABILITIES: &[&str] = &[
    GENERATE_ARTICLE,
    GENERATE_CONTENT,
    REWRITE_CONTENT,
    SUMMARIZE,
    TRANSLATE,
    EXTRACT_KEYWORDS,
    ANALYZE_SEO,
];

pub fn builtin_factories() -> Vec<HandlerFactory> {
    vec![
        HandlerFactory::new("gemini", gemini::build),
        HandlerFactory::new("openai-chat", chat_completion::build_openai),
        HandlerFactory::new("deepseek-chat", chat_completion::build_deepseek),
        HandlerFactory::new("openrouter-chat", chat_completion::build_openrouter),
        HandlerFactory::new("perplexity-research", chat_completion::build_perplexity),
        HandlerFactory::new("unsplash-images", image_search::build_unsplash),
        HandlerFactory::new("pexels-images", image_search::build_pexels),
        HandlerFactory::new("local-text", local_text::build),
    ]
}

/// Base URL without a trailing slash, or the registration error.
pub(crate) fn endpoint_url(handler: &str, url: &str) -> Result<String, RegistrationError> {
    Url::parse(url).map_err(|_| RegistrationError::InvalidEndpoint {
        handler: handler.to_string(),
        url: url.to_string(),
    })?;
    Ok(url.trim_end_matches('/').to_string())
}

/// System instruction for a text capability.
pub(crate) fn instructions(request: &HandlerRequest) -> String {
    match request.capability.as_str() {
        GENERATE_ARTICLE => "Write a well structured long-form article in Markdown with \
            headings, an introduction and a conclusion."
            .to_string(),
        GENERATE_CONTENT => "Write concise, engaging web content for the request.".to_string(),
        REWRITE_CONTENT => {
            "Rewrite the text to be clearer and more engaging. Keep the meaning.".to_string()
        }
        SUMMARIZE => "Summarize the text in a few sentences.".to_string(),
        TRANSLATE => format!(
            "Translate the text into {}. Return only the translation.",
            request.param_str("target_language").unwrap_or("English")
        ),
        EXTRACT_KEYWORDS => "List the most relevant SEO keywords for the text, \
            one per line, without numbering."
            .to_string(),
        ANALYZE_SEO => "Analyze the content for SEO. Report title, headings, keyword \
            usage and concrete improvements."
            .to_string(),
        RESEARCH => "Research the topic and report key facts with sources.".to_string(),
        DISCOVER_TRENDS => {
            "List currently trending topics for the subject with a short note on each."
                .to_string()
        }
        other => format!("Perform the task '{}' for the request.", other),
    }
}

/// Model output lines as a JSON array, for capabilities returning lists.
pub(crate) fn lines_payload(text: &str) -> serde_json::Value {
    serde_json::Value::Array(
        text.lines()
            .map(|line| line.trim().trim_start_matches(['-', '*', '•']).trim())
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::Value::String(line.to_string()))
            .collect(),
    )
}
