//! Offline text handler. Lowest priority, so it only runs once every remote
//! handler for a capability has failed or been skipped.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    capability::{Capabilities, EXTRACT_KEYWORDS, SUMMARIZE},
    handler::{ExecuteResult, Handler, HandlerError, HandlerRequest, HandlerResult, HandlerSource},
    initializer::{HandlerEnv, RegistrationError},
};

const DEFAULT_SENTENCES: u64 = 3;
const DEFAULT_KEYWORDS: u64 = 10;
const MIN_KEYWORD_LEN: usize = 4;

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "because", "been", "before", "being", "between", "both", "could",
    "does", "doing", "down", "during", "each", "from", "further", "have", "having", "here",
    "into", "itself", "just", "more", "most", "only", "other", "over", "same", "should", "some",
    "such", "than", "that", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "under", "until", "very", "were", "what", "when", "where", "which", "while",
    "will", "with", "would", "your",
];

pub struct LocalTextHandler {
    capabilities: Capabilities,
}

impl Default for LocalTextHandler {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::from(&[SUMMARIZE, EXTRACT_KEYWORDS][..]),
        }
    }
}

/// Leading sentences of `text`, at most `limit` of them.
pub fn summarize(text: &str, limit: usize) -> String {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (index, ch) in text.char_indices() {
        if sentences.len() == limit {
            break;
        }
        if matches!(ch, '.' | '!' | '?') {
            let end = index + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    if sentences.len() < limit {
        let rest = text[start..].trim();
        if !rest.is_empty() {
            sentences.push(rest);
        }
    }
    sentences.join(" ")
}

/// Most frequent non-stopword terms; ties keep first-appearance order.
pub fn keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let words = text
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|word| word.trim_matches('-').to_lowercase())
        .filter(|word| word.chars().count() >= MIN_KEYWORD_LEN)
        .filter(|word| !STOPWORDS.contains(&word.as_str()));
    for (position, word) in words.enumerate() {
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
        count_b.cmp(count_a).then(first_a.cmp(first_b))
    });
    ranked
        .into_iter()
        .take(limit)
        .map(|(word, _)| word)
        .collect()
}

#[async_trait]
impl Handler for LocalTextHandler {
    fn id(&self) -> &str {
        "local-text"
    }

    fn name(&self) -> &str {
        "Local Text Tools"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn priority(&self) -> i32 {
        -100
    }

    fn source(&self) -> HandlerSource {
        HandlerSource::Local
    }

    async fn execute(&self, request: HandlerRequest) -> HandlerResult<ExecuteResult> {
        if request.prompt.trim().is_empty() {
            return Err(HandlerError::InvalidRequest("empty input text".to_string()));
        }
        let data = match request.capability.as_str() {
            SUMMARIZE => {
                let limit = request.param_u64("sentences").unwrap_or(DEFAULT_SENTENCES);
                json!({ "text": summarize(&request.prompt, limit as usize) })
            }
            EXTRACT_KEYWORDS => {
                let limit = request.param_u64("count").unwrap_or(DEFAULT_KEYWORDS);
                Value::from(keywords(&request.prompt, limit as usize))
            }
            other => return Err(HandlerError::NotExecutable(other.to_string())),
        };
        Ok(ExecuteResult::success(data))
    }
}

pub fn build(_env: &HandlerEnv) -> Result<Arc<dyn Handler>, RegistrationError> {
    Ok(Arc::new(LocalTextHandler::default()))
}
