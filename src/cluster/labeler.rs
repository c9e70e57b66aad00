//! Cluster naming: frequent non-stopword tokens from member headings, with
//! an optional LLM adapter for nicer names.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::search::text::is_cjk_letter;

/// Function words plus markdown/code noise common in CS note corpora.
const STOPWORDS: &[&str] = &[
    // common English
    "the", "a", "an", "and", "or", "to", "of", "in", "for", "on", "with", "as", "is", "are",
    "be", "this", "that", "it", "we", "you", "they", "at", "by", "from", "not", "can", "will",
    // markdown noise
    "md", "markdown", "toc", "readme", "https", "http", "www", "url",
    // code noise
    "int", "long", "float", "double", "string", "char", "bool", "void", "return", "new",
    "null", "true", "false", "public", "private", "static", "class", "interface", "import",
    "def", "var", "let", "const", "if", "else", "for", "while", "break", "continue", "try",
    "catch", "throw", "node", "head", "next", "id",
];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

fn is_noise_label(token: &str) -> bool {
    token.len() < 2
        || token.chars().all(|c| c.is_ascii_digit())
        || is_stopword(token)
}

/// Lowercased word tokens: latin/digit runs of length >= 2 and CJK runs.
pub fn label_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    let mut flush = |buf: &mut String, out: &mut Vec<String>| {
        if !buf.is_empty() {
            let token = buf.to_lowercase();
            if !is_noise_label(&token) {
                out.push(token);
            }
            buf.clear();
        }
    };

    for c in text.chars() {
        if c.is_alphanumeric() || is_cjk_letter(c) {
            current.push(c);
        } else {
            flush(&mut current, &mut tokens);
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

/// Most frequent tokens across the given texts, frequency descending, first
/// appearance breaking ties.
pub fn top_tokens(texts: &[String], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut order = 0usize;

    for text in texts {
        for token in label_tokens(text) {
            let entry = counts.entry(token).or_insert((0, order));
            entry.0 += 1;
            order += 1;
        }
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then_with(|| a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(limit).map(|(t, _)| t).collect()
}

/// Derive `(name, summary)` for a cluster from its representative members.
///
/// Headings are preferred; bodies are the fallback when headings carry no
/// usable tokens. The name is never empty.
pub fn label_cluster(
    cluster_idx: usize,
    headings: &[String],
    bodies: &[String],
) -> (String, Option<String>) {
    let mut picked = top_tokens(headings, 8);
    if picked.is_empty() {
        picked = top_tokens(bodies, 8);
    }

    let name = if picked.is_empty() {
        format!("topic-{cluster_idx}")
    } else {
        picked.iter().take(3).cloned().collect::<Vec<_>>().join(" / ")
    };

    let summary = if picked.is_empty() {
        None
    } else {
        Some(format!("Top keywords: {}", picked.join(", ")))
    };

    (name, summary)
}

/// Optional LLM adapter asked for a short topic name and summary.
pub trait ClusterNamer: Send + Sync {
    fn name_cluster(
        &self,
        top_headings: &[String],
    ) -> anyhow::Result<(String, Option<String>)>;
}

/// OpenAI-protocol chat backend for cluster naming.
pub struct OpenAiNamer {
    base_url: Url,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OpenAiNamer {
    #[inline]
    pub fn new(base_url: &str, api_key: String, model: String) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            api_key,
            model,
        })
    }
}

impl ClusterNamer for OpenAiNamer {
    fn name_cluster(
        &self,
        top_headings: &[String],
    ) -> anyhow::Result<(String, Option<String>)> {
        let url = self.base_url.join("/v1/chat/completions")?;
        let prompt = format!(
            "These are headings of notes that form one topic cluster:\n{}\n\n\
             Reply with a topic name of 2-6 words on the first line and a \
             one-sentence summary on the second line.",
            top_headings.join("\n")
        );

        let request = json!({
            "model": self.model,
            "messages": [ChatMessage { role: "user", content: prompt }],
        });

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .build()
            .into();

        let body = agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .send(&serde_json::to_string(&request)?)
            .and_then(|mut resp| resp.body_mut().read_to_string())?;

        let response: ChatResponse = serde_json::from_str(&body)?;
        let content = response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
        let name = lines.next().unwrap_or_default().to_string();
        let summary = lines.next().map(|s| s.to_string());

        debug!("LLM cluster name: {name}");
        if name.is_empty() {
            anyhow::bail!("LLM returned an empty cluster name");
        }
        Ok((name, summary))
    }
}

#[cfg(test)]
mod labeler_tests {
    use super::*;

    #[test]
    fn tokens_skip_stopwords_and_digits() {
        let tokens = label_tokens("The Linked List 42 of pointers");
        assert_eq!(tokens, vec!["linked", "list", "pointers"]);
    }

    #[test]
    fn cjk_runs_are_tokens() {
        let tokens = label_tokens("计算机网络 basics");
        assert_eq!(tokens, vec!["计算机网络", "basics"]);
    }

    #[test]
    fn top_tokens_by_frequency_then_first_seen() {
        let texts = vec![
            "graph traversal".to_string(),
            "graph theory".to_string(),
            "traversal order".to_string(),
        ];
        let top = top_tokens(&texts, 2);
        assert_eq!(top, vec!["graph", "traversal"]);
    }

    #[test]
    fn label_prefers_headings_then_bodies() {
        let (name, summary) = label_cluster(
            0,
            &["Linked Lists".to_string(), "Linked Structures".to_string()],
            &[],
        );
        assert!(name.starts_with("linked"));
        assert!(summary.unwrap().contains("linked"));

        let (name, _) = label_cluster(3, &[], &["binary trees everywhere".to_string()]);
        assert!(name.contains("binary"));
    }

    #[test]
    fn name_is_never_empty() {
        let (name, summary) = label_cluster(7, &[], &[]);
        assert_eq!(name, "topic-7");
        assert!(summary.is_none());
    }
}
