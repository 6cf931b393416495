//! Shared per-turn context
//!
//! Builds the single system prompt every backend in a turn receives, from an
//! optional user-authored guidance text and optional web search snippets.
//! [`compose`] is a pure function of its inputs so that all backends in a
//! turn see byte-identical context.

use crate::providers::SearchClient;
use serde::{Deserialize, Serialize};

/// Header placed at the top of every composed system prompt
pub const CONTEXT_HEADER: &str =
    "You are one of several assistants answering the same prompt side by side.";

/// One web search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSnippet {
    /// Page title
    pub title: String,
    /// Extracted text
    pub snippet: String,
    /// Source URL
    pub url: String,
}

/// Context shared verbatim by every job of a turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnContext {
    /// User-authored guidance, if any
    pub guidance_text: Option<String>,
    /// Search results, if a search ran and returned something
    pub search_snippets: Option<Vec<SearchSnippet>>,
    /// Rendered system prompt (None when there is nothing to say)
    pub composed_system_prompt: Option<String>,
}

impl TurnContext {
    /// Build a context from guidance and snippets
    pub fn new(guidance_text: Option<String>, search_snippets: Option<Vec<SearchSnippet>>) -> Self {
        let guidance_text = guidance_text
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty());
        let search_snippets = search_snippets.filter(|s| !s.is_empty());
        let composed_system_prompt = compose(
            CONTEXT_HEADER,
            guidance_text.as_deref(),
            search_snippets.as_deref(),
        );

        Self {
            guidance_text,
            search_snippets,
            composed_system_prompt,
        }
    }
}

/// Render the system prompt
///
/// Returns `None` when there is neither guidance nor snippets.
///
/// # Examples
///
/// ```
/// use coro::context::{compose, SearchSnippet};
///
/// let snippets = vec![SearchSnippet {
///     title: "Rust 1.80".to_string(),
///     snippet: "Released today".to_string(),
///     url: "https://blog.rust-lang.org".to_string(),
/// }];
/// let prompt = compose("Header", Some("Be brief"), Some(&snippets)).unwrap();
/// assert!(prompt.contains("[S1] Rust 1.80"));
/// assert!(prompt.find("Be brief").unwrap() < prompt.find("[S1]").unwrap());
/// assert!(compose("Header", None, None).is_none());
/// ```
pub fn compose(
    header: &str,
    guidance: Option<&str>,
    snippets: Option<&[SearchSnippet]>,
) -> Option<String> {
    let guidance = guidance.map(str::trim).filter(|g| !g.is_empty());
    let snippets = snippets.filter(|s| !s.is_empty());

    if guidance.is_none() && snippets.is_none() {
        return None;
    }

    let mut sections = vec![header.trim().to_string()];

    if let Some(guidance) = guidance {
        sections.push(format!("User guidance:\n{}", guidance));
    }

    if let Some(snippets) = snippets {
        let mut block = String::from(
            "Web search results (cite them as [S1], [S2], ... when you rely on them):",
        );
        for (idx, s) in snippets.iter().enumerate() {
            block.push_str(&format!(
                "\n\n[S{}] {}\n{}\nSource: {}",
                idx + 1,
                s.title.trim(),
                s.snippet.trim(),
                s.url.trim()
            ));
        }
        sections.push(block);
    }

    Some(sections.join("\n\n"))
}

/// Heuristic for prompts that likely need fresh web context
///
/// # Examples
///
/// ```
/// use coro::context::should_search_for_query;
///
/// assert!(should_search_for_query("What's the latest on the Mars mission?"));
/// assert!(!should_search_for_query("Explain ownership in Rust"));
/// ```
pub fn should_search_for_query(query: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "latest", "recent", "today", "current", "breaking", "news", "update", "launched",
        "released", "price", "cost", "weather", "stock", "score", "result", "statistics",
        "trend", "vs", "versus", "compare", "review", "2024", "2025", "this week", "this month",
    ];
    const PATTERNS: &[&str] = &["what happened", "what's new", "tell me about", "who won"];

    let lowered = query.to_lowercase();

    if let Some(keyword) = KEYWORDS.iter().find(|k| lowered.contains(*k)) {
        tracing::info!(keyword = keyword, "Search triggered by keyword");
        return true;
    }

    if let Some(pattern) = PATTERNS.iter().find(|p| lowered.contains(*p)) {
        tracing::info!(pattern = pattern, "Search triggered by pattern");
        return true;
    }

    false
}

/// Resolves the per-turn context, remembering the last search
///
/// A search runs only when it is requested and the query differs from the
/// last successfully executed one. Failed searches degrade to "no snippets"
/// and are not remembered, so the next turn tries again.
#[derive(Debug, Default)]
pub struct ContextComposer {
    last_query: Option<String>,
    last_snippets: Vec<SearchSnippet>,
}

impl ContextComposer {
    /// Creates a composer with no search history
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the context for one dispatch round
    ///
    /// # Arguments
    ///
    /// * `query` - Text to search for (the prompt being sent)
    /// * `guidance` - Optional user guidance
    /// * `search_requested` - Whether this round wants web results
    /// * `search` - Search collaborator, if one is configured
    pub async fn resolve(
        &mut self,
        query: &str,
        guidance: Option<&str>,
        search_requested: bool,
        search: Option<&dyn SearchClient>,
    ) -> TurnContext {
        let snippets = match (search_requested, search) {
            (true, Some(client)) => self.snippets_for(query, client).await,
            _ => Vec::new(),
        };

        TurnContext::new(guidance.map(str::to_string), Some(snippets))
    }

    async fn snippets_for(&mut self, query: &str, client: &dyn SearchClient) -> Vec<SearchSnippet> {
        let query = query.trim();
        if self.last_query.as_deref() == Some(query) {
            tracing::debug!("Reusing search results for unchanged query");
            return self.last_snippets.clone();
        }

        match client.search(query).await {
            Ok(snippets) => {
                tracing::info!(results = snippets.len(), "Web search completed");
                self.last_query = Some(query.to_string());
                self.last_snippets = snippets.clone();
                snippets
            }
            Err(e) => {
                tracing::warn!("Web search failed, continuing without results: {}", e);
                Vec::new()
            }
        }
    }

    /// Forget the remembered search
    pub fn reset(&mut self) {
        self.last_query = None;
        self.last_snippets.clear();
    }
}
