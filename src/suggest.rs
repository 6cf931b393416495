//! Backend suggestions
//!
//! Classifies a query by keyword and recommends backends known to do well on
//! that kind of question.

use crate::catalog::BackendCatalog;
use serde::Serialize;

/// Coarse query category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Code,
    Math,
    Creative,
    Analysis,
    News,
    General,
    Technical,
    Comparison,
}

impl QueryType {
    /// Backends that excel at this category, best first
    pub fn specialists(self) -> &'static [&'static str] {
        match self {
            Self::Code => &["mixtral", "llama-70b"],
            Self::Math => &["deepseek", "llama-70b"],
            Self::Creative => &["gemini", "llama-70b"],
            Self::Analysis => &["llama-70b", "deepseek"],
            Self::News => &["gemini"],
            Self::General => &["gemini", "llama-70b", "llama-8b"],
            Self::Technical => &["llama-70b", "deepseek"],
            Self::Comparison => &["llama-70b", "gemini"],
        }
    }

    /// Why a specialist is recommended
    pub fn reason(self) -> &'static str {
        match self {
            Self::Code => "excels at code generation and debugging",
            Self::Math => "specializes in mathematical reasoning",
            Self::Creative => "great for creative and expressive writing",
            Self::Analysis => "provides deep analytical insights",
            Self::News => "works best with web-augmented context",
            Self::General => "offers comprehensive general knowledge",
            Self::Technical => "excels at technical explanations",
            Self::Comparison => "provides balanced comparative analysis",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Code => "code",
            Self::Math => "math",
            Self::Creative => "creative",
            Self::Analysis => "analysis",
            Self::News => "news",
            Self::General => "general",
            Self::Technical => "technical",
            Self::Comparison => "comparison",
        };
        write!(f, "{}", name)
    }
}

const CODE_KEYWORDS: &[&str] = &[
    "code", "function", "debug", "implement", "algorithm", "write a", "programming", "script",
    "bug", "error", "python", "javascript", "swift", "java", "rust", "go", "class", "method",
    "variable", "loop", "array",
];

const MATH_KEYWORDS: &[&str] = &[
    "calculate", "equation", "solve", "math", "formula", "derivative", "integral", "probability",
    "statistics", "proof", "theorem", "algebra", "geometry",
];

const CREATIVE_KEYWORDS: &[&str] = &[
    "write", "story", "poem", "essay", "creative", "imagine", "describe", "explain like", "eli5",
    "metaphor", "analogy",
];

const COMPARISON_KEYWORDS: &[&str] = &[
    "vs", "versus", "compare", "difference between", "which is better", "should i use",
];

const NEWS_KEYWORDS: &[&str] = &[
    "news", "latest", "recent", "today", "this week", "what happened", "announced", "breaking",
];

const TECHNICAL_KEYWORDS: &[&str] = &[
    "how does", "explain", "technical", "architecture", "system", "infrastructure", "protocol",
    "mechanism",
];

const ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze", "compare", "evaluate", "assess", "critique", "pros and cons", "advantages",
    "disadvantages", "trade-offs",
];

/// Checked in order; the first list with a hit wins
const RULES: &[(QueryType, &[&str])] = &[
    (QueryType::Code, CODE_KEYWORDS),
    (QueryType::Math, MATH_KEYWORDS),
    (QueryType::Creative, CREATIVE_KEYWORDS),
    (QueryType::Comparison, COMPARISON_KEYWORDS),
    (QueryType::News, NEWS_KEYWORDS),
    (QueryType::Technical, TECHNICAL_KEYWORDS),
    (QueryType::Analysis, ANALYSIS_KEYWORDS),
];

/// Classify a query by substring keyword match
///
/// # Examples
///
/// ```
/// use coro::suggest::{classify_query, QueryType};
///
/// assert_eq!(classify_query("Solve this equation"), QueryType::Math);
/// assert_eq!(classify_query("Hello there"), QueryType::General);
/// ```
pub fn classify_query(query: &str) -> QueryType {
    let lower = query.to_lowercase();
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(kind, _)| *kind)
        .unwrap_or(QueryType::General)
}

/// One recommended backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    /// Backend id
    pub backend_id: String,
    /// Display name from the catalog (the id when unknown)
    pub display_name: String,
    /// Why it fits the query
    pub reason: String,
    /// 0.5 to 1.0, decreasing with specialist rank
    pub confidence: f32,
}

/// Suggest specialists the user has not selected yet
pub fn suggest_models(
    catalog: &BackendCatalog,
    query: &str,
    selected: &[String],
    max_suggestions: usize,
) -> Vec<Suggestion> {
    let query_type = classify_query(query);
    tracing::info!(query.kind = %query_type, "Classified query");

    query_type
        .specialists()
        .iter()
        .enumerate()
        .filter(|(_, id)| !selected.iter().any(|s| s == *id))
        .take(max_suggestions)
        .map(|(rank, id)| Suggestion {
            backend_id: id.to_string(),
            display_name: catalog.display_name(id).to_string(),
            reason: query_type.reason().to_string(),
            confidence: (1.0 - 0.2 * rank as f32).max(0.5),
        })
        .collect()
}

/// A default three-backend set for a query
pub fn optimal_model_set(query: &str) -> Vec<String> {
    let specialists: Vec<String> = classify_query(query)
        .specialists()
        .iter()
        .map(|s| s.to_string())
        .collect();

    match specialists.len() {
        n if n >= 3 => specialists.into_iter().take(3).collect(),
        2 => {
            let mut set = specialists;
            set.push("llama-8b".to_string());
            set
        }
        _ => {
            let mut set = specialists;
            set.extend(["llama-70b".to_string(), "llama-8b".to_string()]);
            set
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::default_catalog;

    #[test]
    fn test_classification_order() {
        assert_eq!(classify_query("Fix this Python bug"), QueryType::Code);
        assert_eq!(classify_query("What is the derivative of x^2"), QueryType::Math);
        assert_eq!(classify_query("Tell me a story"), QueryType::Creative);
        assert_eq!(classify_query("Vim versus Emacs"), QueryType::Comparison);
        assert_eq!(classify_query("Latest headlines"), QueryType::News);
        assert_eq!(classify_query("How does TCP handshake work"), QueryType::Technical);
        assert_eq!(classify_query("Assess the plan"), QueryType::Analysis);
        assert_eq!(classify_query("Hi"), QueryType::General);
    }

    #[test]
    fn test_suggestions_skip_selected() {
        let catalog = default_catalog();
        let suggestions = suggest_models(
            &catalog,
            "Prove this theorem",
            &["deepseek".to_string()],
            2,
        );

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].backend_id, "llama-70b");
        assert!((suggestions[0].confidence - 0.8).abs() < 1e-6);
        assert_eq!(suggestions[0].reason, "specializes in mathematical reasoning");
    }

    #[test]
    fn test_suggestions_respect_max() {
        let catalog = default_catalog();
        let suggestions = suggest_models(&catalog, "Hello", &[], 2);
        let ids: Vec<&str> = suggestions.iter().map(|s| s.backend_id.as_str()).collect();
        assert_eq!(ids, vec!["gemini", "llama-70b"]);
        assert!((suggestions[0].confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_optimal_set_pads_to_three() {
        assert_eq!(optimal_model_set("Hello"), vec!["gemini", "llama-70b", "llama-8b"]);
        assert_eq!(optimal_model_set("Debug my code"), vec!["mixtral", "llama-70b", "llama-8b"]);
        assert_eq!(optimal_model_set("Breaking news"), vec!["gemini", "llama-70b", "llama-8b"]);
    }
}
