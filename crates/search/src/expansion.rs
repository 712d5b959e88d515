//! Synonym and acronym expansion for the lexical channel
//!
//! Vector search already matches on meaning, but BM25 only sees surface
//! terms, so the lexical query is widened with known aliases
//! (`k8s` -> `kubernetes`, `postgres` -> `postgresql`). At most
//! [`MAX_ADDED_TERMS`] aliases are appended and terms already present in the
//! query are never repeated.

use kas_common::cache::Operation;
use kas_common::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Aliases appended to one query
pub const MAX_ADDED_TERMS: usize = 5;

/// Primary term and its aliases, all lowercase
const SYNONYMS: &[(&str, &[&str])] = &[
    // Programming languages
    ("python", &["py", "python3"]),
    ("javascript", &["js", "ecmascript", "es6", "es2015"]),
    ("typescript", &["ts"]),
    ("golang", &["go"]),
    ("rust", &["rustlang"]),
    // Python frameworks
    ("fastapi", &["fast api", "starlette"]),
    ("sqlalchemy", &["sql alchemy"]),
    ("langchain", &["lang chain"]),
    ("llamaindex", &["llama index", "llama-index"]),
    // JavaScript frameworks
    ("nextjs", &["next.js", "next js", "next"]),
    ("react", &["reactjs", "react.js"]),
    ("vue", &["vuejs", "vue.js"]),
    ("angular", &["angularjs"]),
    ("svelte", &["sveltekit"]),
    ("nodejs", &["node.js", "node"]),
    // Databases
    ("postgresql", &["postgres", "psql", "pg"]),
    ("mongodb", &["mongo"]),
    ("elasticsearch", &["elastic", "es"]),
    ("sqlite", &["sqlite3"]),
    ("mysql", &["mariadb"]),
    // AI / ML
    ("llm", &["large language model", "language model"]),
    ("rag", &["retrieval augmented generation", "retrieval-augmented"]),
    ("embedding", &["embeddings", "vector embedding", "text embedding"]),
    ("vector", &["vectors", "vector search", "similarity search"]),
    ("semantic", &["semantic search", "meaning-based"]),
    ("transformer", &["transformers", "attention"]),
    ("fine-tuning", &["finetuning", "fine tuning"]),
    ("prompt", &["prompting", "prompt engineering"]),
    ("claude", &["anthropic", "claude ai"]),
    ("mcp", &["model context protocol", "context protocol"]),
    ("tool use", &["function calling", "tool calling", "tools"]),
    // DevOps
    ("docker", &["container", "containerization"]),
    ("kubernetes", &["k8s", "kube"]),
    ("ci/cd", &["cicd", "ci cd", "continuous integration", "continuous deployment"]),
    ("github actions", &["gh actions", "gha"]),
    // Concepts
    ("api", &["rest api", "restful", "endpoint"]),
    ("authentication", &["auth", "authn", "login"]),
    ("authorization", &["authz", "permissions", "access control"]),
    ("dependency injection", &["di", "ioc", "inversion of control"]),
    ("async", &["asynchronous", "await", "asyncio"]),
    ("orm", &["object relational mapping"]),
    ("crud", &["create read update delete"]),
    ("cache", &["caching", "cached"]),
    ("queue", &["message queue", "task queue", "job queue"]),
    // Patterns
    ("repository pattern", &["repo pattern"]),
    ("factory pattern", &["factory"]),
    ("singleton", &["singleton pattern"]),
    ("observer", &["observer pattern", "pub sub", "pubsub"]),
    // Testing
    ("unit test", &["unittest", "unit testing"]),
    ("integration test", &["integration testing"]),
    ("e2e", &["end to end", "end-to-end", "e2e test"]),
    // Abbreviations
    ("config", &["configuration", "settings"]),
    ("env", &["environment", "environment variables"]),
    ("db", &["database"]),
    ("repo", &["repository"]),
    ("func", &["function"]),
    ("arg", &["argument", "parameter"]),
    ("var", &["variable"]),
    ("const", &["constant"]),
    ("impl", &["implementation"]),
    ("init", &["initialize", "initialization"]),
    ("msg", &["message"]),
    ("req", &["request"]),
    ("res", &["response"]),
    ("err", &["error"]),
    ("exc", &["exception"]),
];

static FORWARD: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| SYNONYMS.iter().copied().collect());

/// Alias to primary; an alias listed under two primaries maps to the later one
static REVERSE: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    SYNONYMS
        .iter()
        .flat_map(|(primary, aliases)| aliases.iter().map(move |alias| (*alias, *primary)))
        .collect()
});

/// Outcome of expanding one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedQuery {
    pub original: String,
    /// Original query followed by the added terms
    pub expanded: String,
    pub terms_added: Vec<String>,
    pub expansion_applied: bool,
}

impl ExpandedQuery {
    pub fn unchanged(query: &str) -> Self {
        Self {
            original: query.to_string(),
            expanded: query.to_string(),
            terms_added: Vec::new(),
            expansion_applied: false,
        }
    }
}

fn strip_edges(term: &str) -> &str {
    term.trim_matches(|c: char| !c.is_alphanumeric())
}

/// Single tokens plus every 2- and 3-word window
fn extract_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':'))
        .map(strip_edges)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    for i in 0..words.len() {
        for width in [2, 3] {
            if let Some(window) = words.get(i..i + width) {
                terms.push(strip_edges(&window.join(" ")).to_string());
            }
        }
    }
    terms
}

/// Related terms for one term, excluding the term itself
pub fn expand_term(term: &str) -> Vec<&'static str> {
    let normalized = term.trim().to_lowercase();
    let mut related: Vec<&'static str> = Vec::new();

    if let Some(aliases) = FORWARD.get(normalized.as_str()) {
        related.extend(aliases.iter().copied());
    }

    if let Some(primary) = REVERSE.get(normalized.as_str()) {
        if *primary != normalized {
            related.push(primary);
        }
        if let Some(aliases) = FORWARD.get(primary) {
            related.extend(aliases.iter().copied().filter(|alias| *alias != normalized));
        }
    }

    let mut seen = Vec::with_capacity(related.len());
    related.retain(|term| {
        let fresh = !seen.contains(term);
        seen.push(*term);
        fresh
    });
    related
}

/// Append known aliases of the query's terms.
///
/// Added terms keep the order in which their source terms appear in the
/// query, so the result is deterministic.
pub fn expand_query(query: &str) -> ExpandedQuery {
    let lower = query.to_lowercase();
    let mut added: Vec<String> = Vec::new();

    for term in extract_terms(query) {
        for candidate in expand_term(&term) {
            if !lower.contains(candidate) && !added.iter().any(|a| a == candidate) {
                added.push(candidate.to_string());
            }
        }
    }
    added.truncate(MAX_ADDED_TERMS);

    if added.is_empty() {
        return ExpandedQuery::unchanged(query);
    }

    ExpandedQuery {
        original: query.to_string(),
        expanded: format!("{} {}", query, added.join(" ")),
        terms_added: added,
        expansion_applied: true,
    }
}

/// [`expand_query`] as a cacheable operation
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryExpander;

#[async_trait::async_trait]
impl Operation for QueryExpander {
    type Input = String;
    type Output = ExpandedQuery;

    fn name(&self) -> &str {
        "synonyms"
    }

    async fn call(&self, query: &String) -> Result<ExpandedQuery> {
        Ok(expand_query(query))
    }
}
