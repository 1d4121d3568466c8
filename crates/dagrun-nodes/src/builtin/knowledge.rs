use std::collections::HashSet;

use serde_json::{json, Value};

use dagrun_core::node::{KnowledgeConfig, KnowledgeDocument};

const SNIPPET_CHARS: usize = 200;

/// Lowercased alphanumeric tokens.
fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Query text: configured query, else a string input, else `input.query`.
fn query_for(config: &KnowledgeConfig, input: &Value) -> String {
    if let Some(q) = &config.query {
        return q.clone();
    }
    match input {
        Value::String(s) => s.clone(),
        other => other
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(SNIPPET_CHARS).collect()
}

/// Rank documents by the number of distinct query tokens they contain.
///
/// Ties keep corpus order; documents sharing no token are dropped.
pub fn search<'a>(
    query: &str,
    documents: &'a [KnowledgeDocument],
    top_k: usize,
) -> Vec<(usize, &'a KnowledgeDocument)> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, usize, &KnowledgeDocument)> = documents
        .iter()
        .enumerate()
        .filter_map(|(pos, doc)| {
            let doc_tokens = tokenize(&format!("{} {}", doc.title, doc.body));
            let score = query_tokens.intersection(&doc_tokens).count();
            (score > 0).then_some((score, pos, doc))
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored
        .into_iter()
        .take(top_k)
        .map(|(score, _, doc)| (score, doc))
        .collect()
}

/// Knowledge lookup node: top-K `{title, snippet, score}` entries.
/// Deterministic, no external calls.
pub fn execute(config: &KnowledgeConfig, corpus: &[KnowledgeDocument], input: &Value) -> Value {
    let documents = config.documents.as_deref().unwrap_or(corpus);
    let query = query_for(config, input);
    let hits: Vec<Value> = search(&query, documents, config.top_k)
        .into_iter()
        .map(|(score, doc)| {
            json!({
                "title": doc.title,
                "snippet": snippet(&doc.body),
                "score": score,
            })
        })
        .collect();
    Value::Array(hits)
}
