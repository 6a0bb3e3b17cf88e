use serde_json::json;

use crate::retriever::SearchHit;

/// Default character budget for a grounding context block.
pub const DEFAULT_CONTEXT_CHARS: usize = 4000;

/// Join hit texts with blank lines, keeping at most `max_chars` characters.
///
/// # Examples
///
/// ```
/// use preppal::search::build_context;
///
/// assert_eq!(build_context(&[], 100), "");
/// ```
pub fn build_context(hits: &[SearchHit], max_chars: usize) -> String {
    let joined = hits
        .iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    match joined.char_indices().nth(max_chars) {
        Some((cut, _)) => joined[..cut].to_string(),
        None => joined,
    }
}

/// Append retrieved context to a prompt body. An empty context leaves the
/// body unchanged.
///
/// # Examples
///
/// ```
/// use preppal::search::ground_prompt;
///
/// assert_eq!(ground_prompt("Quiz me", ""), "Quiz me");
/// assert_eq!(
///     ground_prompt("Quiz me", "ATP is energy"),
///     "Quiz me\n\n---\nReference material:\nATP is energy"
/// );
/// ```
pub fn ground_prompt(body: &str, context: &str) -> String {
    if context.is_empty() {
        return body.to_string();
    }
    format!("{body}\n\n---\nReference material:\n{context}")
}

/// Format hits for human-readable terminal output.
pub fn format_human(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, h) in hits.iter().enumerate() {
        println!(
            "{:>3}. [{:.3}] {} ({}) #{}",
            i + 1,
            h.score,
            h.title,
            h.kind,
            h.chunk_index
        );
        println!("     {}", preview(&h.text, 160));
    }
    println!("\n{} result(s)", hits.len());
}

/// Format hits as JSON output.
pub fn format_json(hits: &[SearchHit], query: &str) {
    println!("{}", results_json(hits, query));
}

fn results_json(hits: &[SearchHit], query: &str) -> serde_json::Value {
    json!({
        "query": query,
        "result_count": hits.len(),
        "results": hits,
    })
}

/// First `max_chars` characters of `text` on a single line.
fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::DocumentKind;

    fn hit(text: &str, score: f32) -> SearchHit {
        SearchHit {
            material_id: "m1".to_string(),
            title: "Biology".to_string(),
            kind: DocumentKind::Pdf,
            chunk_index: 0,
            text: text.to_string(),
            score,
        }
    }

    #[test]
    fn context_joins_with_blank_lines() {
        let hits = [hit("first", 0.9), hit("second", 0.8)];
        assert_eq!(build_context(&hits, 4000), "first\n\nsecond");
    }

    #[test]
    fn context_is_truncated_by_characters() {
        let hits = [hit("光合成", 0.9), hit("abc", 0.8)];
        assert_eq!(build_context(&hits, 4), "光合成\n");
        assert_eq!(build_context(&hits, 0), "");
    }

    #[test]
    fn prompt_with_context() {
        let prompt = ground_prompt("Make a quiz.", "Cells divide.");
        assert!(prompt.starts_with("Make a quiz.\n\n---\n"));
        assert!(prompt.ends_with("Reference material:\nCells divide."));
    }

    #[test]
    fn json_output_has_hits() {
        let value = results_json(&[hit("text", 0.5)], "q");
        assert_eq!(value["query"], "q");
        assert_eq!(value["result_count"], 1);
        assert_eq!(value["results"][0]["kind"], "pdf");
        assert_eq!(value["results"][0]["title"], "Biology");
    }

    #[test]
    fn preview_flattens_and_shortens() {
        assert_eq!(preview("a\nb", 10), "a b");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
