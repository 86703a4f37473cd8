/// Pulls the outermost `{...}` span out of a language-model response. Tries
/// a fenced ```json block first, then falls back to a balanced-brace scan
/// between the first `{` and the matching last `}`.
pub fn extract_json_object(raw: &str) -> Option<String> {
    if let Some(start) = raw.find("```json") {
        let after = &raw[start + "```json".len()..];
        if let Some(end) = after.find("```") {
            let candidate = after[..end].trim();
            if !candidate.is_empty() {
                return Some(candidate.to_string());
            }
        }
    }

    let first = raw.find('{')?;
    let last = raw.rfind('}')?;
    if last < first {
        return None;
    }
    Some(raw[first..=last].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_block() {
        let raw = "here you go\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(extract_json_object(raw).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn extracts_bare_braces_with_surrounding_text() {
        let raw = "sure, the answer is {\"a\": 1, \"b\": {\"c\": 2}} hope that helps";
        assert_eq!(
            extract_json_object(raw).unwrap(),
            "{\"a\": 1, \"b\": {\"c\": 2}}"
        );
    }

    #[test]
    fn returns_none_without_braces() {
        assert!(extract_json_object("no json here").is_none());
    }
}
