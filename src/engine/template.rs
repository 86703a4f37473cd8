use std::collections::HashMap;

use serde_json::Value;

/// Renders a JSON value as the literal text substituted into a query
/// template: strings pass through unquoted, everything else is rendered as
/// its JSON text. Never re-interpreted as further template syntax.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Single-pass `{{name}}` substitution using completed upstream results,
/// keyed by output variable. Unknown placeholders are left untouched.
pub fn substitute(template: &str, variables: &HashMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if template[i..].starts_with("{{") {
            if let Some(end) = template[i + 2..].find("}}") {
                let name = template[i + 2..i + 2 + end].trim();
                if let Some(value) = variables.get(name) {
                    out.push_str(&stringify(value));
                    i += 2 + end + 2;
                    continue;
                }
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variable() {
        let mut vars = HashMap::new();
        vars.insert("a".to_string(), Value::String("AAPL=150".into()));
        assert_eq!(substitute("price: {{a}}", &vars), "price: AAPL=150");
    }

    #[test]
    fn leaves_unknown_placeholder_untouched() {
        let vars = HashMap::new();
        assert_eq!(substitute("see {{ghost}}", &vars), "see {{ghost}}");
    }

    #[test]
    fn substituted_text_is_not_re_parsed() {
        let mut vars = HashMap::new();
        vars.insert("a".to_string(), Value::String("{{b}}".into()));
        let mut outer = HashMap::new();
        outer.insert("b".to_string(), Value::String("leak".into()));
        let once = substitute("{{a}}", &vars);
        assert_eq!(once, "{{b}}");
        // a second, separate pass is a caller decision, never automatic
        assert_eq!(substitute(&once, &outer), "leak");
    }
}
