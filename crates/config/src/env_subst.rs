/// Expand `${VAR}` and `${VAR:-fallback}` placeholders in raw config text.
///
/// A placeholder whose variable is unset and has no fallback is kept
/// verbatim so the parse error (if any) points at the original text.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated, keep the remainder untouched.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(body);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        (name == "RELAY_PORT").then(|| "3100".to_string())
    }

    #[test]
    fn expands_known_variable() {
        assert_eq!(substitute_with("port = ${RELAY_PORT}", lookup), "port = 3100");
    }

    #[test]
    fn uses_fallback_when_unset() {
        assert_eq!(
            substitute_with("bind = \"${RELAY_BIND:-0.0.0.0}\"", lookup),
            "bind = \"0.0.0.0\""
        );
    }

    #[test]
    fn keeps_unknown_placeholder() {
        assert_eq!(substitute_with("${RELAY_MISSING}", lookup), "${RELAY_MISSING}");
    }

    #[test]
    fn keeps_unterminated_placeholder() {
        assert_eq!(substitute_with("a ${RELAY_PORT", lookup), "a ${RELAY_PORT");
    }

    #[test]
    fn reads_process_environment() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
