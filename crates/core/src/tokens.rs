//! Name tokenisation for cross-domain matching.
//!
//! `PAYMENT_DB_HOST`, `payment-db-host`, and `paymentDbHost` must all
//! tokenise to `[payment, db, host]` — that equivalence is what lets the
//! stitcher connect artifacts that never reference each other syntactically.

/// Minimum token length considered significant for matching. Shorter tokens
/// are kept for display but never drive a match.
pub const MIN_SIGNIFICANT_LEN: usize = 2;

/// Split a name on non-alphanumerics and camelCase boundaries, lowercase,
/// and dedupe while preserving first-occurrence order.
pub fn tokenize(name: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = name.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            flush(&mut current, &mut tokens);
            continue;
        }
        if i > 0 && !current.is_empty() {
            let prev = chars[i - 1];
            // camelCase boundary: aB, or the end of an acronym run (HTTPServer).
            let lower_to_upper = prev.is_lowercase() && c.is_uppercase();
            let acronym_end = prev.is_uppercase()
                && c.is_uppercase()
                && chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if lower_to_upper || acronym_end {
                flush(&mut current, &mut tokens);
            }
        }
        current.push(c.to_ascii_lowercase());
    }
    flush(&mut current, &mut tokens);

    // Dedupe preserving order
    let mut seen = std::collections::HashSet::new();
    tokens.retain(|t| seen.insert(t.clone()));
    tokens
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// Case- and separator-insensitive form: lowercase alphanumerics only.
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Filter a token list down to the tokens that may drive a match.
pub fn significant(tokens: &[String]) -> Vec<&str> {
    tokens
        .iter()
        .filter(|t| t.len() >= MIN_SIGNIFICANT_LEN)
        .map(|t| t.as_str())
        .collect()
}

/// Significant tokens shared between two token lists, in `a`'s order.
pub fn shared_significant(a: &[String], b: &[String]) -> Vec<String> {
    let b_set: std::collections::HashSet<&str> = significant(b).into_iter().collect();
    significant(a)
        .into_iter()
        .filter(|t| b_set.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// Is `inner` a contiguous subsequence of `outer` starting at the end?
pub fn is_suffix(inner: &[String], outer: &[String]) -> bool {
    !inner.is_empty() && inner.len() <= outer.len() && outer[outer.len() - inner.len()..] == *inner
}

/// Is `inner` a contiguous subsequence of `outer` starting at the beginning?
pub fn is_prefix(inner: &[String], outer: &[String]) -> bool {
    !inner.is_empty() && inner.len() <= outer.len() && outer[..inner.len()] == *inner
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(name: &str) -> Vec<String> {
        tokenize(name)
    }

    #[test]
    fn test_tokenize_separators_and_case_agree() {
        let expected = vec!["payment", "db", "host"];
        assert_eq!(toks("PAYMENT_DB_HOST"), expected);
        assert_eq!(toks("payment-db-host"), expected);
        assert_eq!(toks("paymentDbHost"), expected);
    }

    #[test]
    fn test_tokenize_dotted_names() {
        assert_eq!(toks("api.v1.url"), vec!["api", "v1", "url"]);
        assert_eq!(toks("aws_db_instance.payment_db"), vec!["aws", "db", "instance", "payment"]);
    }

    #[test]
    fn test_tokenize_acronym_runs() {
        assert_eq!(toks("HTTPServer"), vec!["http", "server"]);
        assert_eq!(toks("parseJSONBody"), vec!["parse", "json", "body"]);
    }

    #[test]
    fn test_tokenize_dedupes_preserving_order() {
        assert_eq!(toks("db_db_host"), vec!["db", "host"]);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("PAYMENT_DB_HOST"), "paymentdbhost");
        assert_eq!(normalize("api.v1-endpoint"), "apiv1endpoint");
        assert_eq!(normalize("mixed/SEPARATOR:test"), "mixedseparatortest");
    }

    #[test]
    fn test_significant_drops_single_chars() {
        let t = toks("a_very_long_token");
        assert_eq!(significant(&t), vec!["very", "long", "token"]);
    }

    #[test]
    fn test_shared_significant() {
        let a = toks("a_very_long_token");
        let b = toks("a_very_short_token");
        assert_eq!(shared_significant(&a, &b), vec!["very", "token"]);
    }

    #[test]
    fn test_prefix_suffix_subsequences() {
        let host = toks("host");
        let db_host = toks("db_host");
        assert!(is_suffix(&host, &db_host));
        assert!(!is_prefix(&host, &db_host));

        let user = toks("user");
        let user_id = toks("user_id");
        assert!(is_prefix(&user, &user_id));
    }
}
