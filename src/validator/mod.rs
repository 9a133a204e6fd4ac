//! Query validator.
//!
//! Pure, stateless classification of candidate Cypher text as Allow/Deny.
//! The policy is deliberately syntactic and conservative: it does not try to
//! understand query semantics, it enforces a read-only whitelist, token-aware
//! write-keyword denial, injection-pattern rejection, and bound injection.
//! Anything unrecognized errs toward denial.
//!
//! The `normalized_query` returned on Allow is the only text ever sent to
//! execution — never the caller's original.

use crate::driver::ParamMap;
use crate::error::ValidationError;
use regex::Regex;
use serde_json::Value;

/// Mutating clause keywords, matched token-aware (word boundaries, not
/// substrings) so a property named `created` passes while `CREATE` in any
/// casing does not. Kept in lockstep with the write vocabulary of the target
/// engine; extend it before enabling new engine features.
const WRITE_KEYWORDS: &[&str] = &[
    "CREATE", "MERGE", "DELETE", "DETACH", "SET", "REMOVE", "DROP", "FOREACH",
    "LOAD", "GRANT", "REVOKE", "DENY", "ALTER", "RENAME", "TERMINATE", "KILL",
    "IMPORT", "INSTALL",
];

/// Administrative and procedure-call keywords. `CALL` is denied wholesale:
/// procedures can mutate or reach unrestricted system state, and the safe
/// subset is not worth enumerating here.
const ADMIN_KEYWORDS: &[&str] = &[
    "CALL", "USING", "SHOW", "EXPLAIN", "PROFILE", "START", "STOP",
];

/// Compound-query keywords. A `UNION` result cannot be bounded by a single
/// trailing `LIMIT` rewrite, so compound queries are refused outright.
const COMPOUND_KEYWORDS: &[&str] = &["UNION"];

/// Clauses a candidate query may begin with.
const LEADING_CLAUSES: &[&str] = &["MATCH", "OPTIONAL", "UNWIND", "WITH", "RETURN"];

/// Outcome of validating one candidate query. Produced fresh per candidate,
/// never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<ValidationError>,
    pub normalized_query: Option<String>,
}

impl Verdict {
    fn allow(normalized: String) -> Self {
        Self {
            allowed: true,
            reason: None,
            normalized_query: Some(normalized),
        }
    }

    fn deny(reason: ValidationError) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            normalized_query: None,
        }
    }

    /// The normalized text on Allow, or the denial reason.
    pub fn into_result(self) -> Result<String, ValidationError> {
        match (self.normalized_query, self.reason) {
            (Some(normalized), None) => Ok(normalized),
            (_, Some(reason)) => Err(reason),
            // deny() and allow() are the only constructors
            (None, None) => Err(ValidationError::UnparseableQuery(
                "empty verdict".into(),
            )),
        }
    }
}

/// Token-aware read-only policy checker. Safe for concurrent unsynchronized
/// use; all state is immutable after construction.
pub struct QueryValidator {
    max_rows: usize,
    comment_pattern: Regex,
    concat_pattern: Regex,
    label_pattern: Regex,
}

impl QueryValidator {
    pub fn new(max_rows: usize) -> Self {
        Self {
            max_rows,
            comment_pattern: Regex::new(r"//|/\*|\*/").expect("static pattern"),
            concat_pattern: Regex::new(r#"['"]\s*\+|\+\s*['"]"#).expect("static pattern"),
            label_pattern: Regex::new(r"\(\s*\w*\s*:\s*([A-Za-z_][A-Za-z0-9_]*)")
                .expect("static pattern"),
        }
    }

    /// Classify a candidate query. Never panics: malformed input is itself a
    /// denial with `UnparseableQuery`.
    pub fn validate(&self, query_text: &str) -> Verdict {
        let collapsed = collapse_whitespace(query_text);
        if collapsed.is_empty() {
            return Verdict::deny(ValidationError::UnparseableQuery(
                "empty query".into(),
            ));
        }

        // A single trailing separator is tolerated and stripped; any other
        // separator means chained statements.
        let collapsed = collapsed
            .strip_suffix(';')
            .map(|s| s.trim_end().to_string())
            .unwrap_or(collapsed);
        if collapsed.contains(';') {
            return Verdict::deny(ValidationError::MultipleStatements);
        }

        // Length-preserving mask of string literal contents, so keyword and
        // pattern scans cannot be spoofed by literals while edit offsets stay
        // valid against the collapsed original.
        let masked = match mask_string_literals(&collapsed) {
            Ok(masked) => masked,
            Err(reason) => return Verdict::deny(reason),
        };

        if self.comment_pattern.is_match(&masked) {
            return Verdict::deny(ValidationError::InjectionPatternDetected(
                "comment delimiter".into(),
            ));
        }
        if self.concat_pattern.is_match(&masked) {
            return Verdict::deny(ValidationError::InjectionPatternDetected(
                "string concatenation splicing; use bound parameters".into(),
            ));
        }

        let tokens = scan_tokens(&masked);
        let keyword_tokens: Vec<&Token> =
            tokens.iter().filter(|t| t.keyword_position).collect();

        match keyword_tokens.first() {
            Some(first) if LEADING_CLAUSES.contains(&first.upper.as_str()) => {}
            Some(first)
                if WRITE_KEYWORDS.contains(&first.upper.as_str())
                    || ADMIN_KEYWORDS.contains(&first.upper.as_str()) =>
            {
                return Verdict::deny(ValidationError::DisallowedOperation(
                    first.upper.clone(),
                ));
            }
            _ => {
                return Verdict::deny(ValidationError::UnparseableQuery(
                    "query must begin with a read clause".into(),
                ));
            }
        }

        for token in &keyword_tokens {
            if WRITE_KEYWORDS.contains(&token.upper.as_str())
                || ADMIN_KEYWORDS.contains(&token.upper.as_str())
                || COMPOUND_KEYWORDS.contains(&token.upper.as_str())
            {
                return Verdict::deny(ValidationError::DisallowedOperation(
                    token.upper.clone(),
                ));
            }
        }

        match self.enforce_limit(&collapsed, &tokens) {
            Ok(normalized) => Verdict::allow(normalized),
            Err(reason) => Verdict::deny(reason),
        }
    }

    /// Append a bound when the query lacks one; clamp an oversized bound down
    /// to the configured maximum, never up.
    fn enforce_limit(
        &self,
        collapsed: &str,
        tokens: &[Token],
    ) -> Result<String, ValidationError> {
        // An identifier named `limit` directly after `AS` or `BY` is an alias
        // or sort key, not the bounding clause.
        let limit_token = tokens.iter().enumerate().rev().find_map(|(i, t)| {
            if !t.keyword_position || t.upper != "LIMIT" {
                return None;
            }
            let aliased = i > 0 && {
                let prev = &tokens[i - 1];
                let start = t.end - t.upper.len();
                matches!(prev.upper.as_str(), "AS" | "BY")
                    && collapsed[prev.end..start].trim().is_empty()
            };
            (!aliased).then_some(t)
        });

        let Some(token) = limit_token else {
            return Ok(format!("{} LIMIT {}", collapsed, self.max_rows));
        };

        // The bound must be a literal integer; parameterized or computed
        // bounds cannot be clamped, so they are refused.
        let rest = &collapsed[token.end..];
        let digits: String = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            return Err(ValidationError::UnparseableQuery(
                "LIMIT must be a literal integer".into(),
            ));
        }

        let offset = token.end + (rest.len() - rest.trim_start().len());
        let value: u64 = digits.parse().map_err(|_| {
            ValidationError::UnparseableQuery("LIMIT value out of range".into())
        })?;

        if value > self.max_rows as u64 {
            let mut normalized = String::with_capacity(collapsed.len());
            normalized.push_str(&collapsed[..offset]);
            normalized.push_str(&self.max_rows.to_string());
            normalized.push_str(&collapsed[offset + digits.len()..]);
            Ok(normalized)
        } else {
            Ok(collapsed.to_string())
        }
    }

    /// Reject nested structures and non-scalar injection vectors in an
    /// externally supplied parameter map.
    pub fn validate_params(&self, params: &ParamMap) -> Result<(), ValidationError> {
        for (name, value) in params {
            match value {
                Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
                Value::Array(items) => {
                    if items.iter().any(|item| {
                        matches!(item, Value::Array(_) | Value::Object(_))
                    }) {
                        return Err(ValidationError::ParameterTypeMismatch {
                            name: name.clone(),
                            expected: "flat array of scalars".into(),
                            got: "nested structure".into(),
                        });
                    }
                }
                Value::Object(_) => {
                    return Err(ValidationError::ParameterTypeMismatch {
                        name: name.clone(),
                        expected: "scalar or flat array of scalars".into(),
                        got: "object".into(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Node labels referenced by a normalized query, for defense-in-depth
    /// schema checks.
    pub fn referenced_labels(&self, normalized_query: &str) -> Vec<String> {
        self.label_pattern
            .captures_iter(normalized_query)
            .map(|c| c[1].to_string())
            .collect()
    }
}

struct Token {
    end: usize,
    upper: String,
    /// False for property accesses (`n.created`), parameters (`$limit`),
    /// labels (`:Label`), and map keys (`{created: 1}`), which must not
    /// trigger keyword policy.
    keyword_position: bool,
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Blank out string literal contents, preserving byte length and the quote
/// chars themselves so scan offsets stay valid against the unmasked text.
/// Fails on unbalanced quoting.
fn mask_string_literals(text: &str) -> Result<String, ValidationError> {
    let mut out = String::with_capacity(text.len());
    let mut delim: Option<char> = None;
    let mut escaped = false;
    for c in text.chars() {
        match delim {
            Some(open) => {
                if escaped {
                    escaped = false;
                    blank(&mut out, c);
                } else if c == '\\' {
                    escaped = true;
                    blank(&mut out, c);
                } else if c == open {
                    delim = None;
                    out.push(c);
                } else {
                    blank(&mut out, c);
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    delim = Some(c);
                }
                out.push(c);
            }
        }
    }
    if delim.is_some() {
        return Err(ValidationError::InjectionPatternDetected(
            "unbalanced quoting".into(),
        ));
    }
    Ok(out)
}

fn blank(out: &mut String, c: char) {
    for _ in 0..c.len_utf8() {
        out.push(' ');
    }
}

fn scan_tokens(masked: &str) -> Vec<Token> {
    let bytes = masked.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len()
                && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            let word = &masked[start..i];

            let prev = masked[..start]
                .chars()
                .rev()
                .find(|ch| !ch.is_whitespace());
            let next = masked[i..].chars().find(|ch| !ch.is_whitespace());
            let keyword_position = !matches!(prev, Some('.') | Some('$') | Some(':'))
                && next != Some(':');

            tokens.push(Token {
                end: i,
                upper: word.to_uppercase(),
                keyword_position,
            });
        } else {
            i += 1;
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> QueryValidator {
        QueryValidator::new(1_000)
    }

    fn deny_reason(query: &str) -> ValidationError {
        let verdict = validator().validate(query);
        assert!(!verdict.allowed, "expected denial for: {query}");
        verdict.reason.unwrap()
    }

    fn allow_normalized(query: &str) -> String {
        let verdict = validator().validate(query);
        assert!(verdict.allowed, "expected allow for: {query}, got {:?}", verdict.reason);
        verdict.normalized_query.unwrap()
    }

    #[test]
    fn test_write_keywords_denied_case_insensitively() {
        for query in [
            "CREATE (n:Person) RETURN n",
            "create (n) return n",
            "MATCH (n) DETACH DELETE n",
            "MATCH (n) dEtAcH dElEtE n",
            "MATCH (n) SET n.x = 1 RETURN n",
            "MERGE (n:Person {name: 'x'}) RETURN n",
            "MATCH (n) REMOVE n.x RETURN n",
            "DROP INDEX idx",
            "MATCH (n)   \t DELETE n",
        ] {
            assert!(
                matches!(deny_reason(query), ValidationError::DisallowedOperation(_)),
                "query: {query}"
            );
        }
    }

    #[test]
    fn test_procedure_calls_denied() {
        assert!(matches!(
            deny_reason("CALL dbms.shutdown()"),
            ValidationError::DisallowedOperation(op) if op == "CALL"
        ));
        assert!(matches!(
            deny_reason("MATCH (n) CALL db.labels() YIELD label RETURN label"),
            ValidationError::DisallowedOperation(op) if op == "CALL"
        ));
    }

    #[test]
    fn test_property_named_like_keyword_allowed() {
        let normalized =
            allow_normalized("MATCH (n:Event) WHERE n.created > 100 RETURN n.created");
        assert!(normalized.contains("n.created"));
    }

    #[test]
    fn test_map_key_and_parameter_named_like_keyword_allowed() {
        allow_normalized("MATCH (n:Event {created: 1}) RETURN n LIMIT 5");
        allow_normalized("MATCH (n) WHERE n.ts > $set RETURN n LIMIT 5");
    }

    #[test]
    fn test_keyword_inside_string_literal_allowed() {
        // the word "delete" is data here, not a clause
        allow_normalized("MATCH (n) WHERE n.action = 'delete' RETURN n LIMIT 5");
    }

    #[test]
    fn test_multiple_statements_denied() {
        assert_eq!(
            deny_reason("MATCH (n) RETURN n; MATCH (m) DELETE m"),
            ValidationError::MultipleStatements
        );
        // single trailing separator tolerated
        allow_normalized("MATCH (n) RETURN n LIMIT 10;");
    }

    #[test]
    fn test_comment_delimiters_denied() {
        for query in [
            "MATCH (n) RETURN n // hidden DELETE n",
            "MATCH (n) /* DELETE n */ RETURN n",
        ] {
            assert!(matches!(
                deny_reason(query),
                ValidationError::InjectionPatternDetected(_)
            ));
        }
    }

    #[test]
    fn test_unbalanced_quotes_denied() {
        assert!(matches!(
            deny_reason("MATCH (n) WHERE n.name = 'x RETURN n"),
            ValidationError::InjectionPatternDetected(_)
        ));
    }

    #[test]
    fn test_string_concatenation_denied() {
        assert!(matches!(
            deny_reason("MATCH (n) WHERE n.name = 'a' + $evil RETURN n"),
            ValidationError::InjectionPatternDetected(_)
        ));
    }

    #[test]
    fn test_missing_limit_appended() {
        let normalized = allow_normalized("MATCH (l) RETURN l");
        assert_eq!(normalized, "MATCH (l) RETURN l LIMIT 1000");
    }

    #[test]
    fn test_oversized_limit_clamped_down() {
        let normalized = allow_normalized("MATCH (n) RETURN n LIMIT 50000");
        assert_eq!(normalized, "MATCH (n) RETURN n LIMIT 1000");
    }

    #[test]
    fn test_limit_within_bound_untouched() {
        let normalized = allow_normalized("MATCH (n) RETURN n LIMIT 10");
        assert_eq!(normalized, "MATCH (n) RETURN n LIMIT 10");
    }

    #[test]
    fn test_non_literal_limit_denied() {
        assert!(matches!(
            deny_reason("MATCH (n) RETURN n LIMIT $n"),
            ValidationError::UnparseableQuery(_)
        ));
    }

    #[test]
    fn test_union_denied_in_any_position() {
        assert!(matches!(
            deny_reason("MATCH (n) RETURN n UNION MATCH (m) RETURN m"),
            ValidationError::DisallowedOperation(op) if op == "UNION"
        ));
        assert!(matches!(
            deny_reason("MATCH (n) RETURN n UNION ALL MATCH (m) RETURN m"),
            ValidationError::DisallowedOperation(op) if op == "UNION"
        ));
    }

    #[test]
    fn test_alias_named_limit_is_not_the_bounding_clause() {
        let normalized = allow_normalized("MATCH (n) RETURN count(n) AS limit");
        assert!(normalized.ends_with("LIMIT 1000"), "got: {normalized}");

        let normalized = allow_normalized(
            "MATCH (n) RETURN count(n) AS limit ORDER BY limit DESC",
        );
        assert!(normalized.ends_with("LIMIT 1000"), "got: {normalized}");

        // a real bound after the alias is still clamped
        let normalized = allow_normalized("MATCH (n) RETURN n AS limit LIMIT 50000");
        assert_eq!(normalized, "MATCH (n) RETURN n AS limit LIMIT 1000");
    }

    #[test]
    fn test_empty_and_garbage_input_denied_without_panic() {
        assert!(matches!(
            deny_reason(""),
            ValidationError::UnparseableQuery(_)
        ));
        assert!(matches!(
            deny_reason("   \t\n "),
            ValidationError::UnparseableQuery(_)
        ));
        assert!(matches!(
            deny_reason("hello world"),
            ValidationError::UnparseableQuery(_)
        ));
        assert!(matches!(
            deny_reason("SELECT * FROM users"),
            ValidationError::DisallowedOperation(_) | ValidationError::UnparseableQuery(_)
        ));
    }

    #[test]
    fn test_whitespace_collapsed_in_normalized_query() {
        let normalized = allow_normalized("MATCH   (n)\n\tRETURN n   LIMIT 5");
        assert_eq!(normalized, "MATCH (n) RETURN n LIMIT 5");
    }

    #[test]
    fn test_read_clauses_allowed() {
        allow_normalized(
            "MATCH (l:Learner)-[:LOCATED_IN]->(c:Country) \
             WHERE l.active = true \
             RETURN c.name AS country, count(l) AS learners \
             ORDER BY learners DESC SKIP 10 LIMIT 25",
        );
        allow_normalized("UNWIND [1,2,3] AS x RETURN x LIMIT 10");
        allow_normalized("OPTIONAL MATCH (n:Course) RETURN n.title LIMIT 10");
        allow_normalized("WITH 1 AS x RETURN x LIMIT 1");
    }

    #[test]
    fn test_explain_and_show_denied() {
        assert!(matches!(
            deny_reason("EXPLAIN MATCH (n) RETURN n"),
            ValidationError::DisallowedOperation(_)
        ));
        assert!(matches!(
            deny_reason("SHOW DATABASES"),
            ValidationError::DisallowedOperation(_)
        ));
    }

    #[test]
    fn test_param_map_scalars_allowed() {
        let validator = validator();
        let mut params = ParamMap::new();
        params.insert("limit".into(), json!(10));
        params.insert("name".into(), json!("Alice"));
        params.insert("active".into(), json!(true));
        params.insert("codes".into(), json!(["IN", "BR"]));
        assert!(validator.validate_params(&params).is_ok());
    }

    #[test]
    fn test_param_map_nested_rejected() {
        let validator = validator();

        let mut params = ParamMap::new();
        params.insert("filter".into(), json!({"name": "x"}));
        assert!(matches!(
            validator.validate_params(&params),
            Err(ValidationError::ParameterTypeMismatch { name, .. }) if name == "filter"
        ));

        let mut params = ParamMap::new();
        params.insert("rows".into(), json!([[1, 2], [3]]));
        assert!(validator.validate_params(&params).is_err());
    }

    #[test]
    fn test_referenced_labels_extracted() {
        let validator = validator();
        let labels = validator
            .referenced_labels("MATCH (l:Learner)-[:ENROLLED_IN]->(c:Course) RETURN l, c");
        assert_eq!(labels, vec!["Learner".to_string(), "Course".to_string()]);
    }
}
