//! PromQL label matcher rendering.

use promgate_core::{LabelRequirement, SelectorOperator};

/// Quote a label value as a PromQL string literal.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn label_eq(label: &str, value: &str) -> String {
    format!("{label}={}", quote(value))
}

pub fn label_ne(label: &str, value: &str) -> String {
    format!("{label}!={}", quote(value))
}

pub fn label_matches(label: &str, pattern: &str) -> String {
    format!("{label}=~{}", quote(pattern))
}

pub fn label_not_matches(label: &str, pattern: &str) -> String {
    format!("{label}!~{}", quote(pattern))
}

/// Escape RE2 metacharacters. `-` is left as is, unlike `regex::escape`.
fn escape_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn alternation(values: &[String]) -> String {
    values
        .iter()
        .map(|v| escape_regex(v))
        .collect::<Vec<_>>()
        .join("|")
}

/// Match `label` against a set of object names: `=` for one name, an
/// anchored alternation for several, and any non-empty value for none.
pub fn names_matcher(label: &str, names: &[String]) -> String {
    match names {
        [] => label_ne(label, ""),
        [single] => label_eq(label, single),
        many => label_matches(label, &alternation(many)),
    }
}

/// Render one selector requirement.
pub fn requirement_matcher(req: &LabelRequirement) -> String {
    match req.operator {
        SelectorOperator::Equals => label_eq(&req.key, first(&req.values)),
        SelectorOperator::NotEquals => label_ne(&req.key, first(&req.values)),
        SelectorOperator::In => label_matches(&req.key, &alternation(&req.values)),
        SelectorOperator::NotIn => label_not_matches(&req.key, &alternation(&req.values)),
        SelectorOperator::Exists => label_matches(&req.key, ".+"),
        SelectorOperator::DoesNotExist => label_eq(&req.key, ""),
    }
}

fn first(values: &[String]) -> &str {
    values.first().map(String::as_str).unwrap_or_default()
}

/// Comma-join matchers for `<<.LabelMatchers>>`.
pub fn join<I, S>(matchers: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, m) in matchers.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(m.as_ref());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn quoting_escapes() {
        assert_eq!(quote("plain"), r#""plain""#);
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn quoting_escapes_control_characters() {
        assert_eq!(quote("a\nb\rc\td"), r#""a\nb\rc\td""#);
        assert_eq!(label_eq("msg", "line1\nline2"), r#"msg="line1\nline2""#);
    }

    #[test]
    fn single_name_is_equality() {
        assert_eq!(names_matcher("pod", &names(&["web-1"])), r#"pod="web-1""#);
    }

    #[test]
    fn several_names_are_an_alternation() {
        assert_eq!(
            names_matcher("pod", &names(&["web-1", "web-2"])),
            r#"pod=~"web-1|web-2""#
        );
    }

    #[test]
    fn no_names_match_any_object() {
        assert_eq!(names_matcher("pod", &[]), r#"pod!="""#);
    }

    #[test]
    fn names_with_regex_metacharacters_are_escaped() {
        let m = names_matcher("ingress", &names(&["a.b", "c+d"]));
        assert_eq!(m, r#"ingress=~"a\\.b|c\\+d""#);
    }

    #[test]
    fn requirements_render_per_operator() {
        let cases = [
            (LabelRequirement::equals("queue", "q1"), r#"queue="q1""#),
            (LabelRequirement::not_equals("queue", "q1"), r#"queue!="q1""#),
            (LabelRequirement::is_in("queue", ["a", "b"]), r#"queue=~"a|b""#),
            (LabelRequirement::not_in("queue", ["a"]), r#"queue!~"a""#),
            (LabelRequirement::exists("queue"), r#"queue=~".+""#),
            (LabelRequirement::does_not_exist("queue"), r#"queue="""#),
        ];
        for (req, want) in cases {
            assert_eq!(requirement_matcher(&req), want, "{:?}", req.operator);
        }
    }

    #[test]
    fn join_is_comma_separated() {
        assert_eq!(join(["a=\"1\"", "b=\"2\""]), r#"a="1",b="2""#);
        assert_eq!(join(Vec::<String>::new()), "");
    }
}
