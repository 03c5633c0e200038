//! Attribute List Sub-Parser
//!
//! Consumes a bracketed `(name = value, ...)` sequence starting at a given
//! offset and reports where it ended. Values are kept as raw text; quoting
//! and nested parentheses are respected but not interpreted.

/// Parsed attribute list plus the offset one past the closing `)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeList {
    pairs: Vec<(String, String)>,
    end_index: usize,
}

impl AttributeList {
    /// All attributes in source order. Positional values have an empty name.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Raw value text of a named attribute.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Byte offset one past the closing parenthesis.
    pub fn end_index(&self) -> usize {
        self.end_index
    }

    /// Canonical textual form: `a = 1, b = "x"`, positional values verbatim.
    pub fn canonical(&self) -> String {
        self.pairs
            .iter()
            .map(|(n, v)| {
                if n.is_empty() {
                    v.clone()
                } else {
                    format!("{} = {}", n, v)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Parse an attribute list whose opening `(` sits at `start`.
///
/// Returns an error message when the opening parenthesis is missing or the
/// list is not terminated before end of input.
pub fn parse_attribute_list(content: &str, start: usize) -> Result<AttributeList, String> {
    if !content[start..].starts_with('(') {
        return Err("expected '(' to open attribute list".to_string());
    }

    let mut pairs = Vec::new();
    let mut item = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in content[start + 1..].char_indices() {
        if let Some(q) = quote {
            item.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                item.push(c);
            }
            '(' => {
                depth += 1;
                item.push(c);
            }
            ')' if depth == 0 => {
                push_item(&mut pairs, &item);
                return Ok(AttributeList {
                    pairs,
                    end_index: start + 1 + i + 1,
                });
            }
            ')' => {
                depth -= 1;
                item.push(c);
            }
            ',' if depth == 0 => {
                push_item(&mut pairs, &item);
                item.clear();
            }
            _ => item.push(c),
        }
    }

    Err("unterminated attribute list".to_string())
}

fn push_item(pairs: &mut Vec<(String, String)>, item: &str) {
    let item = item.trim();
    if item.is_empty() {
        return;
    }

    if let Some((name, value)) = item.split_once('=') {
        let name = name.trim();
        if !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            pairs.push((name.to_string(), value.trim().to_string()));
            return;
        }
    }

    pairs.push((String::new(), item.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_attributes() {
        let list = parse_attribute_list(r#"(title = "Home", count = 3)"#, 0).unwrap();
        assert_eq!(list.get("title"), Some(r#""Home""#));
        assert_eq!(list.get("count"), Some("3"));
        assert_eq!(list.end_index(), 27);
    }

    #[test]
    fn test_empty_list() {
        let list = parse_attribute_list("()", 0).unwrap();
        assert!(list.is_empty());
        assert_eq!(list.end_index(), 2);
    }

    #[test]
    fn test_comma_inside_quotes() {
        let list = parse_attribute_list(r#"(label = "a, b")"#, 0).unwrap();
        assert_eq!(list.pairs().len(), 1);
        assert_eq!(list.get("label"), Some(r#""a, b""#));
    }

    #[test]
    fn test_nested_parentheses_in_value() {
        let list = parse_attribute_list("(value = f(x, y))", 0).unwrap();
        assert_eq!(list.get("value"), Some("f(x, y)"));
    }

    #[test]
    fn test_positional_value() {
        let list = parse_attribute_list("(user.name)", 0).unwrap();
        assert_eq!(list.pairs(), &[(String::new(), "user.name".to_string())]);
        assert_eq!(list.canonical(), "user.name");
    }

    #[test]
    fn test_offset_start() {
        let content = "@tag.nav(active = true) rest";
        let list = parse_attribute_list(content, 8).unwrap();
        assert_eq!(list.get("active"), Some("true"));
        assert_eq!(&content[list.end_index()..], " rest");
    }

    #[test]
    fn test_unterminated_list() {
        let err = parse_attribute_list(r#"(title = "Home""#, 0).unwrap_err();
        assert!(err.contains("unterminated"));
    }

    #[test]
    fn test_missing_open_paren() {
        assert!(parse_attribute_list("title", 0).is_err());
    }

    #[test]
    fn test_canonical_round() {
        let list = parse_attribute_list(r#"(a=1,b = "x")"#, 0).unwrap();
        assert_eq!(list.canonical(), r#"a = 1, b = "x""#);
    }
}
