//! `{field}` template rendering for rule effects
//!
//! Effect values are templates: `{description}` is replaced with the
//! field's current value in the information container, so a template can
//! see the output of rules that fired earlier. `{{` and `}}` escape
//! literal braces.

use crate::rules::condition::{EvalError, Scope};

/// Render a template against a field scope. A placeholder naming an
/// unknown field is an [`EvalError::UndefinedField`].
pub fn render(template: &str, scope: &dyn Scope) -> Result<String, EvalError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        // An unclosed placeholder names no field at all.
                        None => return Err(EvalError::UndefinedField(field)),
                    }
                }
                let value = scope
                    .lookup(&field)
                    .ok_or_else(|| EvalError::UndefinedField(field.clone()))?;
                out.push_str(&value.render());
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::condition::Value;
    use std::collections::BTreeMap;

    fn scope(entries: &[(&str, &str)]) -> BTreeMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Str(v.to_string())))
            .collect()
    }

    #[test]
    fn substitutes_fields() {
        let s = scope(&[("linked_account", "Compte de Dépôt")]);
        assert_eq!(
            render("Transfer from {linked_account}", &s).unwrap(),
            "Transfer from Compte de Dépôt"
        );
    }

    #[test]
    fn renders_numbers_without_quotes() {
        let mut s = BTreeMap::new();
        s.insert("amount".to_string(), Value::Num("-5.10".parse().unwrap()));
        assert_eq!(render("{amount} EUR", &s).unwrap(), "-5.10 EUR");
    }

    #[test]
    fn escaped_braces() {
        let s = scope(&[]);
        assert_eq!(render("literal {{braces}}", &s).unwrap(), "literal {braces}");
    }

    #[test]
    fn unknown_field_is_an_error() {
        let s = scope(&[]);
        match render("hello {who}", &s) {
            Err(EvalError::UndefinedField(field)) => assert_eq!(field, "who"),
            other => panic!("expected undefined-field error, got {:?}", other),
        }
    }

    #[test]
    fn plain_text_passes_through() {
        let s = scope(&[]);
        assert_eq!(render("Courses", &s).unwrap(), "Courses");
        assert_eq!(render("", &s).unwrap(), "");
    }
}
