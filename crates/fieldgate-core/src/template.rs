//! Request templates: JSON text with `$$N$$` placeholders plus the binding
//! table that fills them.

use std::collections::BTreeSet;

use crate::binding::{RequestContext, VariableTable};
use crate::error::RenderError;

/// One placeholder occurrence in template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Token {
    start: usize,
    end: usize,
    position: usize,
}

/// Scan `text` for `$$N$$` tokens. `$$` not followed by digits and a closing
/// `$$` is ordinary text.
fn tokens(text: &str) -> Result<Vec<Token>, RenderError> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'$' {
            let digits_start = i + 2;
            let mut j = digits_start;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > digits_start && j + 1 < bytes.len() && bytes[j] == b'$' && bytes[j + 1] == b'$'
            {
                let position = text[digits_start..j]
                    .parse::<usize>()
                    .map_err(|_| RenderError::MalformedPlaceholder { offset: i })?;
                out.push(Token {
                    start: i,
                    end: j + 2,
                    position,
                });
                i = j + 2;
                continue;
            }
        }
        i += 1;
    }
    Ok(out)
}

/// Distinct placeholder positions referenced by `text`.
pub fn placeholder_positions(text: &str) -> Result<BTreeSet<usize>, RenderError> {
    Ok(tokens(text)?.into_iter().map(|t| t.position).collect())
}

/// A request template paired with its binding table.
///
/// The two are only ever built together and rendered together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTemplate {
    text: String,
    variables: VariableTable,
}

impl RequestTemplate {
    pub fn new(text: String, variables: VariableTable) -> Self {
        Self { text, variables }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    /// Fill every placeholder from `ctx`.
    pub fn render(&self, ctx: &RequestContext) -> Result<String, RenderError> {
        let toks = tokens(&self.text)?;
        let mut out = String::with_capacity(self.text.len() + toks.len() * 8);
        let mut last = 0;
        for tok in toks {
            out.push_str(&self.text[last..tok.start]);
            let binding =
                self.variables
                    .get(tok.position)
                    .ok_or(RenderError::UnboundPlaceholder {
                        position: tok.position,
                        table_len: self.variables.len(),
                    })?;
            binding.render(ctx, &mut out)?;
            last = tok.end;
        }
        out.push_str(&self.text[last..]);
        Ok(out)
    }

    /// Every placeholder has a binding and every binding is referenced.
    pub fn is_consistent(&self) -> bool {
        match placeholder_positions(&self.text) {
            Ok(positions) => positions.len() == self.variables.len()
                && positions.iter().enumerate().all(|(i, p)| i == *p),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Binding, Renderer, VariableSource};
    use serde_json::json;

    fn table(names: &[&str]) -> VariableTable {
        let mut t = VariableTable::new();
        for n in names {
            t.add(Binding::new(VariableSource::context(n), Renderer::Json));
        }
        t
    }

    #[test]
    fn renders_in_order() {
        let tpl = RequestTemplate::new(
            r#"{"a":$$0$$,"b":$$1$$,"c":$$0$$}"#.to_string(),
            table(&["x", "y"]),
        );
        let out = tpl
            .render(&RequestContext::with_variables(json!({"x": 1, "y": "two"})))
            .unwrap();
        assert_eq!(out, r#"{"a":1,"b":"two","c":1}"#);
        assert!(tpl.is_consistent());
    }

    #[test]
    fn unbound_placeholder_is_an_error() {
        let tpl = RequestTemplate::new("$$3$$".to_string(), table(&["x"]));
        let err = tpl.render(&RequestContext::default()).unwrap_err();
        assert_eq!(
            err,
            RenderError::UnboundPlaceholder {
                position: 3,
                table_len: 1
            }
        );
        assert!(!tpl.is_consistent());
    }

    #[test]
    fn lone_dollars_are_text() {
        let tpl = RequestTemplate::new("cost $$ and $$x$$".to_string(), VariableTable::new());
        assert_eq!(
            tpl.render(&RequestContext::default()).unwrap(),
            "cost $$ and $$x$$"
        );
    }
}
