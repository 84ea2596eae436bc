//! Template - Bootstrap-script materialization
//!
//! Templates hold literal placeholder tokens bound to other nodes'
//! attributes. Substitution is a single left-to-right pass: each token is
//! replaced independently and substituted output is never re-scanned, so a
//! resolved value that itself contains `${...}`-shaped text stays literal.

use std::collections::HashMap;

use crate::resolver::AttributeResolver;
use crate::resource::PlaceholderBinding;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TemplateError {
    #[error(
        "template '{template}': placeholder {token} is bound to unresolved attribute {node}.{attribute}"
    )]
    UnresolvedPlaceholder {
        template: String,
        token: String,
        node: String,
        attribute: String,
    },

    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    #[error("duplicate template id: {0}")]
    DuplicateTemplate(String),
}

#[derive(Debug, Clone)]
struct Template {
    raw: String,
    bindings: Vec<PlaceholderBinding>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateMaterializer {
    templates: HashMap<String, Template>,
}

impl TemplateMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template. The raw text is opaque; only the bound tokens
    /// are ever touched.
    pub fn register(
        &mut self,
        id: &str,
        raw: impl Into<String>,
        bindings: Vec<PlaceholderBinding>,
    ) -> Result<(), TemplateError> {
        if self.templates.contains_key(id) {
            return Err(TemplateError::DuplicateTemplate(id.to_string()));
        }
        self.templates.insert(
            id.to_string(),
            Template {
                raw: raw.into(),
                bindings,
            },
        );
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    /// Produce the final text. Every binding is checked before any text is
    /// produced; the first unresolved one is reported with its owning node.
    /// Materializing twice after full resolution yields identical output.
    pub fn materialize(
        &self,
        id: &str,
        resolver: &AttributeResolver,
    ) -> Result<String, TemplateError> {
        let template = self
            .templates
            .get(id)
            .ok_or_else(|| TemplateError::UnknownTemplate(id.to_string()))?;

        let mut values: Vec<(String, String)> = Vec::with_capacity(template.bindings.len());
        for binding in &template.bindings {
            let value = resolver.read(&binding.node, &binding.attribute).map_err(|_| {
                TemplateError::UnresolvedPlaceholder {
                    template: id.to_string(),
                    token: binding.token.clone(),
                    node: binding.node.clone(),
                    attribute: binding.attribute.clone(),
                }
            })?;
            values.push((binding.token.clone(), value.to_string()));
        }

        Ok(substitute(&template.raw, &values))
    }
}

/// Single pass over `raw`: at each position the first matching token is
/// replaced and scanning resumes after it in the original text. Tokens
/// without a binding pass through verbatim.
pub(crate) fn substitute(raw: &str, values: &[(String, String)]) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    'scan: while !rest.is_empty() {
        for (token, value) in values {
            if !token.is_empty() && rest.starts_with(token.as_str()) {
                out.push_str(value);
                rest = &rest[token.len()..];
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            out.push(ch);
        }
        rest = chars.as_str();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Value;

    #[test]
    fn materialize_before_resolution_names_the_binding() {
        let mut resolver = AttributeResolver::new();
        resolver.declare("database", "private_ip", None);

        let mut templates = TemplateMaterializer::new();
        templates
            .register(
                "bastion",
                "ssh ubuntu@${database_ip}",
                vec![PlaceholderBinding::new(
                    "${database_ip}",
                    "database",
                    "private_ip",
                )],
            )
            .unwrap();

        let err = templates.materialize("bastion", &resolver).unwrap_err();
        match err {
            TemplateError::UnresolvedPlaceholder { token, node, .. } => {
                assert_eq!(token, "${database_ip}");
                assert_eq!(node, "database");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn materialize_after_resolution_substitutes() {
        let mut resolver = AttributeResolver::new();
        resolver.declare("database", "private_ip", None);
        resolver
            .resolve("database", "private_ip", Value::String("10.0.1.5".to_string()))
            .unwrap();

        let mut templates = TemplateMaterializer::new();
        templates
            .register(
                "bastion",
                "ssh ubuntu@${database_ip}",
                vec![PlaceholderBinding::new(
                    "${database_ip}",
                    "database",
                    "private_ip",
                )],
            )
            .unwrap();

        let text = templates.materialize("bastion", &resolver).unwrap();
        assert_eq!(text, "ssh ubuntu@10.0.1.5");
    }

    #[test]
    fn materialize_is_idempotent() {
        let mut resolver = AttributeResolver::new();
        resolver.declare("webapp", "private_ip", None);
        resolver
            .resolve("webapp", "private_ip", Value::String("10.0.1.20".to_string()))
            .unwrap();

        let mut templates = TemplateMaterializer::new();
        templates
            .register(
                "webapp",
                "HOST=${ip}\nPEER=${ip}\n",
                vec![PlaceholderBinding::new("${ip}", "webapp", "private_ip")],
            )
            .unwrap();

        let first = templates.materialize("webapp", &resolver).unwrap();
        let second = templates.materialize("webapp", &resolver).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "HOST=10.0.1.20\nPEER=10.0.1.20\n");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        // A resolved value shaped like a placeholder must stay literal
        let values = vec![
            ("${a}".to_string(), "${b}".to_string()),
            ("${b}".to_string(), "wrong".to_string()),
        ];
        assert_eq!(substitute("x ${a} y ${b}", &values), "x ${b} y wrong");
    }

    #[test]
    fn unbound_tokens_pass_through() {
        let values = vec![("${known}".to_string(), "v".to_string())];
        assert_eq!(
            substitute("${known} and ${unknown}", &values),
            "v and ${unknown}"
        );
    }

    #[test]
    fn duplicate_template_rejected() {
        let mut templates = TemplateMaterializer::new();
        templates.register("a", "text", vec![]).unwrap();
        let err = templates.register("a", "text", vec![]).unwrap_err();
        assert!(matches!(err, TemplateError::DuplicateTemplate(_)));
    }

    #[test]
    fn template_with_no_bindings_is_returned_verbatim() {
        let resolver = AttributeResolver::new();
        let mut templates = TemplateMaterializer::new();
        templates
            .register("database", "#!/bin/bash\napt-get install -y mysql-server\n", vec![])
            .unwrap();

        let text = templates.materialize("database", &resolver).unwrap();
        assert_eq!(text, "#!/bin/bash\napt-get install -y mysql-server\n");
    }
}
