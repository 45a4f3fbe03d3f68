use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A string value that may not be known until another resource exists.
///
/// Outputs are resolved lazily against whatever attributes have been recorded
/// so far. A reference to an attribute that is not yet recorded leaves the
/// whole output unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    Known(String),
    Attr { resource: String, attribute: String },
    Concat(Vec<Output>),
}

impl Output {
    pub fn known(value: impl Into<String>) -> Self {
        Output::Known(value.into())
    }

    pub fn attr(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Output::Attr {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }

    pub fn concat(parts: impl IntoIterator<Item = Output>) -> Self {
        Output::Concat(parts.into_iter().collect())
    }

    /// Names of every resource this value reads from
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(&mut deps);
        deps
    }

    pub(crate) fn collect_dependencies(&self, deps: &mut BTreeSet<String>) {
        match self {
            Output::Known(_) => {}
            Output::Attr { resource, .. } => {
                deps.insert(resource.clone());
            }
            Output::Concat(parts) => {
                for part in parts {
                    part.collect_dependencies(deps);
                }
            }
        }
    }

    /// Every (resource, attribute) pair referenced by this value
    pub fn references(&self) -> Vec<(&str, &str)> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<(&'a str, &'a str)>) {
        match self {
            Output::Known(_) => {}
            Output::Attr {
                resource,
                attribute,
            } => refs.push((resource.as_str(), attribute.as_str())),
            Output::Concat(parts) => {
                for part in parts {
                    part.collect_references(refs);
                }
            }
        }
    }

    /// Resolve to a concrete string, or `None` while any referenced attribute is unknown
    pub fn resolve<F>(&self, lookup: &F) -> Option<String>
    where
        F: Fn(&str, &str) -> Option<String>,
    {
        match self {
            Output::Known(value) => Some(value.clone()),
            Output::Attr {
                resource,
                attribute,
            } => lookup(resource, attribute),
            Output::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&part.resolve(lookup)?);
                }
                Some(out)
            }
        }
    }

    /// Render with `${resource.attribute}` in place of anything the lookup can't answer
    pub fn render_with_placeholders<F>(&self, lookup: &F) -> String
    where
        F: Fn(&str, &str) -> Option<String>,
    {
        match self {
            Output::Known(value) => value.clone(),
            Output::Attr {
                resource,
                attribute,
            } => lookup(resource, attribute)
                .unwrap_or_else(|| format!("${{{}.{}}}", resource, attribute)),
            Output::Concat(parts) => parts
                .iter()
                .map(|part| part.render_with_placeholders(lookup))
                .collect(),
        }
    }
}

impl From<&str> for Output {
    fn from(value: &str) -> Self {
        Output::Known(value.to_string())
    }
}

impl From<String> for Output {
    fn from(value: String) -> Self {
        Output::Known(value)
    }
}

/// Incrementally builds an interpolated `Output`, merging adjacent literals.
#[derive(Debug, Default, Clone)]
pub struct Template {
    parts: Vec<Output>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        if let Some(Output::Known(last)) = self.parts.last_mut() {
            last.push_str(text);
        } else {
            self.parts.push(Output::known(text));
        }
        self
    }

    pub fn line(&mut self, text: &str) -> &mut Self {
        self.text(text).text("\n")
    }

    pub fn value(&mut self, value: &Output) -> &mut Self {
        match value {
            Output::Known(text) => {
                self.text(text);
            }
            Output::Concat(parts) => {
                for part in parts {
                    self.value(part);
                }
            }
            attr => self.parts.push(attr.clone()),
        }
        self
    }

    pub fn build(&self) -> Output {
        match self.parts.as_slice() {
            [] => Output::known(""),
            [single] => single.clone(),
            parts => Output::Concat(parts.to_vec()),
        }
    }
}
