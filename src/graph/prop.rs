use crate::graph::output::Output;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// A resource input: a tree of literals and deferred outputs
#[derive(Debug, Clone, PartialEq)]
pub enum Prop {
    Str(Output),
    Bool(bool),
    Int(i64),
    List(Vec<Prop>),
    Map(BTreeMap<String, Prop>),
    /// Resolved child encoded as a JSON string (policy documents)
    Json(Box<Prop>),
}

impl Prop {
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Prop)>,
    {
        Prop::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list(items: impl IntoIterator<Item = Prop>) -> Self {
        Prop::List(items.into_iter().collect())
    }

    pub fn json(inner: Prop) -> Self {
        Prop::Json(Box::new(inner))
    }

    pub fn collect_dependencies(&self, deps: &mut BTreeSet<String>) {
        match self {
            Prop::Str(output) => output.collect_dependencies(deps),
            Prop::Bool(_) | Prop::Int(_) => {}
            Prop::List(items) => {
                for item in items {
                    item.collect_dependencies(deps);
                }
            }
            Prop::Map(entries) => {
                for value in entries.values() {
                    value.collect_dependencies(deps);
                }
            }
            Prop::Json(inner) => inner.collect_dependencies(deps),
        }
    }

    pub fn outputs(&self) -> Vec<&Output> {
        let mut outputs = Vec::new();
        self.collect_outputs(&mut outputs);
        outputs
    }

    fn collect_outputs<'a>(&'a self, outputs: &mut Vec<&'a Output>) {
        match self {
            Prop::Str(output) => outputs.push(output),
            Prop::Bool(_) | Prop::Int(_) => {}
            Prop::List(items) => items.iter().for_each(|i| i.collect_outputs(outputs)),
            Prop::Map(entries) => entries.values().for_each(|v| v.collect_outputs(outputs)),
            Prop::Json(inner) => inner.collect_outputs(outputs),
        }
    }

    /// Resolve into plain JSON, or `None` while anything inside is unknown
    pub fn resolve<F>(&self, lookup: &F) -> Option<Value>
    where
        F: Fn(&str, &str) -> Option<String>,
    {
        Some(match self {
            Prop::Str(output) => Value::String(output.resolve(lookup)?),
            Prop::Bool(b) => Value::Bool(*b),
            Prop::Int(i) => Value::from(*i),
            Prop::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(lookup))
                    .collect::<Option<Vec<_>>>()?,
            ),
            Prop::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.resolve(lookup)?);
                }
                Value::Object(map)
            }
            Prop::Json(inner) => Value::String(inner.resolve(lookup)?.to_string()),
        })
    }
}

impl From<Output> for Prop {
    fn from(value: Output) -> Self {
        Prop::Str(value)
    }
}

impl From<&str> for Prop {
    fn from(value: &str) -> Self {
        Prop::Str(Output::known(value))
    }
}

impl From<String> for Prop {
    fn from(value: String) -> Self {
        Prop::Str(Output::known(value))
    }
}

impl From<bool> for Prop {
    fn from(value: bool) -> Self {
        Prop::Bool(value)
    }
}

impl From<i64> for Prop {
    fn from(value: i64) -> Self {
        Prop::Int(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_node_encodes_resolved_child() {
        let doc = Prop::json(Prop::map([
            ("Version", Prop::from("2012-10-17")),
            (
                "Resource",
                Prop::from(Output::concat([
                    Output::attr("bucket", "arn"),
                    Output::known("/*"),
                ])),
            ),
        ]));
        let lookup = |_: &str, _: &str| Some("arn:aws:s3:::b".to_string());
        let resolved = doc.resolve(&lookup).unwrap();
        let text = resolved.as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["Resource"], "arn:aws:s3:::b/*");
    }

    #[test]
    fn unknown_leaf_makes_whole_tree_unknown() {
        let prop = Prop::list([Prop::from("x"), Prop::from(Output::attr("sg", "id"))]);
        assert_eq!(prop.resolve(&|_: &str, _: &str| None), None);
        let mut deps = BTreeSet::new();
        prop.collect_dependencies(&mut deps);
        assert!(deps.contains("sg"));
    }
}
