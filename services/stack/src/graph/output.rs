//! Output references and deferred values
//!
//! A property bag holds deferred values as intrinsic objects:
//!
//! - `{"Ref": "name"}`: the physical id of `name`
//! - `{"Fn::GetAtt": ["name", "Attribute"]}`: one output attribute
//! - `{"Fn::Join": ["sep", [..]]}`: string interpolation
//! - `{"Fn::Split": ["sep", value]}` / `{"Fn::Select": [i, list]}`
//!
//! References are collected to derive implicit edges, and resolved against
//! materialized outputs once every predecessor exists.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{json, Map, Value};

use crate::error::GraphError;

const REF: &str = "Ref";
const GET_ATT: &str = "Fn::GetAtt";
const JOIN: &str = "Fn::Join";
const SPLIT: &str = "Fn::Split";
const SELECT: &str = "Fn::Select";

/// Deferred value owned by another resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    pub resource: String,
    /// `None` means the physical id
    pub attribute: Option<String>,
}

impl OutputRef {
    pub fn id(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: None,
        }
    }

    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: Some(attribute.into()),
        }
    }

    pub fn to_value(&self) -> Value {
        match &self.attribute {
            None => json!({ REF: self.resource }),
            Some(attribute) => json!({ GET_ATT: [self.resource, attribute] }),
        }
    }
}

impl Serialize for OutputRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match &self.attribute {
            None => map.serialize_entry(REF, &self.resource)?,
            Some(attribute) => map.serialize_entry(GET_ATT, &[&self.resource, attribute])?,
        }
        map.end()
    }
}

impl From<OutputRef> for Value {
    fn from(r: OutputRef) -> Self {
        r.to_value()
    }
}

/// Interpolate literal and deferred parts into one string
pub fn join<I>(parts: I) -> Value
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    let parts: Vec<Value> = parts.into_iter().map(Into::into).collect();
    json!({ JOIN: ["", parts] })
}

/// First `separator`-delimited segment of a deferred string
pub fn first_segment(value: impl Into<Value>, separator: &str) -> Value {
    let value: Value = value.into();
    json!({ SELECT: [0, { SPLIT: [separator, value] }] })
}

/// Materialized outputs of one resource
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceOutputs {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Outputs of every materialized resource, by logical name
pub type OutputStore = BTreeMap<String, ResourceOutputs>;

/// Every output reference in `value`, in document order
pub fn references(value: &Value) -> Vec<OutputRef> {
    let mut found = Vec::new();
    collect(value, &mut found);
    found
}

fn collect(value: &Value, found: &mut Vec<OutputRef>) {
    match value {
        Value::Object(map) => {
            if let Some(r) = as_reference(map) {
                found.push(r);
                return;
            }
            for v in map.values() {
                collect(v, found);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect(v, found);
            }
        }
        _ => {}
    }
}

fn as_reference(map: &Map<String, Value>) -> Option<OutputRef> {
    if map.len() != 1 {
        return None;
    }
    if let Some(Value::String(name)) = map.get(REF) {
        return Some(OutputRef::id(name.clone()));
    }
    if let Some(Value::Array(pair)) = map.get(GET_ATT) {
        if let [Value::String(name), Value::String(attribute)] = pair.as_slice() {
            return Some(OutputRef::new(name.clone(), attribute.clone()));
        }
    }
    None
}

/// Replace every intrinsic in `value` with its materialized result.
/// `owner` names the resource whose bag is being resolved, for errors.
pub fn resolve(owner: &str, value: &Value, outputs: &OutputStore) -> Result<Value, GraphError> {
    match value {
        Value::Object(map) if map.len() == 1 => {
            if let Some(r) = as_reference(map) {
                return lookup(&r, outputs).map(Value::String);
            }
            if let Some(args) = map.get(JOIN) {
                return resolve_join(owner, args, outputs);
            }
            if let Some(args) = map.get(SPLIT) {
                return resolve_split(owner, args, outputs);
            }
            if let Some(args) = map.get(SELECT) {
                return resolve_select(owner, args, outputs);
            }
            resolve_object(owner, map, outputs)
        }
        Value::Object(map) => resolve_object(owner, map, outputs),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve(owner, v, outputs))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn resolve_object(
    owner: &str,
    map: &Map<String, Value>,
    outputs: &OutputStore,
) -> Result<Value, GraphError> {
    let mut out = Map::with_capacity(map.len());
    for (k, v) in map {
        out.insert(k.clone(), resolve(owner, v, outputs)?);
    }
    Ok(Value::Object(out))
}

fn lookup(r: &OutputRef, outputs: &OutputStore) -> Result<String, GraphError> {
    let unresolved = || GraphError::Unresolved {
        resource: r.resource.clone(),
        attribute: r.attribute.clone().unwrap_or_else(|| REF.to_string()),
    };
    let produced = outputs.get(&r.resource).ok_or_else(unresolved)?;
    match &r.attribute {
        None => Ok(produced.id.clone()),
        Some(attribute) => produced
            .attributes
            .get(attribute)
            .cloned()
            .ok_or_else(unresolved),
    }
}

fn malformed(owner: &str, reason: impl Into<String>) -> GraphError {
    GraphError::MalformedIntrinsic {
        resource: owner.to_string(),
        reason: reason.into(),
    }
}

fn as_text(owner: &str, value: Value) -> Result<String, GraphError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(malformed(owner, format!("expected a string, found {}", other))),
    }
}

fn resolve_join(owner: &str, args: &Value, outputs: &OutputStore) -> Result<Value, GraphError> {
    let (separator, parts) = match args.as_array().map(Vec::as_slice) {
        Some([Value::String(sep), Value::Array(parts)]) => (sep, parts),
        _ => return Err(malformed(owner, "Fn::Join expects [separator, [parts]]")),
    };
    let mut pieces = Vec::with_capacity(parts.len());
    for part in parts {
        pieces.push(as_text(owner, resolve(owner, part, outputs)?)?);
    }
    Ok(Value::String(pieces.join(separator)))
}

fn resolve_split(owner: &str, args: &Value, outputs: &OutputStore) -> Result<Value, GraphError> {
    let (separator, source) = match args.as_array().map(Vec::as_slice) {
        Some([Value::String(sep), source]) => (sep, source),
        _ => return Err(malformed(owner, "Fn::Split expects [separator, value]")),
    };
    let text = as_text(owner, resolve(owner, source, outputs)?)?;
    Ok(Value::Array(
        text.split(separator.as_str())
            .map(|s| Value::String(s.to_string()))
            .collect(),
    ))
}

fn resolve_select(owner: &str, args: &Value, outputs: &OutputStore) -> Result<Value, GraphError> {
    let (index, list) = match args.as_array().map(Vec::as_slice) {
        Some([Value::Number(i), list]) => (i, list),
        _ => return Err(malformed(owner, "Fn::Select expects [index, list]")),
    };
    let index = index
        .as_u64()
        .ok_or_else(|| malformed(owner, "Fn::Select index must be a non-negative integer"))?;
    match resolve(owner, list, outputs)? {
        Value::Array(items) => items
            .into_iter()
            .nth(index as usize)
            .ok_or_else(|| malformed(owner, format!("Fn::Select index {} out of range", index))),
        other => Err(malformed(owner, format!("Fn::Select expects a list, found {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> OutputStore {
        let mut outputs = OutputStore::new();
        outputs.insert(
            "nft-media-cdn-s3".to_string(),
            ResourceOutputs {
                id: "nft-media-cdn-s3-1a2b3c".to_string(),
                attributes: BTreeMap::from([
                    ("Arn".to_string(), "arn:aws:s3:::nft-media-cdn-s3-1a2b3c".to_string()),
                    (
                        "BucketRegionalDomainName".to_string(),
                        "nft-media-cdn-s3-1a2b3c.s3.eu-west-2.amazonaws.com".to_string(),
                    ),
                ]),
            },
        );
        outputs
    }

    #[test]
    fn test_output_ref_serializes_as_intrinsic() {
        let by_id = serde_json::to_value(OutputRef::id("cdn-cf")).unwrap();
        assert_eq!(by_id, json!({"Ref": "cdn-cf"}));

        let by_attr = serde_json::to_value(OutputRef::new("cdn-cf", "DomainName")).unwrap();
        assert_eq!(by_attr, json!({"Fn::GetAtt": ["cdn-cf", "DomainName"]}));
        assert_eq!(by_attr, OutputRef::new("cdn-cf", "DomainName").to_value());
    }

    #[test]
    fn test_references_found_in_nested_values() {
        let bag = json!({
            "bucket": OutputRef::id("bucket"),
            "policy": join([json!("{"), OutputRef::new("oai", "IamArn").to_value(), json!("}")]),
            "plain": {"Ref": "not-a-ref", "extra": true}
        });
        let refs = references(&bag);
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&OutputRef::id("bucket")));
        assert!(refs.contains(&OutputRef::new("oai", "IamArn")));
    }

    #[test]
    fn test_resolve_join_and_first_segment() {
        let bag = json!({
            "resource": join([OutputRef::new("nft-media-cdn-s3", "Arn").to_value(), json!("/*")]),
            "bucket": first_segment(OutputRef::new("nft-media-cdn-s3", "BucketRegionalDomainName"), "."),
        });
        let resolved = resolve("policy", &bag, &store()).unwrap();
        assert_eq!(resolved["resource"], "arn:aws:s3:::nft-media-cdn-s3-1a2b3c/*");
        assert_eq!(resolved["bucket"], "nft-media-cdn-s3-1a2b3c");
    }

    #[test]
    fn test_unresolved_reference_is_an_error() {
        let bag = json!({"target": OutputRef::new("cdn-cf", "DomainName")});
        let err = resolve("alias", &bag, &store()).unwrap_err();
        assert_eq!(
            err,
            GraphError::Unresolved {
                resource: "cdn-cf".to_string(),
                attribute: "DomainName".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_select() {
        let bag = json!({"Fn::Select": [3, ["a", "b"]]});
        assert!(matches!(
            resolve("x", &bag, &store()),
            Err(GraphError::MalformedIntrinsic { .. })
        ));
    }
}
