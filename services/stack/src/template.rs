//! Template rendering
//!
//! Renders a validated graph as a CloudFormation-shaped document for review
//! and hand-off. Logical names are turned into alphanumeric logical ids and
//! every intrinsic inside property bags is rewritten to match.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::GraphError;
use crate::graph::{OutputRef, StackGraph};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "Metadata")]
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateOutput {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

/// Named stack output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub key: String,
    pub description: String,
    pub value: OutputRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackTemplate {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, TemplateResource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, TemplateOutput>,
}

/// `eneftea-lb` -> `EnefteaLb`, `api.eneftea.com` -> `ApiEnefteaCom`
pub fn logical_id(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

impl StackTemplate {
    pub fn render(graph: &StackGraph, description: &str, exports: &[Export]) -> Result<Self, GraphError> {
        let mut ids: BTreeMap<String, String> = BTreeMap::new();
        let mut taken = BTreeSet::new();
        for descriptor in graph.descriptors() {
            let id = logical_id(&descriptor.name);
            if !taken.insert(id.clone()) {
                return Err(GraphError::DuplicateName(id));
            }
            ids.insert(descriptor.name.clone(), id);
        }

        let mut resources = BTreeMap::new();
        for descriptor in graph.topological_order()? {
            let depends_on = descriptor
                .depends_on
                .iter()
                .filter_map(|name| ids.get(name).cloned())
                .collect();
            resources.insert(
                ids[&descriptor.name].clone(),
                TemplateResource {
                    ty: descriptor.kind.type_token().to_string(),
                    properties: rename_references(&descriptor.properties, &ids),
                    depends_on,
                    metadata: json!({
                        "LogicalName": descriptor.name,
                        "Provider": descriptor.provider,
                    }),
                },
            );
        }

        let mut outputs = BTreeMap::new();
        for export in exports {
            if !ids.contains_key(&export.value.resource) {
                return Err(GraphError::UnknownPredecessor {
                    resource: export.key.clone(),
                    missing: export.value.resource.clone(),
                });
            }
            outputs.insert(
                export.key.clone(),
                TemplateOutput {
                    description: export.description.clone(),
                    value: rename_references(&export.value.to_value(), &ids),
                },
            );
        }

        Ok(Self {
            version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: description.to_string(),
            resources,
            outputs,
        })
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn rename_references(value: &Value, ids: &BTreeMap<String, String>) -> Value {
    let rename = |name: &str| ids.get(name).cloned().unwrap_or_else(|| name.to_string());
    match value {
        Value::Object(map) if map.len() == 1 => {
            if let Some(Value::String(name)) = map.get("Ref") {
                return json!({ "Ref": rename(name) });
            }
            if let Some(Value::Array(pair)) = map.get("Fn::GetAtt") {
                if let [Value::String(name), Value::String(attribute)] = pair.as_slice() {
                    return json!({ "Fn::GetAtt": [rename(name), attribute] });
                }
            }
            rename_object(map, ids)
        }
        Value::Object(map) => rename_object(map, ids),
        Value::Array(items) => Value::Array(items.iter().map(|v| rename_references(v, ids)).collect()),
        other => other.clone(),
    }
}

fn rename_object(map: &Map<String, Value>, ids: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), rename_references(v, ids)))
            .collect(),
    )
}
