use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

const SEMANTIC_TYPES: &[&str] = &["text", "match_only_text", "search_as_you_type"];

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FieldInfo {
	pub field_type: String,
	/// Names of multi-field sub-fields, such as `keyword` for `title.keyword`.
	pub subfields: Vec<String>,
	pub keyword_subfield: bool,
}
impl FieldInfo {
	pub fn is_semantic(&self) -> bool {
		SEMANTIC_TYPES.contains(&self.field_type.as_str())
	}
}

/// Flattened view of an index mapping: dotted field path to type information.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FieldMap {
	fields: BTreeMap<String, FieldInfo>,
}
impl FieldMap {
	/// Accepts `{properties}`, `{mappings: {properties}}` or a raw `_mapping` response keyed by
	/// index name.
	pub fn from_mapping(mapping: &Value) -> Self {
		let mut fields = BTreeMap::new();
		let Some(properties) = locate_properties(mapping) else {
			return Self { fields };
		};
		let mut pending: Vec<(String, &Map<String, Value>)> = vec![(String::new(), properties)];

		while let Some((prefix, properties)) = pending.pop() {
			for (name, definition) in properties {
				let path = if prefix.is_empty() { name.clone() } else { format!("{prefix}.{name}") };

				if let Some(field_type) = definition.get("type").and_then(Value::as_str) {
					let subfields: Vec<(String, String)> = definition
						.get("fields")
						.and_then(Value::as_object)
						.map(|fields| {
							fields
								.iter()
								.map(|(sub, def)| {
									let sub_type =
										def.get("type").and_then(Value::as_str).unwrap_or_default();

									(sub.clone(), sub_type.to_string())
								})
								.collect()
						})
						.unwrap_or_default();

					fields.insert(
						path.clone(),
						FieldInfo {
							field_type: field_type.to_string(),
							keyword_subfield: subfields
								.iter()
								.any(|(_, sub_type)| sub_type == "keyword"),
							subfields: subfields.into_iter().map(|(sub, _)| sub).collect(),
						},
					);
				}
				if let Some(children) = definition.get("properties").and_then(Value::as_object) {
					pending.push((path, children));
				}
			}
		}

		Self { fields }
	}

	pub fn get(&self, name: &str) -> Option<&FieldInfo> {
		self.fields.get(name)
	}

	pub fn len(&self) -> usize {
		self.fields.len()
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.fields.keys().map(String::as_str)
	}

	/// Maps a referenced name to its schema field, resolving multi-field suffixes to the parent.
	pub fn resolve<'a>(&'a self, name: &str) -> Option<&'a str> {
		if let Some((key, _)) = self.fields.get_key_value(name) {
			return Some(key.as_str());
		}

		let (parent, sub) = name.rsplit_once('.')?;
		let (key, info) = self.fields.get_key_value(parent)?;

		(sub == "keyword" || info.subfields.iter().any(|known| known == sub)).then_some(key.as_str())
	}
}

fn locate_properties(mapping: &Value) -> Option<&Map<String, Value>> {
	if let Some(properties) = mapping.get("properties").and_then(Value::as_object) {
		return Some(properties);
	}
	if let Some(mappings) = mapping.get("mappings") {
		return locate_properties(mappings);
	}

	// `GET /{index}/_mapping` wraps the mapping in an object keyed by the concrete index name.
	mapping
		.as_object()
		.and_then(|indices| indices.values().next())
		.and_then(|index| index.get("mappings"))
		.and_then(locate_properties)
}
