use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Key that scopes records to a single paper.
pub const SCOPE_KEY: &str = "paper_id";

/// A metadata value: either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
	Text(String),
	List(Vec<String>),
}

impl MetaValue {
	/// True when the value equals `needle`, or (for lists) contains it.
	pub fn matches(&self, needle: &str) -> bool {
		match self {
			Self::Text(s) => s == needle,
			Self::List(items) => items.iter().any(|s| s == needle),
		}
	}
}

impl From<&str> for MetaValue {
	fn from(s: &str) -> Self {
		Self::Text(s.to_string())
	}
}

impl From<String> for MetaValue {
	fn from(s: String) -> Self {
		Self::Text(s)
	}
}

impl From<Vec<String>> for MetaValue {
	fn from(items: Vec<String>) -> Self {
		Self::List(items)
	}
}

/// Record metadata. Serialized as one flat JSON object: the known fields
/// sit next to the extension keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub paper_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub section: Option<String>,
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub kind: Option<String>,
	#[serde(flatten)]
	pub extra: BTreeMap<String, MetaValue>,
}

impl Metadata {
	pub fn for_paper(paper_id: impl Into<String>) -> Self {
		Self {
			paper_id: Some(paper_id.into()),
			..Self::default()
		}
	}

	pub fn with_section(mut self, section: impl Into<String>) -> Self {
		self.section = Some(section.into());
		self
	}

	pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
		self.kind = Some(kind.into());
		self
	}

	pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
		self.extra.insert(key.into(), value.into());
		self
	}

	/// Look up any key, known field or extension.
	pub fn get(&self, key: &str) -> Option<MetaValue> {
		match key {
			SCOPE_KEY => self.paper_id.clone().map(MetaValue::Text),
			"section" => self.section.clone().map(MetaValue::Text),
			"type" => self.kind.clone().map(MetaValue::Text),
			_ => self.extra.get(key).cloned(),
		}
	}

	fn matches(&self, key: &str, value: &str) -> bool {
		match key {
			SCOPE_KEY => self.paper_id.as_deref() == Some(value),
			"section" => self.section.as_deref() == Some(value),
			"type" => self.kind.as_deref() == Some(value),
			_ => self.extra.get(key).is_some_and(|v| v.matches(value)),
		}
	}
}

// ---------------------------------------------------------------------------
// Scope filter
// ---------------------------------------------------------------------------

/// Conjunction of `key = value` requirements on record metadata.
/// An empty filter matches every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeFilter(BTreeMap<String, String>);

impl ScopeFilter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Filter on the paper scope key.
	pub fn paper(paper_id: impl Into<String>) -> Self {
		Self::new().with(SCOPE_KEY, paper_id)
	}

	pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.0.insert(key.into(), value.into());
		self
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// A record lacking any filter key does not match.
	pub fn matches(&self, metadata: &Metadata) -> bool {
		self.0.iter().all(|(k, v)| metadata.matches(k, v))
	}
}

// ---------------------------------------------------------------------------
// Records and search results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
	pub id: String,
	pub text: String,
	pub embedding: Vec<f32>,
	pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
	pub record_id: String,
	pub score: f64,
	pub text: String,
	pub metadata: Metadata,
}

// ---------------------------------------------------------------------------
// Clustering
// ---------------------------------------------------------------------------

/// Distance metric shared by reduction and clustering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
	#[default]
	Euclidean,
	Cosine,
}

/// Cluster membership of one point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ClusterAssignment {
	Noise,
	Cluster(usize),
}

impl ClusterAssignment {
	/// Wire label: `-1` for noise.
	pub fn label(self) -> i64 {
		match self {
			Self::Noise => -1,
			Self::Cluster(label) => label as i64,
		}
	}

	pub fn cluster(self) -> Option<usize> {
		match self {
			Self::Noise => None,
			Self::Cluster(label) => Some(label),
		}
	}

	pub fn is_noise(self) -> bool {
		matches!(self, Self::Noise)
	}
}

impl From<ClusterAssignment> for i64 {
	fn from(assignment: ClusterAssignment) -> Self {
		assignment.label()
	}
}

impl TryFrom<i64> for ClusterAssignment {
	type Error = String;

	fn try_from(label: i64) -> Result<Self, Self::Error> {
		match label {
			-1 => Ok(Self::Noise),
			l if l >= 0 => Ok(Self::Cluster(l as usize)),
			l => Err(format!("invalid cluster label {}", l)),
		}
	}
}

impl fmt::Display for ClusterAssignment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Noise => write!(f, "noise"),
			Self::Cluster(label) => write!(f, "cluster_{}", label),
		}
	}
}

/// A record projected into the reduced space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReducedPoint {
	pub record_id: String,
	pub coords: Vec<f32>,
}

/// A reduced point together with its cluster assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedPoint {
	#[serde(flatten)]
	pub point: ReducedPoint,
	#[serde(rename = "label")]
	pub assignment: ClusterAssignment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
	pub label: usize,
	pub name: String,
	pub member_ids: Vec<String>,
	pub centroid: Vec<f32>,
}

/// Tree handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
	pub name: String,
	#[serde(default)]
	pub children: Vec<HierarchyNode>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<u32>,
}

impl HierarchyNode {
	pub fn branch(name: impl Into<String>, children: Vec<HierarchyNode>) -> Self {
		Self {
			name: name.into(),
			children,
			value: None,
		}
	}

	pub fn leaf(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			children: Vec::new(),
			value: Some(1),
		}
	}

	/// Number of leaves below (or at) this node.
	pub fn leaf_count(&self) -> usize {
		if self.children.is_empty() {
			usize::from(self.value.is_some())
		} else {
			self.children.iter().map(HierarchyNode::leaf_count).sum()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn metadata_serializes_flat() {
		let meta = Metadata::for_paper("2401.00001")
			.with_section("intro")
			.with_kind("chunk")
			.with_extra("authors", vec!["a".to_string(), "b".to_string()]);
		let json = serde_json::to_value(&meta).unwrap();
		assert_eq!(json["paper_id"], "2401.00001");
		assert_eq!(json["section"], "intro");
		assert_eq!(json["type"], "chunk");
		assert_eq!(json["authors"], serde_json::json!(["a", "b"]));

		let back: Metadata = serde_json::from_value(json).unwrap();
		assert_eq!(back, meta);
	}

	#[test]
	fn metadata_without_scope_key_deserializes() {
		let meta: Metadata = serde_json::from_str(r#"{"section":"abstract"}"#).unwrap();
		assert!(meta.paper_id.is_none());
		assert_eq!(meta.section.as_deref(), Some("abstract"));
		assert!(meta.extra.is_empty());
	}

	#[test]
	fn filter_requires_every_key() {
		let meta = Metadata::for_paper("p1").with_section("methods");
		assert!(ScopeFilter::new().matches(&meta));
		assert!(ScopeFilter::paper("p1").matches(&meta));
		assert!(ScopeFilter::paper("p1").with("section", "methods").matches(&meta));
		assert!(!ScopeFilter::paper("p1").with("section", "results").matches(&meta));
		assert!(!ScopeFilter::paper("p2").matches(&meta));
	}

	#[test]
	fn filter_excludes_records_missing_the_key() {
		let meta = Metadata::default().with_section("intro");
		assert!(!ScopeFilter::paper("p1").matches(&meta));
	}

	#[test]
	fn filter_matches_list_membership() {
		let meta = Metadata::for_paper("p1")
			.with_extra("tags", vec!["nlp".to_string(), "rag".to_string()]);
		assert!(ScopeFilter::new().with("tags", "rag").matches(&meta));
		assert!(!ScopeFilter::new().with("tags", "cv").matches(&meta));
	}

	#[test]
	fn assignment_wire_labels() {
		assert_eq!(ClusterAssignment::Noise.label(), -1);
		assert_eq!(ClusterAssignment::Cluster(3).label(), 3);
		assert_eq!(serde_json::to_value(ClusterAssignment::Noise).unwrap(), -1);
		let parsed: ClusterAssignment = serde_json::from_str("2").unwrap();
		assert_eq!(parsed, ClusterAssignment::Cluster(2));
		assert!(serde_json::from_str::<ClusterAssignment>("-5").is_err());
	}

	#[test]
	fn empty_root_serializes_with_children() {
		let root = HierarchyNode::branch("root", Vec::new());
		let json = serde_json::to_value(&root).unwrap();
		assert_eq!(json, serde_json::json!({ "name": "root", "children": [] }));
	}

	#[test]
	fn assigned_point_serializes_flat_label() {
		let point = AssignedPoint {
			point: ReducedPoint {
				record_id: "r1".into(),
				coords: vec![0.5, 1.5],
			},
			assignment: ClusterAssignment::Cluster(0),
		};
		let json = serde_json::to_value(&point).unwrap();
		assert_eq!(json["recordId"], "r1");
		assert_eq!(json["label"], 0);
		assert_eq!(json["coords"], serde_json::json!([0.5, 1.5]));
	}
}
