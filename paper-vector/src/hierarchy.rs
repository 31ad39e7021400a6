use std::collections::BTreeMap;

use crate::types::{AssignedPoint, HierarchyNode};

pub const ROOT_NAME: &str = "root";

/// Build the containment tree `root -> cluster_<label> -> <record id>`.
///
/// Clusters are ordered by label and members keep input order. Noise points
/// are left out; with no clustered points the root has no children.
pub fn build_hierarchy(points: &[AssignedPoint]) -> HierarchyNode {
	let mut groups: BTreeMap<usize, Vec<HierarchyNode>> = BTreeMap::new();
	for point in points {
		if let Some(label) = point.assignment.cluster() {
			groups
				.entry(label)
				.or_default()
				.push(HierarchyNode::leaf(point.point.record_id.clone()));
		}
	}

	let children = groups
		.into_iter()
		.map(|(label, leaves)| HierarchyNode::branch(format!("cluster_{}", label), leaves))
		.collect();
	HierarchyNode::branch(ROOT_NAME, children)
}
