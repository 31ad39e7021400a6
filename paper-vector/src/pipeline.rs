// ---------------------------------------------------------------------------
// Cluster map: scope -> reduce -> cluster -> centroids -> hierarchy
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clustering::{self, ClusterParams};
use crate::error::VectorError;
use crate::hierarchy::build_hierarchy;
use crate::kv::KeyValueStore;
use crate::reduction::{self, ReductionParams};
use crate::store::RecordStore;
use crate::types::{AssignedPoint, Cluster, HierarchyNode, ReducedPoint, ScopeFilter};

/// Space in which cluster centroids are computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CentroidSpace {
	#[default]
	Reduced,
	Original,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterOptions {
	pub reduction: ReductionParams,
	pub clustering: ClusterParams,
	pub centroid_space: CentroidSpace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReport {
	pub points: Vec<AssignedPoint>,
	pub clusters: Vec<Cluster>,
	pub noise: Vec<String>,
	pub hierarchy: HierarchyNode,
}

impl ClusterReport {
	fn empty() -> Self {
		Self {
			points: Vec::new(),
			clusters: Vec::new(),
			noise: Vec::new(),
			hierarchy: build_hierarchy(&[]),
		}
	}
}

/// Cluster every record in scope and build the report.
///
/// Records whose dimension differs from the most common dimension in the
/// scope are left out (ties favour the smaller dimension).
pub fn cluster_scope<K: KeyValueStore>(
	store: &RecordStore<K>,
	filter: Option<&ScopeFilter>,
	options: &ClusterOptions,
) -> Result<ClusterReport, VectorError> {
	options.reduction.validate()?;
	options.clustering.validate()?;

	let records = store.list(filter).collect::<Result<Vec<_>, _>>()?;
	if records.is_empty() {
		tracing::debug!("No records in scope; empty cluster report");
		return Ok(ClusterReport::empty());
	}

	let mut by_dimension: BTreeMap<usize, usize> = BTreeMap::new();
	for record in &records {
		*by_dimension.entry(record.embedding.len()).or_default() += 1;
	}
	let modal = by_dimension
		.iter()
		.max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
		.map(|(&dim, _)| dim)
		.unwrap_or_default();

	let (ids, embeddings): (Vec<String>, Vec<Vec<f32>>) = records
		.into_iter()
		.filter(|r| {
			let keep = r.embedding.len() == modal;
			if !keep {
				tracing::warn!(
					id = %r.id,
					expected = modal,
					actual = r.embedding.len(),
					"Skipping record with mismatched dimension"
				);
			}
			keep
		})
		.map(|r| (r.id, r.embedding))
		.unzip();

	let reduced = reduction::reduce(&embeddings, &options.reduction)?;
	let assignments = clustering::cluster(&reduced, &options.clustering)?;

	let centroid_source = match options.centroid_space {
		CentroidSpace::Reduced => &reduced,
		CentroidSpace::Original => &embeddings,
	};
	let clusters: Vec<Cluster> = clustering::centroids(centroid_source, &assignments)
		.into_iter()
		.map(|(label, centroid)| Cluster {
			label,
			name: format!("Cluster {}", label),
			member_ids: ids
				.iter()
				.zip(&assignments)
				.filter(|(_, a)| a.cluster() == Some(label))
				.map(|(id, _)| id.clone())
				.collect(),
			centroid,
		})
		.collect();

	let points: Vec<AssignedPoint> = ids
		.into_iter()
		.zip(reduced)
		.zip(&assignments)
		.map(|((record_id, coords), &assignment)| AssignedPoint {
			point: ReducedPoint { record_id, coords },
			assignment,
		})
		.collect();
	let noise: Vec<String> = points
		.iter()
		.filter(|p| p.assignment.is_noise())
		.map(|p| p.point.record_id.clone())
		.collect();
	let hierarchy = build_hierarchy(&points);

	tracing::info!(
		points = points.len(),
		clusters = clusters.len(),
		noise = noise.len(),
		"Cluster map built"
	);

	Ok(ClusterReport {
		points,
		clusters,
		noise,
		hierarchy,
	})
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use super::*;
	use crate::kv::MemoryKv;
	use crate::types::{ClusterAssignment, Metadata};

	fn options() -> ClusterOptions {
		ClusterOptions {
			reduction: ReductionParams {
				n_neighbors: 4,
				n_epochs: Some(200),
				seed: Some(42),
				..ReductionParams::default()
			},
			..ClusterOptions::default()
		}
	}

	fn seeded_store() -> RecordStore<MemoryKv> {
		let mut s = RecordStore::open(MemoryKv::new());
		for i in 0..6 {
			let j = i as f32 * 0.01;
			s.put(
				&format!("a{}", i),
				"about transformers",
				&[1.0, j, 0.0, j],
				&Metadata::for_paper("p1"),
			)
			.unwrap();
			s.put(
				&format!("b{}", i),
				"about proteins",
				&[0.0, j, 1.0, 1.0 - j],
				&Metadata::for_paper("p1"),
			)
			.unwrap();
		}
		s.put("other", "elsewhere", &[1.0, 1.0, 1.0, 1.0], &Metadata::for_paper("p2"))
			.unwrap();
		s
	}

	#[test]
	fn empty_scope_gives_empty_report() {
		let s = seeded_store();
		let report = cluster_scope(&s, Some(&ScopeFilter::paper("none")), &options()).unwrap();
		assert!(report.points.is_empty());
		assert!(report.clusters.is_empty());
		assert_eq!(report.hierarchy, build_hierarchy(&[]));
	}

	#[test]
	fn report_is_consistent() {
		let s = seeded_store();
		let report = cluster_scope(&s, Some(&ScopeFilter::paper("p1")), &options()).unwrap();

		assert_eq!(report.points.len(), 12);
		assert!(report.points.iter().all(|p| p.point.coords.len() == 2));
		assert!(report.points.iter().all(|p| p.point.record_id != "other"));

		let members: usize = report.clusters.iter().map(|c| c.member_ids.len()).sum();
		assert_eq!(members + report.noise.len(), 12);
		assert_eq!(report.hierarchy.leaf_count(), members);
		assert_eq!(report.hierarchy.children.len(), report.clusters.len());
		for (i, cluster) in report.clusters.iter().enumerate() {
			assert_eq!(cluster.label, i);
			assert_eq!(cluster.name, format!("Cluster {}", i));
			assert_eq!(cluster.centroid.len(), 2);
		}
	}

	fn labels_of(report: &ClusterReport, prefix: &str) -> BTreeSet<ClusterAssignment> {
		report
			.points
			.iter()
			.filter(|p| p.point.record_id.starts_with(prefix))
			.map(|p| p.assignment)
			.collect()
	}

	#[test]
	fn separated_groups_form_two_clusters() {
		let s = seeded_store();
		let opts = ClusterOptions {
			clustering: ClusterParams {
				min_cluster_size: 4,
				..ClusterParams::default()
			},
			..options()
		};
		let report = cluster_scope(&s, Some(&ScopeFilter::paper("p1")), &opts).unwrap();
		assert_eq!(report.clusters.len(), 2);

		let clustered = |prefix: &str| -> Vec<ClusterAssignment> {
			labels_of(&report, prefix)
				.into_iter()
				.filter(|a| !a.is_noise())
				.collect()
		};
		let a = clustered("a");
		let b = clustered("b");
		assert_eq!(a.len(), 1, "group a split: {:?}", a);
		assert_eq!(b.len(), 1, "group b split: {:?}", b);
		assert_ne!(a, b);
		assert!(report.clusters.iter().all(|c| c.member_ids.len() >= 4));
	}

	#[test]
	fn identical_embeddings_share_a_label() {
		let mut s = RecordStore::open(MemoryKv::new());
		for i in 0..6 {
			s.put(&format!("x{}", i), "same chunk", &[1.0, 0.0, 0.0], &Metadata::for_paper("p"))
				.unwrap();
			s.put(&format!("y{}", i), "other chunk", &[0.0, 1.0, 0.0], &Metadata::for_paper("p"))
				.unwrap();
		}
		let opts = ClusterOptions {
			reduction: ReductionParams {
				seed: Some(7),
				..ReductionParams::default()
			},
			..ClusterOptions::default()
		};
		let report = cluster_scope(&s, None, &opts).unwrap();

		let x = labels_of(&report, "x");
		let y = labels_of(&report, "y");
		assert_eq!(x.len(), 1, "identical points split: {:?}", x);
		assert_eq!(y.len(), 1, "identical points split: {:?}", y);
		assert!(x.is_disjoint(&y));
		assert!(report.noise.is_empty());
		assert_eq!(report.clusters.len(), 2);

		let coords = |prefix: &str| -> Vec<Vec<f32>> {
			report
				.points
				.iter()
				.filter(|p| p.point.record_id.starts_with(prefix))
				.map(|p| p.point.coords.clone())
				.collect()
		};
		assert!(coords("x").windows(2).all(|w| w[0] == w[1]));
		assert!(coords("y").windows(2).all(|w| w[0] == w[1]));
	}

	#[test]
	fn original_space_centroids_have_input_dimension() {
		let s = seeded_store();
		let opts = ClusterOptions {
			centroid_space: CentroidSpace::Original,
			..options()
		};
		let report = cluster_scope(&s, Some(&ScopeFilter::paper("p1")), &opts).unwrap();
		assert!(report.clusters.iter().all(|c| c.centroid.len() == 4));
	}

	#[test]
	fn off_dimension_records_are_skipped() {
		let mut s = seeded_store();
		s.put("odd", "short", &[1.0, 0.0], &Metadata::for_paper("p1"))
			.unwrap();
		let report = cluster_scope(&s, Some(&ScopeFilter::paper("p1")), &options()).unwrap();
		assert_eq!(report.points.len(), 12);
		assert!(report.points.iter().all(|p| p.point.record_id != "odd"));
	}

	#[test]
	fn deterministic_with_seed() {
		let s = seeded_store();
		let a = cluster_scope(&s, None, &options()).unwrap();
		let b = cluster_scope(&s, None, &options()).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn single_record_is_noise() {
		let s = seeded_store();
		let report = cluster_scope(&s, Some(&ScopeFilter::paper("p2")), &options()).unwrap();
		assert_eq!(report.points.len(), 1);
		assert_eq!(report.noise, vec!["other".to_string()]);
		assert!(report.hierarchy.children.is_empty());
	}

	#[test]
	fn invalid_options_rejected() {
		let s = seeded_store();
		let opts = ClusterOptions {
			clustering: ClusterParams {
				min_cluster_size: 0,
				..ClusterParams::default()
			},
			..options()
		};
		assert!(matches!(
			cluster_scope(&s, None, &opts),
			Err(VectorError::Validation(_))
		));
	}
}
