//! Deterministic chapter ordering.

use std::collections::BTreeSet;

use tracing::debug;

use repotutor_shared::{Abstraction, ChapterPlan, RelationshipGraph};

/// Order abstractions for reading.
///
/// Abstractions with fewer distinct incoming edges from other abstractions
/// come first; ties keep extraction order. Self-edges, repeated edges and
/// out-of-range indices do not count. Total on any graph, cycles included.
pub fn order_chapters(abstractions: &[Abstraction], graph: &RelationshipGraph) -> ChapterPlan {
    let n = abstractions.len();

    let edges: BTreeSet<(usize, usize)> = graph
        .relationships
        .iter()
        .filter(|r| !r.is_self_edge() && r.source_index < n && r.target_index < n)
        .map(|r| (r.source_index, r.target_index))
        .collect();

    let mut incoming = vec![0usize; n];
    for &(_, target) in &edges {
        incoming[target] += 1;
    }

    let plan = ChapterPlan::ranked_by(n, |&i| (incoming[i], i));
    debug!(order = ?plan.as_slice(), "chapter order computed");
    plan
}
