//! Balanced k-means clustering step (§4.2, steps 1 and 3).

use super::hungarian::max_weight_assignment;
use super::Error;

/// Partition `leaves` into `ceil(N/fanout)` clusters of size `<= fanout`,
/// iterating balanced k-means + Hungarian re-assignment to a fixed point
/// (or `max_iters`, whichever comes first).
///
/// `cost` must return `None` for an unreachable pair; any such pair aborts
/// the whole call with [`Error::UnreachableLink`].
pub fn balanced_kmeans(
    leaves: &[String],
    fanout: usize,
    cost: impl Fn(&str, &str) -> Option<i64>,
    max_iters: usize,
) -> Result<Vec<Vec<String>>, Error> {
    assert!(fanout > 0, "fan-out constraint must be positive");

    let mut leaves = leaves.to_vec();
    leaves.sort();
    let n = leaves.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let num_clusters = n.div_ceil(fanout);

    // Initial assignment: chunk the lexicographically sorted leaves into
    // `num_clusters` groups of at most `fanout`. Slot -> cluster index is
    // fixed for the rest of the algorithm; only membership changes.
    let slot_cluster: Vec<usize> = (0..n).map(|i| (i / fanout).min(num_clusters - 1)).collect();
    let mut clusters: Vec<Vec<String>> = vec![Vec::new(); num_clusters];
    for (i, leaf) in leaves.iter().enumerate() {
        clusters[slot_cluster[i]].push(leaf.clone());
    }

    for _ in 0..max_iters {
        let cost_matrix = build_average_cost_matrix(&leaves, &slot_cluster, &clusters, &cost)?;

        // Hungarian matches slots (rows) to leaves (columns). Negate so the
        // max-weight assignment minimizes total link cost.
        let negated: Vec<Vec<i64>> = cost_matrix
            .iter()
            .map(|row| row.iter().map(|c| -c).collect())
            .collect();
        let assignment = max_weight_assignment(&negated);

        let mut new_clusters: Vec<Vec<String>> = vec![Vec::new(); num_clusters];
        for (slot, &leaf_idx) in assignment.iter().enumerate() {
            new_clusters[slot_cluster[slot]].push(leaves[leaf_idx].clone());
        }

        if clusters_equal_as_sets(&clusters, &new_clusters) {
            return Ok(new_clusters);
        }
        clusters = new_clusters;
    }

    Ok(clusters)
}

fn build_average_cost_matrix(
    leaves: &[String],
    slot_cluster: &[usize],
    clusters: &[Vec<String>],
    cost: &impl Fn(&str, &str) -> Option<i64>,
) -> Result<Vec<Vec<i64>>, Error> {
    let n = leaves.len();
    let mut matrix = vec![vec![0i64; n]; n];

    for slot in 0..n {
        let members = &clusters[slot_cluster[slot]];
        for (col, candidate) in leaves.iter().enumerate() {
            let mut total = 0i64;
            for member in members {
                match cost(candidate, member) {
                    Some(c) if c >= 0 => total += c,
                    _ => {
                        return Err(Error::UnreachableLink {
                            from: candidate.clone(),
                            to: member.clone(),
                        })
                    }
                }
            }
            matrix[slot][col] = total / members.len() as i64;
        }
    }

    Ok(matrix)
}

fn clusters_equal_as_sets(a: &[Vec<String>], b: &[Vec<String>]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(ca, cb)| {
        let mut ca = ca.clone();
        let mut cb = cb.clone();
        ca.sort();
        cb.sort();
        ca == cb
    })
}
