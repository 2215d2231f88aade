use crate::{
    hits::{HitTable, SearchHit},
    record::{DataType, Group, SequenceRecord},
};
use itertools::Itertools;
use log::{info, warn};

/// What clustering did with one record
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOutcome {
    pub record: SequenceRecord,

    /// Group whose search rows the outgroup phase will consult
    pub group: Option<String>,

    /// Distinct subject groups above the cutoff, best first. Empty when
    /// the rows were not consulted.
    pub candidates: Vec<String>,

    /// An earlier adjusted group is missing from `candidates`
    pub colliding: bool,
}

// --------------------------------------------------
/// Decide the adjusted group of one record from its own search rows.
///
/// Records without rows keep their declared group, and db records with a
/// declared group are never second-guessed. Otherwise the distinct subject
/// groups among the rows scoring above `top * cutoff` are the candidates:
/// one candidate is taken, several are reported and the first (best
/// scoring) one is taken, none leaves the record unresolved. A record that
/// already carries an adjusted group is only checked, not reassigned.
pub fn cluster(
    mut record: SequenceRecord,
    hits: Option<HitTable>,
    cutoff: f64,
) -> ClusterOutcome {
    let mut hits = match hits {
        Some(hits) if !hits.is_empty() => hits,
        _ => {
            record.adjusted_group = record.group.clone();
            return ClusterOutcome {
                record,
                group: None,
                candidates: vec![],
                colliding: false,
            };
        }
    };

    if record.datatype == DataType::Db {
        if let Some(group) = record.group.label().map(str::to_string) {
            record.adjusted_group = record.group.clone();
            return ClusterOutcome {
                record,
                group: Some(group),
                candidates: vec![],
                colliding: false,
            };
        }
    }

    hits.sort_by_bitscore();
    let candidates: Vec<String> = hits
        .above_cutoff(cutoff)
        .into_iter()
        .filter_map(|hit| hit.subject_group.label())
        .unique()
        .map(str::to_string)
        .collect();

    let mut colliding = false;
    if record.adjusted_group.is_resolved() {
        let current = record.adjusted_group.to_string();
        if !candidates.contains(&current) {
            warn!("Clustering result colliding in {}", record.id);
            colliding = true;
        }
    } else {
        match candidates.as_slice() {
            [] => warn!(
                "Query seq in {} cannot be assigned to group. Check sequence",
                record.id
            ),
            [only] => {
                record.adjusted_group = Group::from(only.as_str());
            }
            [first, ..] => {
                warn!(
                    "Query seq in {} has multiple matches to group, [{}]",
                    record.id,
                    candidates.join(", ")
                );
                record.adjusted_group = Group::from(first.as_str());
            }
        }

        if record.adjusted_group.is_resolved() {
            info!(
                "{} {} has clustered to {}",
                record.id, record.description, record.adjusted_group
            );
        }
    }

    ClusterOutcome {
        group: candidates.first().cloned(),
        record,
        candidates,
        colliding,
    }
}

// --------------------------------------------------
/// Attribute one unclassified sequence to a gene.
///
/// `hits` are the rows of this sequence against every gene's database,
/// each tagged with its gene. Unlike group assignment, several matching
/// genes resolve to the gene with the best score, since the sequence is
/// used directly. Returns the gene written to `record.seq`, if any.
pub fn assign_gene(
    record: &mut SequenceRecord,
    seq: &str,
    hits: Option<&HitTable>,
    cutoff: f64,
) -> Option<String> {
    let rows: Vec<&SearchHit> = match hits {
        Some(hits) => hits.above_cutoff(cutoff),
        None => vec![],
    };
    let genes: Vec<&str> =
        rows.iter().map(|hit| hit.gene.as_str()).unique().collect();

    let gene = match genes.as_slice() {
        [] => {
            warn!(
                "Query seq in {} cannot be assigned to gene. Check sequence. Skipping {}",
                record.id, record.id
            );
            return None;
        }
        [only] => only.to_string(),
        [..] => {
            warn!(
                "Query seq in {} has multiple matches to gene, [{}]",
                record.id,
                genes.join(", ")
            );
            best_scoring(&rows)?.gene.clone()
        }
    };

    record.update_seq(&gene, seq);
    Some(gene)
}

// --------------------------------------------------
/// Highest bitscore, first row on ties
fn best_scoring<'a>(rows: &[&'a SearchHit]) -> Option<&'a SearchHit> {
    rows.iter().copied().fold(None::<&'a SearchHit>, |best, hit| match best {
        Some(best) if best.bitscore >= hit.bitscore => Some(best),
        _ => Some(hit),
    })
}
