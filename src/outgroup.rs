use crate::{
    hits::{HitTable, SearchHit},
    plan::OutgroupTask,
    record::SequenceRecord,
};
use itertools::Itertools;
use log::{debug, info, warn};
use std::collections::HashMap;

/// Outgroup chosen for one (group, gene) dataset
#[derive(Debug, Clone, PartialEq)]
pub struct OutgroupResult {
    pub gene: String,
    pub group: String,

    /// Members of the single closest other group
    pub outgroup: Vec<SequenceRecord>,

    /// `outgroup` followed by the ingroup
    pub combined: Vec<SequenceRecord>,
}

// --------------------------------------------------
/// Select up to `max_outgroup` records from the single closest other group.
///
/// Candidates are the rows against other groups scoring below the weakest
/// same-group row. If that leaves no group, or no group with enough rows,
/// the floor is dropped. In concatenated mode there is never a floor.
/// Candidates are taken best first until one group collects
/// `max_outgroup` distinct subjects; otherwise the largest group wins.
pub fn append_outgroup(task: OutgroupTask) -> OutgroupResult {
    info!("Appending outgroup on group:{}, Gene:{}", task.group, task.gene);

    let mut candidates = candidate_rows(&task);
    candidates.sort_by(|a, b| b.bitscore.total_cmp(&a.bitscore));

    let mut selected: HashMap<&str, Vec<&SequenceRecord>> = HashMap::new();
    let mut largest: Option<&str> = None;
    let mut largest_count = 0;

    for hit in candidates {
        let (Some(subject_group), Some(subject)) =
            (hit.subject_group.label(), task.subjects.get(&hit.sseqid))
        else {
            debug!("No record for outgroup candidate {}", hit.sseqid);
            continue;
        };

        let members = selected.entry(subject_group).or_default();
        if !members.iter().any(|member| member.hash == subject.hash) {
            members.push(subject);
        }

        if members.len() >= task.max_outgroup {
            info!(
                "Outgroup [{subject_group}] selected to [{}]\n {}",
                task.group,
                members.iter().map(|member| &member.id).join("\n ")
            );
            return finish(&task, members);
        }

        if members.len() > largest_count {
            largest_count = members.len();
            largest = Some(subject_group);
        }
    }

    warn!(
        "Not enough sequences are available for outgroup number {} in {}, \
        using '{}' despite of lower number",
        task.max_outgroup,
        task.group,
        largest.unwrap_or("")
    );

    match largest.and_then(|group| selected.get(group)) {
        Some(members) => {
            info!(
                "Final outgroup selection for group {} : {}",
                task.group,
                members.iter().map(|member| &member.id).join(", ")
            );
            finish(&task, members)
        }
        None => {
            warn!("No outgroup sequence available for {}", task.group);
            finish(&task, &[])
        }
    }
}

// --------------------------------------------------
fn finish(task: &OutgroupTask, members: &[&SequenceRecord]) -> OutgroupResult {
    let outgroup: Vec<SequenceRecord> =
        members.iter().map(|&member| member.clone()).collect();
    let combined = outgroup
        .iter()
        .chain(task.ingroup.iter())
        .cloned()
        .collect();

    OutgroupResult {
        gene: task.gene.clone(),
        group: task.group.clone(),
        outgroup,
        combined,
    }
}

// --------------------------------------------------
fn candidate_rows(task: &OutgroupTask) -> Vec<&SearchHit> {
    let unconstrained = || other_groups(&task.hits, &task.group, f64::INFINITY);
    if task.is_concatenated() {
        return unconstrained();
    }

    let floor = task
        .hits
        .iter()
        .filter(|hit| hit.subject_group.is(&task.group))
        .map(|hit| hit.bitscore)
        .min_by(f64::total_cmp)
        .unwrap_or(f64::INFINITY);

    let constrained = other_groups(&task.hits, &task.group, floor);
    let counts = constrained
        .iter()
        .copied()
        .counts_by(|hit| hit.subject_group.label());

    if counts.is_empty() {
        warn!(
            "No outgroup sequences matched below the in-group score {floor} \
            for group {} | gene {}. There might be outlier sequence that does \
            not matches to group. Trying flexible cutoff",
            task.group, task.gene
        );
        unconstrained()
    } else if counts.values().max().is_some_and(|&max| max < task.max_outgroup) {
        warn!(
            "Not enough outgroup sequences matched for group {} | gene {}. \
            There might be outlier sequence that does not matches to group. \
            Trying flexible cutoff",
            task.group, task.gene
        );
        unconstrained()
    } else {
        constrained
    }
}

// --------------------------------------------------
/// Positive rows against other resolved groups, scoring below `floor`
fn other_groups<'a>(hits: &'a HitTable, group: &str, floor: f64) -> Vec<&'a SearchHit> {
    hits.iter()
        .filter(|hit| {
            hit.bitscore < floor
                && hit.bitscore > 0.
                && hit.subject_group.is_resolved()
                && !hit.subject_group.is(group)
        })
        .collect()
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::append_outgroup;
    use crate::{
        hits::{hit, HitTable},
        plan::OutgroupTask,
        record::{record, DataType, Group, SequenceRecord, CONCATENATED},
    };
    use pretty_assertions::assert_eq;

    fn member(hash: &str, group: &str) -> SequenceRecord {
        let mut rec = record(hash, group, DataType::Db, &["ITS"]);
        rec.adjusted_group = Group::from(group);
        rec
    }

    fn task(gene: &str, rows: Vec<(&str, f64, &str)>, max_outgroup: usize) -> OutgroupTask {
        let hits = HitTable::new(
            rows.iter()
                .map(|&(sseqid, bitscore, group)| hit("a0", sseqid, bitscore, group))
                .collect(),
        );
        let subjects = rows
            .iter()
            .map(|&(sseqid, _, group)| (sseqid.to_string(), member(sseqid, group)))
            .collect();

        OutgroupTask {
            gene: gene.to_string(),
            group: "A".to_string(),
            hits,
            ingroup: vec![member("a0", "A"), member("a1", "A")],
            subjects,
            max_outgroup,
        }
    }

    fn hashes(records: &[SequenceRecord]) -> Vec<&str> {
        records.iter().map(|rec| rec.hash.as_str()).collect()
    }

    #[test]
    fn test_first_group_to_fill_wins() {
        let rows = vec![
            ("a1", 250., "A"),
            ("a2", 200., "A"),
            ("b1", 190., "B"),
            ("c1", 185., "C"),
            ("b2", 170., "B"),
            ("b3", 150., "B"),
            ("c2", 140., "C"),
            ("c3", 130., "C"),
            ("c4", 120., "C"),
        ];
        let result = append_outgroup(task("ITS", rows, 3));
        assert_eq!(result.gene, "ITS");
        assert_eq!(result.group, "A");
        assert_eq!(hashes(&result.outgroup), ["b1", "b2", "b3"]);
        assert_eq!(hashes(&result.combined), ["b1", "b2", "b3", "a0", "a1"]);
    }

    #[test]
    fn test_floor_excludes_close_hits() {
        // d1 and d2 score above the weakest in-group row
        let rows = vec![
            ("d1", 400., "D"),
            ("a1", 300., "A"),
            ("d2", 250., "D"),
            ("a2", 200., "A"),
            ("b1", 190., "B"),
            ("b2", 170., "B"),
            ("d3", 160., "D"),
        ];
        let result = append_outgroup(task("ITS", rows, 2));
        assert_eq!(hashes(&result.outgroup), ["b1", "b2"]);
    }

    #[test]
    fn test_flexible_cutoff_when_too_few() {
        // Below the floor only one B row remains, so the floor is dropped
        let rows = vec![
            ("b1", 400., "B"),
            ("b2", 300., "B"),
            ("a1", 200., "A"),
            ("b3", 100., "B"),
        ];
        let result = append_outgroup(task("ITS", rows, 3));
        assert_eq!(hashes(&result.outgroup), ["b1", "b2", "b3"]);
    }

    #[test]
    fn test_flexible_cutoff_when_none_below_floor() {
        let rows = vec![("b1", 400., "B"), ("a1", 200., "A")];
        let result = append_outgroup(task("ITS", rows, 3));
        assert_eq!(hashes(&result.outgroup), ["b1"]);
    }

    #[test]
    fn test_no_same_group_rows() {
        let rows = vec![("b1", 400., "B"), ("c1", 300., "C"), ("c2", 200., "C")];
        let result = append_outgroup(task("ITS", rows, 2));
        assert_eq!(hashes(&result.outgroup), ["c1", "c2"]);
    }

    #[test]
    fn test_exhaustion_takes_largest_group() {
        let rows = vec![
            ("b1", 190., "B"),
            ("c1", 185., "C"),
            ("c2", 170., "C"),
            ("b2", 160., "B"),
            ("e1", 150., "E"),
        ];
        let result = append_outgroup(task("ITS", rows, 5));

        // B and C tie at two members, C filled up first
        assert_eq!(hashes(&result.outgroup), ["c1", "c2"]);
        assert!(result.outgroup.len() <= 5);
    }

    #[test]
    fn test_duplicate_subjects_counted_once() {
        let rows = vec![
            ("b1", 190., "B"),
            ("b1", 180., "B"),
            ("b1", 170., "B"),
            ("b2", 160., "B"),
        ];
        let result = append_outgroup(task("ITS", rows, 3));
        assert_eq!(hashes(&result.outgroup), ["b1", "b2"]);
    }

    #[test]
    fn test_no_outgroup_available() {
        let rows = vec![("a1", 300., "A"), ("b1", 0., "B"), ("x", 50., "")];
        let result = append_outgroup(task("ITS", rows, 3));
        assert!(result.outgroup.is_empty());
        assert_eq!(hashes(&result.combined), ["a0", "a1"]);
    }

    #[test]
    fn test_concatenated_ignores_floor() {
        let rows = vec![("b1", 400., "B"), ("a1", 200., "A"), ("b2", 100., "B")];
        let result = append_outgroup(task(CONCATENATED, rows, 2));
        assert_eq!(result.gene, CONCATENATED);
        assert_eq!(hashes(&result.outgroup), ["b1", "b2"]);
    }

    #[test]
    fn test_outgroup_is_single_group() {
        let rows = vec![
            ("b1", 190., "B"),
            ("c1", 185., "C"),
            ("b2", 170., "B"),
            ("c2", 140., "C"),
            ("c3", 130., "C"),
        ];
        let result = append_outgroup(task("ITS", rows, 3));
        assert!(result
            .outgroup
            .iter()
            .all(|rec| rec.adjusted_group == Group::from("C")));
        assert_eq!(result.outgroup.len(), 3);
    }
}
