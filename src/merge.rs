use crate::{
    assign::ClusterOutcome,
    outgroup::OutgroupResult,
    record::{Dataset, SequenceRecord},
};
use itertools::Itertools;
use log::{debug, warn};
use std::collections::HashMap;

// --------------------------------------------------
/// Replace clustered records by hash and recompute the known groups.
/// In query-only mode db records are put back on their declared group.
pub fn merge_clusters(
    dataset: &mut Dataset,
    outcomes: Vec<ClusterOutcome>,
    query_only: bool,
) {
    dataset.groups = outcomes
        .iter()
        .filter_map(|outcome| outcome.group.clone())
        .unique()
        .collect();

    let mut positions: HashMap<String, usize> = dataset
        .records
        .iter()
        .enumerate()
        .map(|(i, rec)| (rec.hash.clone(), i))
        .collect();

    for ClusterOutcome { record, .. } in outcomes {
        match positions.get(&record.hash) {
            Some(&i) => dataset.records[i] = record,
            None => {
                positions.insert(record.hash.clone(), dataset.records.len());
                dataset.records.push(record);
            }
        }
    }

    if query_only {
        for rec in dataset.records.iter_mut().filter(|rec| rec.is_db()) {
            rec.adjusted_group = rec.group.clone();
        }
    }

    for rec in &dataset.records {
        debug!(
            "{} {:?} {} {}",
            rec.id, rec.datatype, rec.group, rec.adjusted_group
        );
    }
}

// --------------------------------------------------
/// Store each selected outgroup on its dataset. Members without a species
/// for the gene get their own original species.
pub fn merge_outgroups(dataset: &mut Dataset, results: Vec<OutgroupResult>) {
    let positions: HashMap<String, usize> = dataset
        .records
        .iter()
        .enumerate()
        .map(|(i, rec)| (rec.hash.clone(), i))
        .collect();

    let records = &mut dataset.records;
    let datasets = &mut dataset.datasets;
    for result in results {
        let OutgroupResult {
            gene,
            group,
            outgroup,
            combined,
        } = result;

        let Some(target) = datasets
            .get_mut(&group)
            .and_then(|genes| genes.get_mut(&gene))
        else {
            warn!("No {group} / {gene} dataset to receive outgroup");
            continue;
        };

        debug!(
            "{group} / {gene}: {} outgroup, {} total",
            outgroup.len(),
            combined.len()
        );

        target.outgroup = outgroup
            .into_iter()
            .map(|mut member| {
                default_species(&mut member, &gene);
                if let Some(&i) = positions.get(&member.hash) {
                    default_species(&mut records[i], &gene);
                }
                member
            })
            .collect();
    }
}

// --------------------------------------------------
fn default_species(rec: &mut SequenceRecord, gene: &str) {
    if !rec.bygene_species.contains_key(gene) {
        let species = rec.ori_species.clone();
        rec.bygene_species.insert(gene.to_string(), species);
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{merge_clusters, merge_outgroups};
    use crate::{
        assign::ClusterOutcome,
        outgroup::OutgroupResult,
        record::{record, DataType, Dataset, Group},
    };
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn outcome(hash: &str, adjusted: &str, group: Option<&str>) -> ClusterOutcome {
        let mut rec = record(hash, "", DataType::Query, &["ITS"]);
        rec.adjusted_group = Group::from(adjusted);
        ClusterOutcome {
            record: rec,
            group: group.map(str::to_string),
            candidates: group.into_iter().map(str::to_string).collect(),
            colliding: false,
        }
    }

    #[test]
    fn test_merge_clusters() -> Result<()> {
        let mut db = record("d1", "A", DataType::Db, &["ITS"]);
        db.adjusted_group = Group::from("B");
        let mut dataset = Dataset::new(vec![
            record("q1", "", DataType::Query, &["ITS"]),
            db,
            record("q2", "", DataType::Query, &["ITS"]),
        ])?;

        merge_clusters(
            &mut dataset,
            vec![
                outcome("q2", "B", Some("B")),
                outcome("q1", "A", Some("A")),
                outcome("q3", "", None),
                outcome("q4", "B", Some("B")),
            ],
            true,
        );

        let hashes: Vec<_> = dataset.records.iter().map(|r| r.hash.as_str()).collect();
        assert_eq!(hashes, ["q1", "d1", "q2", "q3", "q4"]);
        assert_eq!(dataset.records[0].adjusted_group, Group::from("A"));
        assert_eq!(dataset.records[2].adjusted_group, Group::from("B"));
        assert_eq!(dataset.groups, ["B", "A"]);

        // Query-only mode restores the declared group of db records
        assert_eq!(dataset.records[1].adjusted_group, Group::from("A"));
        Ok(())
    }

    #[test]
    fn test_merge_outgroups() -> Result<()> {
        let mut known = record("b1", "B", DataType::Db, &["ITS"]);
        known.bygene_species.insert("ITS".into(), "Fusarium solani".into());
        let mut dataset = Dataset::new(vec![known.clone(), record("b2", "B", DataType::Db, &["ITS"])])?;
        dataset.insert_dataset("A", "ITS");

        let fresh = record("b2", "B", DataType::Db, &["ITS"]);
        merge_outgroups(
            &mut dataset,
            vec![
                OutgroupResult {
                    gene: "ITS".into(),
                    group: "A".into(),
                    outgroup: vec![known, fresh.clone()],
                    combined: vec![],
                },
                OutgroupResult {
                    gene: "TEF1".into(),
                    group: "A".into(),
                    outgroup: vec![fresh],
                    combined: vec![],
                },
            ],
        );

        let outgroup = &dataset.datasets["A"]["ITS"].outgroup;
        assert_eq!(outgroup.len(), 2);
        assert_eq!(outgroup[0].bygene_species["ITS"], "Fusarium solani");
        assert_eq!(outgroup[1].bygene_species["ITS"], "b2 species");
        assert_eq!(dataset.records[1].bygene_species["ITS"], "b2 species");
        assert!(!dataset.exist_dataset("A", "TEF1"));
        Ok(())
    }
}
