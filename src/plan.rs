use crate::{
    hits::{HitKey, HitTable},
    record::{DataType, Dataset, SequenceRecord, CONCATENATED},
    Config,
};
use anyhow::{bail, Result};
use itertools::Itertools;
use log::{debug, warn};
use std::collections::HashMap;

/// Everything one group-assignment worker needs
#[derive(Debug, Clone)]
pub struct ClusterTask {
    pub record: SequenceRecord,
    pub hits: Option<HitTable>,
    pub cutoff: f64,
}

/// Everything one outgroup-selection worker needs
#[derive(Debug, Clone)]
pub struct OutgroupTask {
    /// Gene name, or `CONCATENATED`
    pub gene: String,
    pub group: String,

    /// Rows whose query belongs to `group`, best first
    pub hits: HitTable,

    /// Records currently clustered into `group`
    pub ingroup: Vec<SequenceRecord>,

    /// Records named as subjects in `hits`, by hash
    pub subjects: HashMap<String, SequenceRecord>,

    pub max_outgroup: usize,
}

impl OutgroupTask {
    pub fn is_concatenated(&self) -> bool {
        self.gene == CONCATENATED
    }
}

// --------------------------------------------------
/// One task per record to cluster. Records carrying several genes are
/// clustered on the gene whose rows hold the best score, unless the
/// concatenated search is in use.
pub fn cluster_tasks(
    dataset: &Dataset,
    config: &Config,
) -> Result<Vec<ClusterTask>> {
    if dataset.query_genes.is_empty() {
        bail!("No possible query genes were selected for clustering");
    }

    let cutoff = config.cluster.cutoff;
    let records = dataset
        .records
        .iter()
        .filter(|rec| !(config.queryonly && rec.datatype == DataType::Db));

    let mut tasks = vec![];
    match (&dataset.concatenated_hits, dataset.query_genes.len()) {
        (Some(concatenated), n) if n > 1 => {
            let index = concatenated.index_by(HitKey::Query);
            for rec in records {
                tasks.push(ClusterTask {
                    record: rec.clone(),
                    hits: index.get(&rec.hash).cloned(),
                    cutoff,
                });
            }
        }
        _ => {
            let indexes: HashMap<&str, _> = dataset
                .query_genes
                .iter()
                .filter_map(|gene| {
                    dataset
                        .gene_hits
                        .get(gene)
                        .map(|table| (gene.as_str(), table.index_by(HitKey::Query)))
                })
                .collect();

            let mut multigene = vec![];
            for rec in records {
                let mut hits: Option<&HitTable> = None;
                for gene in rec.seq.keys() {
                    let Some(found) = indexes
                        .get(gene.as_str())
                        .and_then(|index| index.get(&rec.hash))
                    else {
                        debug!("No {gene} search rows for {}", rec.id);
                        continue;
                    };

                    let better = match hits {
                        Some(current) => current.top_score() < found.top_score(),
                        None => true,
                    };
                    if better {
                        hits = Some(found);
                    }
                }

                if rec.seq.len() > 1 {
                    multigene.push(rec.id.as_str());
                }

                tasks.push(ClusterTask {
                    record: rec.clone(),
                    hits: hits.cloned(),
                    cutoff,
                });
            }

            if !multigene.is_empty() {
                warn!(
                    "{} has multiple genes, but concatenation option not selected",
                    multigene.join(" ")
                );
            }
        }
    }

    Ok(tasks)
}

// --------------------------------------------------
/// One task per existing (group, gene) dataset with search rows for that
/// group. Datasets without such rows are removed from the registry.
pub fn outgroup_tasks(dataset: &mut Dataset, config: &Config) -> Vec<OutgroupTask> {
    let mut pairs: Vec<(String, String)> = vec![];
    for gene in &config.gene {
        for group in &dataset.groups {
            debug!("Checking {group} {gene} dataset");
            if dataset.exist_dataset(group, gene) {
                pairs.push((group.to_string(), gene.to_string()));
            }
        }
    }

    if config.concatenate {
        for group in &dataset.groups {
            if dataset.exist_dataset(group, CONCATENATED) {
                pairs.push((group.to_string(), CONCATENATED.to_string()));
            }
        }
    }

    let indexes: HashMap<&str, _> = pairs
        .iter()
        .map(|(_, gene)| gene.as_str())
        .unique()
        .filter_map(|gene| {
            let table = if gene == CONCATENATED {
                dataset.concatenated_hits.as_ref()
            } else {
                dataset.gene_hits.get(gene)
            };
            table.map(|table| (gene, table.index_by(HitKey::QueryGroup)))
        })
        .collect();

    let records: HashMap<&str, &SequenceRecord> = dataset
        .records
        .iter()
        .map(|rec| (rec.hash.as_str(), rec))
        .collect();

    let mut tasks = vec![];
    let mut pruned = vec![];
    for (group, gene) in &pairs {
        let Some(hits) = indexes
            .get(gene.as_str())
            .and_then(|index| index.get(group))
        else {
            warn!(
                "{group} / {gene} dataset exists, but cannot append outgroup \
                due to no corresponding search result. Removing from further analysis"
            );
            pruned.push((group, gene));
            continue;
        };

        let ingroup = dataset
            .records
            .iter()
            .filter(|rec| rec.adjusted_group.is(group))
            .cloned()
            .collect();

        let subjects = hits
            .iter()
            .filter_map(|hit| records.get(hit.sseqid.as_str()))
            .map(|&rec| (rec.hash.clone(), rec.clone()))
            .collect();

        tasks.push(OutgroupTask {
            gene: gene.to_string(),
            group: group.to_string(),
            hits: hits.clone(),
            ingroup,
            subjects,
            max_outgroup: config.maxoutgroup,
        });
    }

    for (group, gene) in pruned {
        dataset.remove_dataset(group, gene);
    }

    tasks
}
