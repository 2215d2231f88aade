use crate::hits::HitTable;
use anyhow::{bail, Result};
use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
};

/// Dataset key for the concatenated-alignment analysis
pub const CONCATENATED: &str = "concatenated";

/// A group label, or the absence of one.
/// Serialized as a plain string where "" means unresolved.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(from = "String", into = "String")]
pub enum Group {
    Resolved(String),
    #[default]
    Unresolved,
}

impl Group {
    pub fn label(&self) -> Option<&str> {
        match self {
            Group::Resolved(label) => Some(label),
            Group::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Group::Resolved(_))
    }

    pub fn is(&self, label: &str) -> bool {
        self.label() == Some(label)
    }
}

impl From<String> for Group {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Group::Unresolved
        } else if trimmed.len() == value.len() {
            Group::Resolved(value)
        } else {
            Group::Resolved(trimmed.to_string())
        }
    }
}

impl From<&str> for Group {
    fn from(value: &str) -> Self {
        Group::from(value.to_string())
    }
}

impl From<Group> for String {
    fn from(group: Group) -> Self {
        match group {
            Group::Resolved(label) => label,
            Group::Unresolved => String::new(),
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label().unwrap_or(""))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Curated reference sequence with a trusted group
    Db,
    Query,
}

/// One sequence entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    /// Content-derived id, unique within a dataset
    pub hash: String,

    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Declared group
    #[serde(default)]
    pub group: Group,

    /// Group computed by clustering
    #[serde(default)]
    pub adjusted_group: Group,

    pub datatype: DataType,

    /// Gene name to sequence
    #[serde(default)]
    pub seq: BTreeMap<String, String>,

    /// Sequences not yet attributed to a gene
    #[serde(default)]
    pub unclassified_seq: Vec<String>,

    #[serde(default)]
    pub ori_species: String,

    #[serde(default)]
    pub bygene_species: BTreeMap<String, String>,
}

impl SequenceRecord {
    pub fn update_seq(&mut self, gene: &str, seq: &str) {
        self.seq.insert(gene.to_string(), seq.to_string());
    }

    pub fn is_db(&self) -> bool {
        self.datatype == DataType::Db
    }
}

/// Per-(group, gene) dataset used downstream for tree building
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneDataset {
    pub group: String,
    pub gene: String,
    pub outgroup: Vec<SequenceRecord>,
}

/// The registry for one pipeline run
#[derive(Debug, Default)]
pub struct Dataset {
    /// Records, unique by hash
    pub records: Vec<SequenceRecord>,

    /// Known group labels
    pub groups: Vec<String>,

    /// Genes carried by query records
    pub query_genes: Vec<String>,

    /// Per-gene search results
    pub gene_hits: BTreeMap<String, HitTable>,

    /// Search results against the concatenated alignment
    pub concatenated_hits: Option<HitTable>,

    /// Group to gene (or `CONCATENATED`) to dataset
    pub datasets: BTreeMap<String, BTreeMap<String, GeneDataset>>,
}

// --------------------------------------------------
impl Dataset {
    pub fn new(records: Vec<SequenceRecord>) -> Result<Self> {
        let dups: Vec<_> = records
            .iter()
            .map(|rec| rec.hash.as_str())
            .duplicates()
            .sorted()
            .collect();

        if !dups.is_empty() {
            bail!("The following record hashes are duplicated: {}", dups.join(", "));
        }

        let mut dataset = Dataset {
            records,
            ..Default::default()
        };
        dataset.refresh_query_genes();
        Ok(dataset)
    }

    // --------------------------------------------------
    pub fn exist_dataset(&self, group: &str, gene: &str) -> bool {
        self.datasets
            .get(group)
            .is_some_and(|genes| genes.contains_key(gene))
    }

    pub fn insert_dataset(&mut self, group: &str, gene: &str) {
        self.datasets
            .entry(group.to_string())
            .or_default()
            .entry(gene.to_string())
            .or_insert_with(|| GeneDataset {
                group: group.to_string(),
                gene: gene.to_string(),
                outgroup: vec![],
            });
    }

    pub fn remove_dataset(&mut self, group: &str, gene: &str) {
        if let Some(genes) = self.datasets.get_mut(group) {
            genes.remove(gene);
            debug!("After removal {group} has {:?}", genes.keys().collect::<Vec<_>>());
        }
    }

    // --------------------------------------------------
    /// Create a dataset for every resolved group and each gene its
    /// members carry, plus a concatenated one per group if requested.
    pub fn build_datasets(&mut self, concatenate: bool) {
        let mut pairs: Vec<(String, String)> = vec![];
        for rec in &self.records {
            if let Some(group) = rec.adjusted_group.label() {
                for gene in rec.seq.keys() {
                    pairs.push((group.to_string(), gene.to_string()));
                }
            }
        }

        for (group, gene) in pairs.into_iter().unique() {
            self.insert_dataset(&group, &gene);
        }

        if concatenate && self.concatenated_hits.is_some() {
            for group in self.groups.clone() {
                self.insert_dataset(&group, CONCATENATED);
            }
        }
    }

    // --------------------------------------------------
    /// Distinct declared groups in first-seen order
    pub fn naive_groups(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|rec| rec.group.label())
            .unique()
            .map(str::to_string)
            .collect()
    }

    // --------------------------------------------------
    pub fn refresh_query_genes(&mut self) {
        self.query_genes = self
            .records
            .iter()
            .filter(|rec| !rec.is_db())
            .flat_map(|rec| rec.seq.keys())
            .unique()
            .sorted()
            .cloned()
            .collect();
    }

    // --------------------------------------------------
    /// Split the requested genes by whether they can be clustered
    pub fn check_gene_availability(
        &self,
        genes: &[String],
        query_only: bool,
    ) -> (Vec<String>, Vec<String>) {
        if query_only {
            return (self.query_genes.clone(), vec![]);
        }

        genes
            .iter()
            .cloned()
            .partition(|gene| self.gene_hits.contains_key(gene))
    }

    // --------------------------------------------------
    /// Copy each query record's adjusted group onto its search rows
    pub fn annotate_query_groups(&mut self) {
        let groups: HashMap<&str, &Group> = self
            .records
            .iter()
            .map(|rec| (rec.hash.as_str(), &rec.adjusted_group))
            .collect();

        let tables = self
            .gene_hits
            .values_mut()
            .chain(self.concatenated_hits.as_mut());
        for table in tables {
            for hit in table.iter_mut() {
                hit.query_group = groups
                    .get(hit.qseqid.as_str())
                    .map(|&group| group.clone())
                    .unwrap_or_default();
            }
        }
    }

    // --------------------------------------------------
    /// Relabel every row's subject with the subject record's adjusted
    /// group. Subjects without a record keep their label.
    pub fn annotate_clustered_subjects(&mut self) {
        let groups: HashMap<&str, &Group> = self
            .records
            .iter()
            .map(|rec| (rec.hash.as_str(), &rec.adjusted_group))
            .collect();

        let tables = self
            .gene_hits
            .values_mut()
            .chain(self.concatenated_hits.as_mut());
        for table in tables {
            for hit in table.iter_mut() {
                if let Some(&group) = groups.get(hit.sseqid.as_str()) {
                    hit.subject_group = group.clone();
                }
            }
        }
    }

    // --------------------------------------------------
    /// Fill blank subject groups from the subject's declared group
    pub fn annotate_subject_groups(&mut self) {
        let groups: HashMap<&str, &Group> = self
            .records
            .iter()
            .map(|rec| (rec.hash.as_str(), &rec.group))
            .collect();

        let mut unknown: HashSet<String> = HashSet::new();
        let tables = self
            .gene_hits
            .values_mut()
            .chain(self.concatenated_hits.as_mut());
        for table in tables {
            for hit in table.iter_mut().filter(|h| !h.subject_group.is_resolved()) {
                match groups.get(hit.sseqid.as_str()) {
                    Some(&group) => hit.subject_group = group.clone(),
                    None => {
                        unknown.insert(hit.sseqid.clone());
                    }
                }
            }
        }

        if !unknown.is_empty() {
            warn!(
                "{} search subjects have no matching record: {}",
                unknown.len(),
                unknown.iter().sorted().join(", ")
            );
        }
    }
}

// --------------------------------------------------
/// Shorthand used by the tests across the crate
#[cfg(test)]
pub(crate) fn record(
    hash: &str,
    group: &str,
    datatype: DataType,
    genes: &[&str],
) -> SequenceRecord {
    SequenceRecord {
        hash: hash.to_string(),
        id: format!("{hash}_id"),
        description: String::new(),
        group: Group::from(group),
        adjusted_group: Group::Unresolved,
        datatype,
        seq: genes
            .iter()
            .map(|gene| (gene.to_string(), "ACGT".to_string()))
            .collect(),
        unclassified_seq: vec![],
        ori_species: format!("{hash} species"),
        bygene_species: BTreeMap::new(),
    }
}
