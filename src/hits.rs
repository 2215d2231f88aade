use crate::record::Group;
use anyhow::{anyhow, Result};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};

/// One row of BLAST/MMseqs tabular output, after the group joins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Query hash, suffixed `_N` for the Nth unclassified sequence
    pub qseqid: String,

    /// Subject hash
    pub sseqid: String,

    pub bitscore: f64,

    #[serde(default)]
    pub subject_group: Group,

    #[serde(default)]
    pub query_group: Group,

    /// Only set on the merged table used for gene assignment
    #[serde(default)]
    pub gene: String,
}

/// Column used to split a `HitTable`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKey {
    Query,
    QueryGroup,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitTable {
    rows: Vec<SearchHit>,
}

/// Sub-tables keyed by one column, each sorted best hit first
#[derive(Debug, Default)]
pub struct HitIndex {
    tables: HashMap<String, HitTable>,
}

// --------------------------------------------------
impl HitTable {
    pub fn new(rows: Vec<SearchHit>) -> Self {
        HitTable { rows }
    }

    // --------------------------------------------------
    /// Read a tab-delimited search table with a header line
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_path(path)
            .map_err(|e| anyhow!("Cannot read {}: {e}", path.display()))?;

        let mut rows = vec![];
        for res in reader.deserialize() {
            let hit: SearchHit =
                res.map_err(|e| anyhow!("{}: {e}", path.display()))?;
            rows.push(hit);
        }

        Ok(HitTable { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SearchHit> {
        self.rows.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, SearchHit> {
        self.rows.iter_mut()
    }

    // --------------------------------------------------
    /// Stable sort, highest bitscore first. Equal scores keep table order.
    pub fn sort_by_bitscore(&mut self) {
        self.rows.sort_by(|a, b| b.bitscore.total_cmp(&a.bitscore));
    }

    // --------------------------------------------------
    pub fn top_score(&self) -> Option<f64> {
        self.rows.iter().map(|hit| hit.bitscore).max_by(f64::total_cmp)
    }

    // --------------------------------------------------
    /// Rows scoring strictly above `top_score * ratio`, in table order
    pub fn above_cutoff(&self, ratio: f64) -> Vec<&SearchHit> {
        match self.top_score() {
            Some(top) => self
                .rows
                .iter()
                .filter(|hit| hit.bitscore > top * ratio)
                .collect(),
            None => vec![],
        }
    }

    // --------------------------------------------------
    pub fn index_by(&self, key: HitKey) -> HitIndex {
        HitIndex::new(self, key)
    }
}

impl FromIterator<SearchHit> for HitTable {
    fn from_iter<I: IntoIterator<Item = SearchHit>>(iter: I) -> Self {
        HitTable {
            rows: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for HitTable {
    type Item = SearchHit;
    type IntoIter = std::vec::IntoIter<SearchHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

// --------------------------------------------------
impl HitIndex {
    /// Rows with an unresolved `query_group` are left out of a
    /// `QueryGroup` index.
    pub fn new(table: &HitTable, key: HitKey) -> Self {
        let mut tables: HashMap<String, HitTable> = HashMap::new();
        for hit in table.iter() {
            let value = match key {
                HitKey::Query => Some(hit.qseqid.as_str()),
                HitKey::QueryGroup => hit.query_group.label(),
            };

            if let Some(value) = value {
                tables
                    .entry(value.to_string())
                    .or_default()
                    .rows
                    .push(hit.clone());
            }
        }

        for sub in tables.values_mut() {
            sub.sort_by_bitscore();
        }

        HitIndex { tables }
    }

    pub fn get(&self, key: &str) -> Option<&HitTable> {
        self.tables.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tables.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

// --------------------------------------------------
/// Shorthand used by the tests across the crate
#[cfg(test)]
pub(crate) fn hit(
    qseqid: &str,
    sseqid: &str,
    bitscore: f64,
    subject_group: &str,
) -> SearchHit {
    SearchHit {
        qseqid: qseqid.to_string(),
        sseqid: sseqid.to_string(),
        bitscore,
        subject_group: Group::from(subject_group),
        query_group: Group::Unresolved,
        gene: String::new(),
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{hit, HitIndex, HitKey, HitTable};
    use crate::record::Group;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::{io::Write, path::PathBuf};
    use tempfile::NamedTempFile;

    #[test]
    fn test_sort_is_stable() {
        let mut table = HitTable::new(vec![
            hit("q", "s1", 50., "A"),
            hit("q", "s2", 100., "B"),
            hit("q", "s3", 50., "C"),
            hit("q", "s4", 100., "D"),
        ]);
        table.sort_by_bitscore();
        let order: Vec<_> = table.iter().map(|h| h.sseqid.as_str()).collect();
        assert_eq!(order, ["s2", "s4", "s1", "s3"]);
    }

    #[test]
    fn test_above_cutoff() {
        let table = HitTable::new(vec![
            hit("Q1", "S1", 500., "A"),
            hit("Q1", "S2", 480., "A"),
            hit("Q1", "S3", 100., "B"),
        ]);
        let rows: Vec<_> = table
            .above_cutoff(0.99)
            .iter()
            .map(|h| h.sseqid.as_str())
            .collect();
        assert_eq!(rows, ["S1"]);

        assert!(HitTable::default().above_cutoff(0.99).is_empty());
    }

    #[test]
    fn test_index_by_query() {
        let table = HitTable::new(vec![
            hit("q1", "s1", 10., "A"),
            hit("q2", "s1", 20., "A"),
            hit("q1", "s2", 30., "B"),
        ]);
        let index = table.index_by(HitKey::Query);
        assert_eq!(index.len(), 2);

        let q1 = index.get("q1").unwrap();
        assert_eq!(q1.len(), 2);
        assert_eq!(q1.iter().next().unwrap().sseqid, "s2");

        // An absent key is a miss, not an error
        assert!(index.get("q3").is_none());
    }

    #[test]
    fn test_index_by_query_group() {
        let mut table = HitTable::new(vec![
            hit("q1", "s1", 10., "A"),
            hit("q2", "s1", 20., "A"),
        ]);
        table.iter_mut().next().unwrap().query_group = Group::from("A");
        let index = HitIndex::new(&table, HitKey::QueryGroup);
        assert_eq!(index.len(), 1);
        assert!(index.contains("A"));
    }

    #[test]
    fn test_from_path() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "qseqid\tsseqid\tbitscore\tsubject_group")?;
        writeln!(file, "q1\ts1\t480.5\tAspergillus")?;
        writeln!(file, "q1\ts2\t210\t")?;
        let table = HitTable::from_path(file.path())?;
        assert_eq!(table.len(), 2);

        let rows: Vec<_> = table.iter().collect();
        assert_eq!(rows[0].bitscore, 480.5);
        assert_eq!(rows[0].subject_group, Group::from("Aspergillus"));
        assert_eq!(rows[1].subject_group, Group::Unresolved);
        assert_eq!(rows[1].query_group, Group::Unresolved);
        Ok(())
    }

    #[test]
    fn test_from_path_missing() {
        let res = HitTable::from_path(&PathBuf::from("tests/inputs/nope.tsv"));
        assert!(res.is_err());
        assert!(res.unwrap_err().to_string().starts_with("Cannot read"));
    }
}
