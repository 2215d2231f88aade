pub mod assign;
pub mod dispatch;
pub mod hits;
pub mod merge;
pub mod outgroup;
pub mod plan;
pub mod record;

use crate::{
    dispatch::{dispatch, Dispatch},
    hits::{HitKey, HitTable},
    record::{Dataset, GeneDataset, SequenceRecord},
};
use anyhow::{anyhow, bail, Result};
use clap::{builder::PossibleValue, Args, Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    convert::Infallible,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Instant,
};

/// FunID group clustering and outgroup selection
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output directory
    #[arg(
        short,
        long,
        value_name = "OUTDIR",
        default_value = "funid-out",
        global = true
    )]
    pub outdir: PathBuf,

    /// TOML configuration file
    #[arg(short, long, value_name = "CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, global = true)]
    pub log: Option<LogLevel>,

    /// Log file, default STDERR
    #[arg(long, value_name = "LOGFILE", global = true)]
    pub logfile: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Assign every sequence to a group
    Cluster(ClusterArgs),

    /// Cluster, then select outgroups for every group/gene dataset
    Run(ClusterArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ClusterArgs {
    /// JSON array of sequence records
    #[arg(long, value_name = "RECORDS")]
    pub records: PathBuf,

    /// Search table for a gene
    #[arg(
        long,
        value_name = "GENE=TSV",
        value_parser = parse_gene_table,
        required = true,
        num_args = 1..
    )]
    pub hits: Vec<GeneTable>,

    /// Search table against the concatenated alignment
    #[arg(long, value_name = "TSV")]
    pub concatenated: Option<PathBuf>,

    /// Search table of unclassified sequences against a gene
    #[arg(
        long,
        value_name = "GENE=TSV",
        value_parser = parse_gene_table,
        num_args = 1..
    )]
    pub unclassified: Vec<GeneTable>,

    /// Search method: blast, mmseqs, anything else keeps declared groups
    #[arg(long, value_name = "METHOD", value_parser = parse_search_method)]
    pub search: Option<SearchMethod>,

    /// Bitscore ratio cutoff for group assignment
    #[arg(long, value_name = "CUTOFF")]
    pub cutoff: Option<f64>,

    /// Maximum number of outgroup sequences
    #[arg(long, value_name = "MAXOUTGROUP")]
    pub max_outgroup: Option<usize>,

    /// Number of threads
    #[arg(short, long, value_name = "THREADS")]
    pub threads: Option<usize>,

    /// Verbosity, 3 or more runs single threaded
    #[arg(short, long, value_name = "VERBOSE")]
    pub verbose: Option<u8>,

    /// Keep database records on their declared group
    #[arg(long)]
    pub queryonly: bool,

    /// Select outgroups for the concatenated alignment
    #[arg(long)]
    pub concatenate: bool,
}

/// A gene name paired with its search table
#[derive(Debug, Clone, PartialEq)]
pub struct GeneTable {
    pub gene: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub enum LogLevel {
    Warn,
    Info,
    Debug,
}

impl ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[LogLevel::Warn, LogLevel::Info, LogLevel::Debug]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            LogLevel::Warn => PossibleValue::new("warn"),
            LogLevel::Info => PossibleValue::new("info"),
            LogLevel::Debug => PossibleValue::new("debug"),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Blast,
    Mmseqs,

    /// Anything else: keep the declared groups
    #[default]
    #[serde(other)]
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub method: MethodConfig,
    pub cluster: ClusterConfig,
    pub maxoutgroup: usize,
    pub gene: Vec<String>,
    pub queryonly: bool,
    pub concatenate: bool,
    pub thread: usize,
    pub verbose: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodConfig {
    pub search: SearchMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub cutoff: f64,
}

#[derive(Debug, Serialize)]
struct OutgroupSummary<'a> {
    group: &'a str,
    gene: &'a str,
    outgroup: Vec<OutgroupMember<'a>>,
}

#[derive(Debug, Serialize)]
struct OutgroupMember<'a> {
    hash: &'a str,
    id: &'a str,
    species: Option<&'a str>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            method: MethodConfig::default(),
            cluster: ClusterConfig::default(),
            maxoutgroup: 3,
            gene: vec![],
            queryonly: false,
            concatenate: false,
            thread: num_cpus::get(),
            verbose: 0,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig { cutoff: 0.99 }
    }
}

// --------------------------------------------------
impl Config {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read {}: {e}", path.display()))?;
        toml::from_str(&contents)
            .map_err(|e| anyhow!("Cannot parse {}: {e}", path.display()))
    }

    // --------------------------------------------------
    /// Command-line values take precedence over the file
    pub fn apply_args(&mut self, args: &ClusterArgs) {
        if let Some(search) = args.search {
            self.method.search = search;
        }
        if let Some(cutoff) = args.cutoff {
            self.cluster.cutoff = cutoff;
        }
        if let Some(max_outgroup) = args.max_outgroup {
            self.maxoutgroup = max_outgroup;
        }
        if let Some(threads) = args.threads {
            self.thread = threads;
        }
        if let Some(verbose) = args.verbose {
            self.verbose = verbose;
        }
        self.queryonly |= args.queryonly;
        self.concatenate |= args.concatenate;

        if self.gene.is_empty() {
            self.gene = args.hits.iter().map(|t| t.gene.clone()).collect();
        }
    }

    // --------------------------------------------------
    pub fn validate(&self) -> Result<()> {
        let cutoff = self.cluster.cutoff;
        if !(cutoff > 0. && cutoff <= 1.) {
            bail!("cluster.cutoff must be in (0, 1], got {cutoff}");
        }

        if self.maxoutgroup == 0 {
            bail!("maxoutgroup must be greater than 0");
        }

        if self.thread == 0 {
            bail!("thread must be greater than 0");
        }

        Ok(())
    }
}

// --------------------------------------------------
pub fn cluster(outdir: &Path, cli: &Cli, args: &ClusterArgs) -> Result<()> {
    let start = Instant::now();
    let (_, dataset) = prepare_and_cluster(cli, args)?;
    let records_path = outdir.join("records.json");
    write_records(&dataset.records, &records_path)?;

    println!(
        r#"Finished in {} seconds, see output in "{}""#,
        start.elapsed().as_secs(),
        outdir.display()
    );

    Ok(())
}

// --------------------------------------------------
pub fn run(outdir: &Path, cli: &Cli, args: &ClusterArgs) -> Result<()> {
    let start = Instant::now();
    let (config, mut dataset) = prepare_and_cluster(cli, args)?;

    dataset.build_datasets(config.concatenate);
    pipe_append_outgroup(&mut dataset, &config)?;

    write_records(&dataset.records, &outdir.join("records.json"))?;
    write_outgroups(&dataset, &outdir.join("outgroups.json"))?;

    println!(
        r#"Finished in {} seconds, see output in "{}""#,
        start.elapsed().as_secs(),
        outdir.display()
    );

    Ok(())
}

// --------------------------------------------------
fn prepare_and_cluster(
    cli: &Cli,
    args: &ClusterArgs,
) -> Result<(Config, Dataset)> {
    let mut config = match &cli.config {
        Some(path) => Config::from_path(path)?,
        _ => Config::default(),
    };
    config.apply_args(args);
    config.validate()?;
    info!("config = {config:#?}");

    let mut dataset = Dataset::new(read_records(&args.records)?)?;
    for table in &args.hits {
        if dataset.gene_hits.contains_key(&table.gene) {
            bail!(r#"Search table for gene "{}" given twice"#, table.gene);
        }
        dataset
            .gene_hits
            .insert(table.gene.clone(), HitTable::from_path(&table.path)?);
    }

    if let Some(path) = &args.concatenated {
        dataset.concatenated_hits = Some(HitTable::from_path(path)?);
    }
    dataset.annotate_subject_groups();

    let mut unclassified = BTreeMap::new();
    for table in &args.unclassified {
        unclassified.insert(table.gene.clone(), HitTable::from_path(&table.path)?);
    }
    assign_genes(&mut dataset, unclassified, config.cluster.cutoff);

    pipe_cluster(&mut dataset, &config)?;
    Ok((config, dataset))
}

// --------------------------------------------------
/// Attribute every unclassified sequence to a gene from its search rows
/// against each gene's database. Rows are keyed `{hash}_{n}` for the
/// record's `n`th unclassified sequence.
pub fn assign_genes(
    dataset: &mut Dataset,
    tables: BTreeMap<String, HitTable>,
    cutoff: f64,
) {
    if tables.is_empty() {
        return;
    }

    let merged: HitTable = tables
        .into_iter()
        .flat_map(|(gene, table)| {
            table.into_iter().map(move |mut hit| {
                hit.gene = gene.clone();
                hit
            })
        })
        .collect();
    let index = merged.index_by(HitKey::Query);

    for rec in dataset.records.iter_mut() {
        let pending = rec.unclassified_seq.clone();
        for (n, seq) in pending.iter().enumerate() {
            let key = format!("{}_{n}", rec.hash);
            if let Some(gene) = assign::assign_gene(rec, seq, index.get(&key), cutoff) {
                debug!("{} sequence {n} assigned to {gene}", rec.id);
            }
        }
    }

    dataset.refresh_query_genes();
}

// --------------------------------------------------
/// Assign an adjusted group to every record, or copy the declared groups
/// when no search method is configured.
pub fn pipe_cluster(dataset: &mut Dataset, config: &Config) -> Result<()> {
    match config.method.search {
        SearchMethod::Blast | SearchMethod::Mmseqs => {
            info!("Group clustering");

            let (available, unavailable) =
                dataset.check_gene_availability(&config.gene, config.queryonly);
            debug!("Available genes: {}", available.join(", "));
            if !unavailable.is_empty() {
                warn!("No search result for gene {}", unavailable.join(", "));
            }

            let tasks = plan::cluster_tasks(dataset, config)?;
            let outcomes = dispatch(
                tasks,
                |task| assign::cluster(task.record, task.hits, task.cutoff),
                Dispatch::from_config(config),
            )?;
            merge::merge_clusters(dataset, outcomes, config.queryonly);
        }
        SearchMethod::None => {
            info!("No searching method designated. Using designated group");
            for rec in dataset.records.iter_mut() {
                rec.adjusted_group = rec.group.clone();
            }
            dataset.groups = dataset.naive_groups();
        }
    }

    Ok(())
}

// --------------------------------------------------
/// Select an outgroup for every existing (group, gene) dataset
pub fn pipe_append_outgroup(dataset: &mut Dataset, config: &Config) -> Result<()> {
    dataset.annotate_query_groups();
    dataset.annotate_clustered_subjects();

    let tasks = plan::outgroup_tasks(dataset, config);
    let results = dispatch(
        tasks,
        outgroup::append_outgroup,
        Dispatch::from_config(config),
    )?;
    merge::merge_outgroups(dataset, results);

    Ok(())
}

// --------------------------------------------------
fn parse_gene_table(value: &str) -> Result<GeneTable, String> {
    match value.split_once('=') {
        Some((gene, path)) if !gene.is_empty() && !path.is_empty() => {
            Ok(GeneTable {
                gene: gene.to_string(),
                path: PathBuf::from(path),
            })
        }
        _ => Err(format!(r#"Expected GENE=TSV, got "{value}""#)),
    }
}

// --------------------------------------------------
fn parse_search_method(value: &str) -> Result<SearchMethod, Infallible> {
    Ok(match value {
        "blast" => SearchMethod::Blast,
        "mmseqs" => SearchMethod::Mmseqs,
        _ => SearchMethod::None,
    })
}

// --------------------------------------------------
pub fn read_records(path: &Path) -> Result<Vec<SequenceRecord>> {
    serde_json::from_reader(open(path)?)
        .map_err(|e| anyhow!("Cannot parse {}: {e}", path.display()))
}

// --------------------------------------------------
fn write_records(records: &[SequenceRecord], path: &Path) -> Result<()> {
    let mut output = open_for_write(path)?;
    serde_json::to_writer_pretty(&mut output, records)?;
    output.flush()?;
    info!(r#"Wrote records to "{}""#, path.display());
    Ok(())
}

// --------------------------------------------------
fn write_outgroups(dataset: &Dataset, path: &Path) -> Result<()> {
    let summary: Vec<_> = dataset
        .datasets
        .values()
        .flat_map(|genes| genes.values())
        .map(|gd: &GeneDataset| OutgroupSummary {
            group: &gd.group,
            gene: &gd.gene,
            outgroup: gd
                .outgroup
                .iter()
                .map(|rec| OutgroupMember {
                    hash: &rec.hash,
                    id: &rec.id,
                    species: rec.bygene_species.get(&gd.gene).map(String::as_str),
                })
                .collect(),
        })
        .collect();

    let mut output = open_for_write(path)?;
    serde_json::to_writer_pretty(&mut output, &summary)?;
    output.flush()?;
    info!(
        r#"Wrote {} outgroups ({}) to "{}""#,
        summary.len(),
        summary.iter().map(|s| format!("{}/{}", s.group, s.gene)).join(", "),
        path.display()
    );
    Ok(())
}

// --------------------------------------------------
fn open(filename: &Path) -> Result<Box<dyn BufRead>> {
    Ok(Box::new(BufReader::new(File::open(filename).map_err(
        |e| anyhow!("Cannot read {}: {e}", filename.display()),
    )?)))
}

// --------------------------------------------------
fn open_for_write(filename: &Path) -> Result<Box<dyn Write>> {
    Ok(Box::new(BufWriter::new(File::create(filename).map_err(
        |e| anyhow!("Cannot write {}: {e}", filename.display()),
    )?)))
}
