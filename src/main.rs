use anyhow::Result;
use clap::Parser;
use funid_cluster::{self, Cli, Command, LogLevel};
use std::{
    fs::{self, File},
    io::BufWriter,
};

// --------------------------------------------------
fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

// --------------------------------------------------
fn run(cli_args: Cli) -> Result<()> {
    let outdir = cli_args.outdir.clone();
    if !outdir.is_dir() {
        fs::create_dir_all(&outdir)?;
    }

    let mut logger = env_logger::Builder::new();
    logger.filter_level(match cli_args.log {
        Some(LogLevel::Debug) => log::LevelFilter::Debug,
        Some(LogLevel::Info) => log::LevelFilter::Info,
        _ => log::LevelFilter::Warn,
    });
    if let Some(logfile) = &cli_args.logfile {
        logger.target(env_logger::Target::Pipe(Box::new(BufWriter::new(
            File::create(logfile)?,
        ))));
    }
    logger.init();

    match &cli_args.command {
        Command::Cluster(cluster_args) => {
            funid_cluster::cluster(&outdir, &cli_args, cluster_args)
        }
        Command::Run(run_args) => funid_cluster::run(&outdir, &cli_args, run_args),
    }
}
