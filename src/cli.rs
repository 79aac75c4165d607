use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Match free-text medical queries to LOINC codes", long_about = None)]
pub struct Args {
    /// Directory holding config.yaml, the codes file and the embeddings file
    #[clap(long, global = true, default_value = "data")]
    pub data_dir: PathBuf,

    /// Debug logging (RUST_LOG takes precedence)
    #[clap(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find the LOINC codes closest to a query
    Search {
        /// Free-text query, e.g. "blood sugar"
        query: String,

        /// Number of matches to return
        #[clap(short, long)]
        limit: Option<usize>,

        /// Ask the language model why each code matches
        #[clap(short, long, default_value = "false")]
        explain: bool,
    },

    /// Generate the embeddings file, resuming an interrupted run
    Import {
        /// Convert the official Loinc.csv into the codes file first
        #[clap(long)]
        csv: Option<PathBuf>,

        /// Ignore saved progress and start from the first code
        #[clap(long, default_value = "false")]
        fresh: bool,
    },

    /// Load the corpus and report its size
    Stats {},
}
