//! ngram-counter CLI
//!
//! Builds counter files from integer token streams and inspects them.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use ngram_counter::{
    serialize, CounterConfig, NgramCounts, PersistedCounter, TokenId, TrieCounter,
};

#[derive(Parser, Debug)]
#[command(name = "ngram-counter")]
#[command(about = "Build and query persistent n-gram counters")]
#[command(version)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count every window of each input line and write a counter file
    Build {
        /// Whitespace-separated token ids, one stream per line
        input: PathBuf,

        /// Counter file to write
        output: PathBuf,

        /// Window length (defaults to the configured n-gram order)
        #[arg(short, long)]
        order: Option<usize>,
    },

    /// Print `distinct_successors total_count` of a context
    Counts {
        counter: PathBuf,

        #[arg(allow_negative_numbers = true)]
        tokens: Vec<TokenId>,
    },

    /// Print the most frequent successors of a context
    Top {
        counter: PathBuf,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        #[arg(allow_negative_numbers = true)]
        tokens: Vec<TokenId>,
    },

    /// Print the root total and cache statistics
    Stats { counter: PathBuf },
}

fn read_streams(path: &Path) -> Result<Vec<Vec<TokenId>>, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(path)?);
    let mut streams = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens = line
            .split_whitespace()
            .map(str::parse::<TokenId>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| format!("{}:{}: {err}", path.display(), number + 1))?;
        streams.push(tokens);
    }
    Ok(streams)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = match &args.config {
        Some(path) => CounterConfig::load_from(path)?,
        None => CounterConfig::load()?,
    };

    match args.command {
        Command::Build {
            input,
            output,
            order,
        } => {
            let order = order.unwrap_or(config.ngram_order);
            let mut trie = TrieCounter::with_options(config.trie_options());
            let streams = read_streams(&input)?;
            for tokens in &streams {
                trie.train(tokens, order);
            }
            log::info!(
                "Counted {} windows from {} streams",
                trie.total_count(),
                streams.len()
            );
            serialize(&output, &trie)?;
        }
        Command::Counts { counter, tokens } => {
            let counter = PersistedCounter::open_with(&counter, &config)?;
            let counts = counter.counts(&tokens)?;
            println!("{} {}", counts.distinct_successors, counts.total_count);
        }
        Command::Top {
            counter,
            limit,
            tokens,
        } => {
            let counter = PersistedCounter::open_with(&counter, &config)?;
            let top = counter.top_successors(&tokens, limit)?;
            let line: Vec<String> = top.iter().map(ToString::to_string).collect();
            println!("{}", line.join(" "));
        }
        Command::Stats { counter } => {
            let counter = PersistedCounter::open_with(&counter, &config)?;
            let stats = counter.cache().stats();
            println!("total_count: {}", counter.total_count()?);
            println!("root_offset: {}", counter.root_ref().offset());
            println!("pinned: {}", stats.pinned);
            println!("cached: {}", stats.cached);
            println!("hits: {}", stats.hits);
            println!("misses: {}", stats.misses);
            println!("evictions: {}", stats.evictions);
        }
    }

    Ok(())
}
