use std::path::PathBuf;
use std::time::Instant;
use std::{env, process};

use goby_base::{merge, utils, MergeParams};

use getopts::Options;

use tracing::info;
use tracing_subscriber::EnvFilter;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();
    let config = Config::new();
    init_logging(config.verbose);

    let summary = merge(&config.inputs, &config.output, &config.params)?;
    info!(
        "Wrote {} of {} entries for {} queries and {} targets",
        summary.entries_written, summary.entries_read, summary.number_of_queries, summary.number_of_targets
    );
    info!(
        "Dropped {} queries using the ledgers and {} ambiguous queries",
        summary.queries_dropped_by_ledger, summary.queries_dropped_as_ambiguous
    );
    if let Some(size) = utils::file_size(utils::store_file(&config.output, utils::ENTRIES_EXTENSION)) {
        info!("Output entries: {}", size);
    }

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    info!("Used {:.3} seconds", seconds);

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "goby_base=info,goby_merge=info" } else { "goby_base=warn,goby_merge=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .without_time()
        .init();
}

//-----------------------------------------------------------------------------

struct Config {
    inputs: Vec<PathBuf>,
    output: PathBuf,
    params: MergeParams,
    verbose: bool,
}

impl Config {
    pub fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();
        let header = format!("Usage: {} [options] -o output input1 [input2 ...]", program);

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("o", "output", "basename of the output store (required)", "BASENAME");
        opts.optopt(
            "k",
            "max-placements",
            &format!("keep queries with at most this many best placements (default: {})", MergeParams::DEFAULT_K),
            "INT",
        );
        opts.optopt("g", "gene-table", "merge transcript alignments by gene using this table", "FILE");
        opts.optflag("v", "verbose", "print progress information to stderr");

        let matches = match opts.parse(&args[1..]) {
            Ok(m) => m,
            Err(f) => {
                eprintln!("{}", f);
                process::exit(1);
            }
        };

        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }

        let output = match matches.opt_str("o") {
            Some(s) => PathBuf::from(s),
            None => {
                eprintln!("Error: Output basename is required\n");
                eprint!("{}", opts.usage(&header));
                process::exit(1);
            }
        };
        if matches.free.is_empty() {
            eprintln!("Error: Expected at least one input store\n");
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        }
        let inputs: Vec<PathBuf> = matches.free.iter().map(PathBuf::from).collect();

        let mut params = MergeParams::default();
        if let Some(s) = matches.opt_str("k") {
            params.k = match s.parse::<usize>() {
                Ok(x) => x,
                Err(e) => {
                    eprintln!("Error: Failed to parse --max-placements: {}", e);
                    process::exit(1);
                }
            };
        }
        if params.k < 1 {
            eprintln!("Error: --max-placements must be positive");
            process::exit(1);
        }
        params.gene_table = matches.opt_str("g").map(PathBuf::from);
        let verbose = matches.opt_present("v");
        params.progress = verbose;

        Config {
            inputs,
            output,
            params,
            verbose,
        }
    }
}

//-----------------------------------------------------------------------------
