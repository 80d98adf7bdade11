use std::path::PathBuf;
use std::time::Instant;
use std::{env, process};

use goby_base::{AlignmentEntry, AlignmentHeader, AlignmentWriter, ConcatAlignmentReader, ConcatParams, ConcatSortedAlignmentReader, MergeState, StoreError, WriterParams};

use getopts::Options;

use tracing::info;
use tracing_subscriber::EnvFilter;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();
    let config = Config::new();
    init_logging(config.verbose);

    let entries = if config.sorted {
        let mut reader = ConcatSortedAlignmentReader::open(&config.inputs, config.params.clone())?;
        let header = reader.header().clone();
        let mut writer = create_writer(&config, &header, WriterParams::sorted())?;
        let mut count = 0;
        while let Some(entry) = reader.next_entry()? {
            append(&mut writer, entry, &mut count)?;
        }
        finish(writer, reader.state(), &config)?;
        count
    } else {
        let mut reader = ConcatAlignmentReader::open(&config.inputs, config.params.clone())?;
        let header = reader.header().clone();
        let mut writer = create_writer(&config, &header, WriterParams::default())?;
        let mut count = 0;
        while let Some(entry) = reader.next_entry()? {
            append(&mut writer, entry, &mut count)?;
        }
        finish(writer, reader.state(), &config)?;
        count
    };
    info!("Concatenated {} entries from {} stores", entries, config.inputs.len());

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    info!("Used {:.3} seconds", seconds);

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "goby_base=info,goby_concat=info" } else { "goby_base=warn,goby_concat=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .without_time()
        .init();
}

fn create_writer(config: &Config, header: &AlignmentHeader, params: WriterParams) -> Result<AlignmentWriter, StoreError> {
    let mut writer = AlignmentWriter::create(&config.output, params)?;
    writer.copy_metadata(header);
    if header.query_indices_permuted {
        writer.mark_query_indices_permuted();
    }
    Ok(writer)
}

fn append(writer: &mut AlignmentWriter, entry: AlignmentEntry, count: &mut usize) -> Result<(), StoreError> {
    writer.append(entry)?;
    *count += 1;
    Ok(())
}

fn finish(mut writer: AlignmentWriter, state: &MergeState, config: &Config) -> Result<(), StoreError> {
    writer.set_statistic("concat.inputs", &config.inputs.len().to_string());
    writer.close()?;
    if config.params.keep_permuted_indices && state.concatenate_permutations(&config.output)? {
        info!("Wrote the concatenated query index permutation");
    }
    Ok(())
}

//-----------------------------------------------------------------------------

struct Config {
    inputs: Vec<PathBuf>,
    output: PathBuf,
    sorted: bool,
    params: ConcatParams,
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
        opts.optflag("s", "sorted", "merge sorted inputs into a sorted output");
        opts.optflag("", "no-adjust-query-indices", "keep the query indexes of the inputs as they are");
        opts.optflag("", "adjust-sample-indices", "set the sample index of each entry to the index of its input");
        opts.optflag("", "keep-permuted", "keep permuted query indexes and concatenate the permutations");
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

        let params = ConcatParams {
            adjust_query_indices: !matches.opt_present("no-adjust-query-indices"),
            adjust_sample_indices: matches.opt_present("adjust-sample-indices"),
            keep_permuted_indices: matches.opt_present("keep-permuted"),
        };
        if params.keep_permuted_indices && !params.adjust_query_indices {
            eprintln!("Error: --keep-permuted requires query index adjustment");
            process::exit(1);
        }

        Config {
            inputs,
            output,
            sorted: matches.opt_present("s"),
            params,
            verbose: matches.opt_present("v"),
        }
    }
}

//-----------------------------------------------------------------------------
