use std::path::PathBuf;
use std::time::Instant;
use std::{env, process};

use goby_base::{AlignmentWriter, InMemoryReference, RealignmentParams, RealignmentProcessor, SortedAlignmentReader, SortedSource, WriterParams};

use getopts::Options;

use tracing::info;
use tracing_subscriber::EnvFilter;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();
    let config = Config::new();
    init_logging(config.verbose);

    let reader = SortedAlignmentReader::open(&config.input)?;
    let header = reader.header().clone();
    let reference = InMemoryReference::load(&config.reference)?.aligned_to(&header)?;

    let mut writer = AlignmentWriter::create(&config.output, WriterParams::sorted())?;
    writer.copy_metadata(&header);
    if header.query_indices_permuted {
        writer.mark_query_indices_permuted();
    }

    let mut processor = RealignmentProcessor::new(reader, reference, config.params.clone());
    while let Some(entry) = processor.next_entry()? {
        writer.append(entry)?;
    }
    let statistics = processor.statistics();
    writer.set_statistic("realign.entries.realigned", &statistics.entries_realigned.to_string());
    writer.set_statistic("realign.entries.not.realignable", &statistics.entries_not_realignable.to_string());
    writer.close()?;
    info!(
        "Realigned {} of {} entries using a window of {} bp",
        statistics.entries_realigned, statistics.entries_read, processor.window_length()
    );

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    info!("Used {:.3} seconds", seconds);

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "goby_base=info,goby_realign=info" } else { "goby_base=warn,goby_realign=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .without_time()
        .init();
}

//-----------------------------------------------------------------------------

struct Config {
    input: PathBuf,
    reference: PathBuf,
    output: PathBuf,
    params: RealignmentParams,
    verbose: bool,
}

impl Config {
    pub fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();
        let header = format!("Usage: {} [options] -r reference.fa[.gz] -o output input", program);

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("r", "reference", "reference sequences in FASTA format (required)", "FILE");
        opts.optopt("o", "output", "basename of the output store (required)", "BASENAME");
        opts.optopt(
            "w",
            "window",
            &format!("realignment window length (default: {} times the longest query)", RealignmentParams::WINDOW_FACTOR),
            "INT",
        );
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

        let reference = match matches.opt_str("r") {
            Some(s) => PathBuf::from(s),
            None => {
                eprintln!("Error: Reference file is required\n");
                eprint!("{}", opts.usage(&header));
                process::exit(1);
            }
        };
        let output = match matches.opt_str("o") {
            Some(s) => PathBuf::from(s),
            None => {
                eprintln!("Error: Output basename is required\n");
                eprint!("{}", opts.usage(&header));
                process::exit(1);
            }
        };
        if matches.free.len() != 1 {
            eprintln!("Error: Expected 1 positional argument (input store)\n");
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        }
        let input = PathBuf::from(&matches.free[0]);

        let mut params = RealignmentParams::default();
        if let Some(s) = matches.opt_str("w") {
            params.window_length = match s.parse::<usize>() {
                Ok(x) if x > 0 => Some(x),
                Ok(_) => {
                    eprintln!("Error: --window must be positive");
                    process::exit(1);
                }
                Err(e) => {
                    eprintln!("Error: Failed to parse --window: {}", e);
                    process::exit(1);
                }
            };
        }
        let verbose = matches.opt_present("v");
        params.progress = verbose;

        Config {
            input,
            reference,
            output,
            params,
            verbose,
        }
    }
}

//-----------------------------------------------------------------------------
