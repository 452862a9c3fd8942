mod cache;
mod config;
mod error;
mod replace;
mod trace;

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

use cache::Cache;
use config::Config;
use error::{ConfigError, Error, TraceError};
use trace::{Access, Kind, Trace};

const USAGE: &str = "\
Usage: csim_rs [-hv] -s <num> -E <num> -b <num> -t <file>
Options:
  -h                 Print this help message.
  -v                 Optional verbose flag.
  -s <num>           Number of set index bits.
  -E <num>           Number of lines per set.
  -b <num>           Number of block offset bits.
  -t <file>          Trace file (.xz traces are decompressed).
  --config <json>    Cache geometry as JSON, e.g. '{\"s\": 4, \"E\": 1, \"b\": 4}'.
  -p <path>          Read the JSON geometry from a file. Flags override it.
  --json <path>      Write the final statistics as JSON.
  --buffer-size <n>  Records per block handed over by the reader (16384).
  --queue-size <n>   Blocks buffered ahead of the simulator (32).

Examples:
  linux>  csim_rs -s 4 -E 1 -b 4 -t traces/yi.trace
  linux>  csim_rs -v -s 8 -E 2 -b 4 -t traces/yi.trace";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let mut args = pico_args::Arguments::from_env();
    if std::env::args_os().len() <= 1 || args.contains("-h") {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    match run(args, &mut io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("csim_rs: {err}");
            if shows_usage(&err) {
                eprintln!("{USAGE}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Errors caused by how the program was invoked, as opposed to by the trace contents.
fn shows_usage(err: &Error) -> bool {
    matches!(
        err,
        Error::Config(_) | Error::Args(_) | Error::Unexpected(_) | Error::Trace(TraceError::Io(_))
    )
}

fn run(mut args: pico_args::Arguments, out: &mut impl Write) -> Result<(), Error> {
    let verbose = args.contains("-v");
    let flags = Config {
        s: args.opt_value_from_str("-s")?,
        lines: args.opt_value_from_str("-E")?,
        b: args.opt_value_from_str("-b")?,
    };

    let file_config = if let Some(json) = args.opt_value_from_str::<_, String>("--config")? {
        Config::from_json(&json)?
    } else if let Some(path) = args.opt_value_from_str::<_, PathBuf>("-p")? {
        let json = fs::read_to_string(&path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        Config::from_json(&json)?
    } else {
        Config::default()
    };

    let trace_path: Option<PathBuf> = args.opt_value_from_str("-t")?;
    let stats_path: Option<PathBuf> = args.opt_value_from_str("--json")?;
    let events_per_block: usize = args
        .opt_value_from_str("--buffer-size")?
        .unwrap_or(1024 * 16);
    let blocks_per_queue: usize = args.opt_value_from_str("--queue-size")?.unwrap_or(32);

    let rest = args.finish();
    if !rest.is_empty() {
        return Err(Error::Unexpected(rest));
    }

    let config = file_config.merge(flags);
    let mut cache = config.to_cache()?;
    let trace_path = trace_path.ok_or(ConfigError::Missing("-t"))?;
    info!(
        sets = cache.n_sets,
        ways = cache.n_ways,
        trace = %trace_path.display(),
        "starting simulation"
    );

    let stdout_err = |source: io::Error| Error::Io {
        path: "<stdout>".to_string(),
        source,
    };
    let trace = Trace::read(trace_path, events_per_block, blocks_per_queue)?;
    for block in trace.rec.iter() {
        match block {
            Ok(events) => operate(&mut cache, &events, verbose, out).map_err(stdout_err)?,
            Err(err) => {
                warn!(%err, "stopping at unreadable trace record");
                break;
            }
        }
    }

    if tracing::enabled!(Level::DEBUG) {
        for set in 0..cache.n_sets {
            debug!(set, tags = ?cache.resident_tags(set), "resident");
        }
    }

    let stats = cache.stats();
    info!(accesses = stats.accesses, miss_rate = stats.miss_rate, "finished");
    writeln!(out, "{stats}").map_err(stdout_err)?;

    if let Some(path) = stats_path {
        let io_err = |source: io::Error| Error::Io {
            path: path.display().to_string(),
            source,
        };
        let stats_file = fs::File::create(&path).map_err(io_err)?;
        serde_json::to_writer_pretty(stats_file, &stats).map_err(|e| io_err(e.into()))?;
    }
    Ok(())
}

fn operate(
    cache: &mut Cache,
    events: &[Access],
    verbose: bool,
    out: &mut impl Write,
) -> io::Result<()> {
    for event in events {
        let is_modify = match event.kind {
            Kind::Instruction => continue,
            Kind::Load | Kind::Store => false,
            Kind::Modify => true,
        };
        let outcome = cache.access(event.addr, is_modify);
        if verbose {
            writeln!(out, "{event} {outcome}")?;
        }
    }
    Ok(())
}
