use clap::{builder::PossibleValue, Parser, ValueEnum};
use log::{error, info, warn};
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;
use std::ops::Deref;
use std::panic;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use gcovcache::*;

#[derive(Clone, Copy, PartialEq)]
enum OutputType {
    Summary,
    Files,
    Functions,
    Lines,
    Status,
}

impl FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "summary" => Self::Summary,
            "files" => Self::Files,
            "functions" => Self::Functions,
            "lines" => Self::Lines,
            "status" => Self::Status,
            _ => return Err(format!("{} is not a supported output type", s)),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct LevelFilterArg(LevelFilter);

impl ValueEnum for LevelFilterArg {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Self(LevelFilter::Off),
            Self(LevelFilter::Error),
            Self(LevelFilter::Warn),
            Self(LevelFilter::Info),
            Self(LevelFilter::Debug),
            Self(LevelFilter::Trace),
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        match self.0 {
            LevelFilter::Off => Some(PossibleValue::new("OFF")),
            LevelFilter::Error => Some(PossibleValue::new("ERROR")),
            LevelFilter::Warn => Some(PossibleValue::new("WARN")),
            LevelFilter::Info => Some(PossibleValue::new("INFO")),
            LevelFilter::Debug => Some(PossibleValue::new("DEBUG")),
            LevelFilter::Trace => Some(PossibleValue::new("TRACE")),
        }
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    max_term_width = 100,
    about = "Load gcov coverage data in parallel and summarize it per file and per function",
    help_template = "\
{before-help}{name}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
"
)]
struct Opt {
    /// Sets the workspace roots. Build directories default to these.
    #[arg(required = true)]
    workspaces: Vec<PathBuf>,
    /// Specifies a JSON config file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Adds a build directory to search for data files. `${workspaceFolder}` is
    /// replaced by each workspace root.
    #[arg(long = "build-dir", value_name = "PATH", num_args = 1)]
    build_dirs: Vec<String>,
    /// Sets the number of batches processed in parallel.
    #[arg(long, value_name = "NUMBER")]
    threads: Option<usize>,
    /// Sets the maximum number of data files per gcov invocation.
    #[arg(long, value_name = "NUMBER")]
    chunk_size: Option<usize>,
    /// Sets the gcov binary to use.
    #[arg(long, value_name = "PATH")]
    gcov: Option<PathBuf>,
    /// Specifies the directory relative source paths are resolved against.
    #[arg(long, value_name = "DIRECTORY")]
    base_dir: Option<PathBuf>,
    /// Sets the output type.
    #[arg(
        short = 't',
        long,
        long_help = "\
            Output type:\n\
            - *summary* for per-file and per-function line totals as JSON;\n\
            - *files* to only return a list of files;\n\
            - *functions* for the functions of --file by call count;\n\
            - *lines* for the executed and missed lines of --file;\n\
            - *status* for a one line summary of --file.\n\
        ",
        value_name = "OUTPUT TYPE",
        default_value = "summary",
    )]
    output_type: OutputType,
    /// Source file used by the 'functions', 'lines' and 'status' output types.
    #[arg(
        long,
        value_name = "PATH",
        required_if_eq_any = [("output_type", "functions"), ("output_type", "lines"), ("output_type", "status")]
    )]
    file: Option<String>,
    /// Specifies the output path.
    #[arg(short, long, value_name = "PATH")]
    output_path: Option<PathBuf>,
    /// Set the file where to log (or stderr or stdout). Defaults to 'stderr'.
    #[arg(long, value_name = "LOG", default_value = "stderr")]
    log: PathBuf,
    /// Set the log level.
    #[arg(long, value_name = "LEVEL", default_value = "ERROR", value_enum)]
    log_level: LevelFilterArg,
}

fn init_logging(log: &Path, level: LevelFilter) {
    let stdout = Path::new("stdout");
    let stderr = Path::new("stderr");

    if log == stdout {
        let _ = TermLogger::init(
            level,
            LogConfig::default(),
            TerminalMode::Stdout,
            ColorChoice::Auto,
        );
    } else if log == stderr {
        let _ = TermLogger::init(
            level,
            LogConfig::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        );
    } else if let Ok(file) = File::create(log) {
        let _ = WriteLogger::init(level, LogConfig::default(), file);
    } else {
        let _ = TermLogger::init(
            level,
            LogConfig::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        );
        error!(
            "Unable to create log file: {}. Switch to stderr",
            log.display()
        );
    }
}

fn main() {
    let opt = Opt::parse();

    init_logging(&opt.log, opt.log_level.0);

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line()))
            .unwrap_or(("<unknown>", 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });
        error!("A panic occurred at {}:{}: {}", filename, line, cause);
    }));

    let mut config = match opt.config {
        Some(ref path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(threads) = opt.threads {
        config.workers = threads.max(1);
    }
    if let Some(chunk_size) = opt.chunk_size {
        config.chunk_size = chunk_size.max(1);
    }
    if let Some(gcov) = opt.gcov {
        config.gcov = gcov;
    }
    if opt.base_dir.is_some() {
        config.base_dir = opt.base_dir;
    }
    config.build_directories.extend(opt.build_dirs);

    let roots = config.resolve_build_directories(&opt.workspaces);
    let tool = Gcov::new(config.gcov.clone());
    let scanner = DirectoryScanner::new();
    let coordinator = Coordinator::new(tool, scanner, config);
    let handle = CacheHandle::default();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            warn!("Ctrl+c pressed - keeping the data loaded so far.");
            cancel.cancel();
        }) {
            warn!("Unable to install the Ctrl+c handler: {}", e);
        }
    }

    let report = match coordinator.reload(&handle, &roots, &cancel, &mut |event| {
        info!("{}", event.message)
    }) {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let cache = handle.current();
    let output_path = opt.output_path.as_deref();
    let result = match opt.output_type {
        OutputType::Summary => output_summary(&cache, output_path),
        OutputType::Files => output_files(&cache, output_path),
        OutputType::Functions | OutputType::Lines | OutputType::Status => {
            let path = opt.file.unwrap_or_default();
            let file = match cache.lookup(&path) {
                Some(file) => file,
                None => {
                    error!("No coverage data for {}", path);
                    process::exit(1);
                }
            };
            match opt.output_type {
                OutputType::Functions => output_functions(&file, output_path),
                OutputType::Lines => output_lines(&cache, &file, output_path),
                _ => output_status(&file, output_path),
            }
        }
    };

    if let Err(e) = result {
        error!("Unable to write output: {}", e);
        process::exit(1);
    }
    if !report.failures.is_empty() {
        process::exit(2);
    }
}
