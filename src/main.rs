//! `lcstitch`: command-line front end for stitching and re-sorting light-curve
//! archives.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::LevelFilter;

use lcstitch::{resort_file, stitch_files, Archive, ExposureMatch, StitchConfig, StitchError};

#[derive(Parser, Debug)]
#[command(name = "lcstitch", version, about = "Stitch, time-sort and summarise light-curve archives")]
struct Cli {
    /// Log per-section shapes as well as progress.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Append log output to this file instead of stderr.
    #[arg(long, global = true, env = "LCSTITCH_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Concatenate archives along the frame axis into a new archive.
    Stitch {
        /// Input archives, stitched in the order given.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output archive; replaced if it exists.
        #[arg(short, long)]
        output: PathBuf,

        /// Keep only frames with this exposure time.
        #[arg(short = 'e', long = "exptime")]
        exptime: Option<f64>,

        /// Accept exposures within this distance of `--exptime`.
        #[arg(long, requires = "exptime")]
        tolerance: Option<f64>,

        /// JSON config file; flags given here take precedence.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Reorder inputs by their earliest frame time.
        #[arg(long)]
        order_by_time: bool,
    },

    /// Re-sort an existing archive by frame time, in place.
    Resort {
        filename: PathBuf,

        /// Confirm that the file may be rewritten.
        #[arg(short, long)]
        force: bool,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List the sections of an archive.
    Info { filename: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("{} {}", "warning:".yellow().bold(), e);
    }

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), StitchError> {
    match command {
        Command::Stitch {
            files,
            output,
            exptime,
            tolerance,
            config,
            order_by_time,
        } => {
            let mut config = load_config(config.as_deref())?;
            if exptime.is_some() {
                config.exposure_filter = exptime;
            }
            if let Some(epsilon) = tolerance {
                config.exposure_match = ExposureMatch::Tolerance { epsilon };
            }
            config.order_inputs_by_time |= order_by_time;

            let summary = stitch_files(files.as_slice(), &output, &config)?;
            println!(
                "{} {} ({} targets, {} frames, {} cubes)",
                "Stitched".green().bold(),
                output.display(),
                summary.targets,
                summary.frames,
                summary.cubes.len()
            );
        }
        Command::Resort {
            filename,
            force,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            if !force {
                eprintln!(
                    "{} resort rewrites {} in place; pass --force to continue",
                    "refusing:".yellow().bold(),
                    filename.display()
                );
            }
            resort_file(&filename, force, &config)?;
            println!("{} {}", "Sorted".green().bold(), filename.display());
        }
        Command::Info { filename } => {
            let archive = Archive::open(&filename)?;
            println!("{}", filename.display().to_string().bold());
            for info in archive.sections() {
                println!(
                    "  {:<12} {:<16} {} x {}",
                    info.name.cyan(),
                    info.kind.to_string(),
                    info.rows,
                    info.cols
                );
            }
            archive.check_alignment()?;
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<StitchConfig, StitchError> {
    match path {
        Some(path) => StitchConfig::from_json_file(path),
        None => Ok(StitchConfig::default()),
    }
}

/// Sets up `env_logger`: Info (Debug with `-v`) unless `RUST_LOG` says otherwise,
/// a timestamped `[LEVEL] message` format, and an optional append-mode log file.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> std::io::Result<()> {
    let mut builder = env_logger::Builder::new();

    builder.filter_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    builder.parse_default_env();

    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] [{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.args()
        )
    });

    let mut result = Ok(());
    if let Some(path) = log_file {
        match OpenOptions::new().append(true).create(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => result = Err(e),
        }
    }

    let _ = builder.try_init();
    result
}
