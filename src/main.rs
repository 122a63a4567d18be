use std::io::prelude::*;
use std::path::{Path, PathBuf};

use anyhow::Result;
use env_logger::Builder;
use log::{Level, LevelFilter};
use owo_colors::OwoColorize;

mod menu;

fn color_level(level: Level) -> String {
    match level {
        Level::Error => level.red().to_string(),
        Level::Warn => level.yellow().to_string(),
        Level::Info => level.green().to_string(),
        Level::Debug => level.blue().to_string(),
        Level::Trace => level.purple().to_string(),
    }
}

const fn level_filter(verbose: usize) -> LevelFilter {
    match verbose {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5 => LevelFilter::Trace,
        //default to off
        _ => LevelFilter::Off,
    }
}

fn main() -> Result<()> {
    let args: menu::Polybin = argp::parse_args_or_exit(argp::DEFAULT);

    if args.verbose != 0 {
        Builder::new()
            .format(|buf, record| writeln!(buf, "{} {}", color_level(record.level()), record.args()))
            .filter(None, level_filter(args.verbose))
            .init();
    }

    let ico_path = args.ico.as_deref().map(Path::new);
    let mp4_path = args.mp4.as_deref().map(Path::new);
    let zip_paths: Vec<PathBuf> = args.zip.iter().map(PathBuf::from).collect();

    log::info!("building {}", args.output);
    if let Err(error) = polybin_core::build(&args.output, ico_path, mp4_path, &zip_paths) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
    log::info!("wrote {}", args.output);

    Ok(())
}
