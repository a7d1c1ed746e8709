mod logger;

use amdecrypt::{DecryptOptions, Job, Report, find_executable, session};
use anyhow::Context;
use clap::{ArgAction, ColorChoice, Parser};
use kdam::{BarExt, term, term::Colorizer, tqdm};
use log::{LevelFilter, info, warn};
use logger::Logger;
use std::{
    io::{IsTerminal, stderr},
    path::{Path, PathBuf},
    process,
    time::Duration,
};

/// Decrypt a fragmented FairPlay protected song through a decryption peer
/// and remux it as a plain m4a.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    /// Decryption peer as host:port, usually 127.0.0.1:10020.
    endpoint: String,

    /// Normalizer executable run on the muxed file, pass an empty string to skip it.
    normalizer: String,

    /// Track id registered as the key id of the song key.
    track_id: String,

    /// skd:// URI of the song key.
    key_uri: String,

    /// Fragmented mp4 to decrypt.
    input: PathBuf,

    /// Where to write the decrypted m4a.
    output: PathBuf,

    /// Connect, read and write timeout of the peer connection in seconds.
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Re-run the whole pipeline this many times after a transport failure.
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Keep the muxed file before normalization next to the output.
    #[arg(long)]
    keep_temp: bool,

    /// Check that the decryption peer is reachable before extracting anything.
    #[arg(long)]
    check: bool,

    /// Print a json report to stdout.
    #[arg(long)]
    json: bool,

    /// Increase logging, repeat for more.
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log errors and hide the progress bar.
    #[arg(short, long)]
    quiet: bool,

    /// When to output colored text.
    #[arg(long, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,
}

impl Args {
    fn level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Error;
        }

        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let colors = match args.color {
        ColorChoice::Always => true,
        ColorChoice::Auto => stderr().is_terminal(),
        ColorChoice::Never => false,
    };
    term::init(colors);
    colored::control::set_override(colors);
    Logger::init(args.level())?;

    let options = DecryptOptions::default()
        .endpoint(&args.endpoint)
        .normalizer(&args.normalizer)
        .timeout(Duration::from_secs(args.timeout))
        .retries(args.retries)
        .keep_temp(args.keep_temp);

    if args.check {
        session::probe(&options.endpoint, options.timeout)
            .with_context(|| format!("decryption peer at {} is unreachable", options.endpoint))?;
        info!("Decryption peer at {} is reachable", options.endpoint);

        if !options.normalizer.as_os_str().is_empty()
            && find_executable(&options.normalizer).is_none()
        {
            warn!(
                "{} not found, the output will not be normalized",
                options.normalizer.display()
            );
        }
    }

    let job = Job {
        track_id: args.track_id.clone(),
        key_uri: args.key_uri.clone(),
        input: args.input.clone(),
        output: args.output.clone(),
    };

    let mut pb = tqdm!(
        unit = " samples".to_owned(),
        dynamic_ncols = true,
        disable = args.quiet || args.json
    );

    let report = amdecrypt::run(&options, &job, |done, total| {
        if done == 0 {
            pb.total = total;
        }
        let _ = pb.update_to(done);
    });
    let _ = pb.clear();

    let report = report.with_context(|| format!("failed to decrypt {}", args.input.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        summary(&report, &args.output);
    }

    Ok(())
}

fn summary(report: &Report, output: &Path) {
    info!(
        "Decrypted {} samples ({} encrypted bytes, {} clear) into {} ({} bytes{})",
        report.samples,
        report.encrypted_bytes,
        report.clear_bytes,
        output.display(),
        report.output_bytes,
        if report.normalized { ", normalized" } else { "" }
    );
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {:#}", "error".colorize("bold red"), e);
        process::exit(1);
    }
}
