use clap::error::ErrorKind;
use clap::{ArgGroup, CommandFactory, Parser};
use ifskit::block::FrameReader;
use ifskit::header::CompressionKind;
use ifskit::verify::{find_aligned_signature, verify_file};
use ifskit::{locator, merge, transcode, IfsError, LzoCodec, StartupHeader, TranscodeOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, metadata::LevelFilter};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ifskit", version, about = "Compress, decompress, split and merge QNX IFS images")]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["compress", "decompress", "split", "merge", "checksum", "info"]),
))]
struct Cli {
    /// Compress an uncompressed image
    #[arg(short = 'c', long = "Compress", alias = "compress")]
    compress: bool,
    /// Decompress an LZO image
    #[arg(short = 'd', long = "Decompress", alias = "decompress")]
    decompress: bool,
    /// Split a firmware blob into ifsN.bin / ifsN.ifs segments
    #[arg(short = 's', long = "Split", alias = "split")]
    split: bool,
    /// Merge ifsN.* segments from a directory back into one blob
    #[arg(short = 'm', long = "Merge", alias = "merge")]
    merge: bool,
    /// Report the checksums of the first container in a blob
    #[arg(long = "Checksum", alias = "checksum")]
    checksum: bool,
    /// Print the container header as JSON
    #[arg(long = "Info", alias = "info")]
    info: bool,

    /// Input file (input directory for merge)
    #[arg(short = 'i', long = "InFile", alias = "infile")]
    in_file: PathBuf,
    /// Output file (output directory for split)
    #[arg(short = 'o', long = "OutFile", alias = "outfile")]
    out_file: Option<PathBuf>,
    /// Run the optimize pass on every compressed block
    #[arg(long = "Optimize", alias = "optimize")]
    optimize: bool,
    /// Show debug output
    #[arg(short = 'v', long = "Verbose", alias = "verbose")]
    verbose: bool,
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Success      = 0,
    Usage        = 1,
    MissingInput = 2,
    Failed       = 3,
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        ExitCode::from(status as u8)
    }
}

/// Parse `args`; help and version requests come back as `Err(Success)`.
fn parse_args<I, T>(args: I) -> Result<Cli, Status>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|e| {
        let _ = e.print();
        if e.use_stderr() { Status::Usage } else { Status::Success }
    })
}

/// Check the arguments clap cannot, returning the output path if the action
/// takes one.
fn check_args(cli: &Cli) -> Result<Option<PathBuf>, Status> {
    let needs_output = cli.compress || cli.decompress || cli.split || cli.merge;
    let out_file = match (&cli.out_file, needs_output) {
        (Some(p), _) => Some(p.clone()),
        (None, false) => None,
        (None, true) => {
            let err = Cli::command().error(
                ErrorKind::MissingRequiredArgument,
                "--OutFile is required for this action",
            );
            let _ = err.print();
            return Err(Status::Usage);
        }
    };

    let input_exists = if cli.merge { cli.in_file.is_dir() } else { cli.in_file.is_file() };
    if !input_exists {
        error!("input not found: {}", cli.in_file.display());
        return Err(Status::MissingInput);
    }
    Ok(out_file)
}

fn execute(cli: &Cli) -> Status {
    let out_file = match check_args(cli) {
        Ok(out) => out,
        Err(status) => return status,
    };
    match run(cli, out_file.as_deref()) {
        Ok(()) => Status::Success,
        Err(e) => {
            error!("{e}");
            Status::Failed
        }
    }
}

fn main() -> ExitCode {
    let cli = match parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(status) => return status.into(),
    };

    let level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::builder().with_default_directive(level.into()).from_env_lossy())
        .with(tracing_subscriber::fmt::layer().without_time().with_writer(std::io::stderr));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("cannot set default tracing subscriber");
    }

    execute(&cli).into()
}

fn run(cli: &Cli, out_file: Option<&Path>) -> Result<(), IfsError> {
    let opts = TranscodeOptions { optimize: cli.optimize, ..Default::default() };
    let codec = LzoCodec::default();
    let mut progress = |done: usize, total: usize| {
        eprint!("\r  {done}/{total} bytes ({}%)", done * 100 / total.max(1));
        let _ = std::io::stderr().flush();
    };

    // ── Compress / Decompress ────────────────────────────────────────────────
    if let (true, Some(out)) = (cli.compress, out_file) {
        let image = transcode::compress_file(&cli.in_file, out, &codec, &opts, Some(&mut progress))?;
        eprintln!();
        println!("Compressed: {} ({} frames, {} bytes)", out.display(), image.frames, image.bytes.len());
        return Ok(());
    }
    if let (true, Some(out)) = (cli.decompress, out_file) {
        let image = transcode::decompress_file(&cli.in_file, out, &codec, &opts, Some(&mut progress))?;
        eprintln!();
        println!("Decompressed: {} ({} frames, {} bytes)", out.display(), image.frames, image.bytes.len());
        return Ok(());
    }

    // ── Split / Merge ────────────────────────────────────────────────────────
    if let (true, Some(out)) = (cli.split, out_file) {
        let written = locator::split_file(&cli.in_file, out)?;
        println!("{:<12} {:>12} {:>12}", "Segment", "Offset", "Size");
        for (segment, _) in &written {
            println!("{:<12} {:>#12x} {:>12}", segment.file_name(), segment.range.start, segment.len());
        }
        return Ok(());
    }
    if let (true, Some(out)) = (cli.merge, out_file) {
        let size = merge::merge_dir(&cli.in_file, out)?;
        println!("Merged: {} ({size} bytes)", out.display());
        return Ok(());
    }

    // ── Checksum ─────────────────────────────────────────────────────────────
    if cli.checksum {
        let report = verify_file(&cli.in_file)?;
        println!("Container at {:#x}, {} bytes", report.offset, report.len);
        for outcome in report.checksums.iter() {
            println!(
                "  {:<8} stored {:#010x}  expected {:#010x}  {}",
                format!("{:?}", outcome.kind),
                outcome.stored,
                outcome.corrected,
                if outcome.valid { "ok" } else { "MISMATCH" },
            );
        }
        if report.checksums.image.is_none() {
            println!("  Image    not found");
        }
        return Ok(());
    }

    // ── Info ─────────────────────────────────────────────────────────────────
    if cli.info {
        return info(&cli.in_file);
    }

    Ok(())
}

fn info(path: &Path) -> Result<(), IfsError> {
    let blob = std::fs::read(path)?;
    let offset = find_aligned_signature(&blob).ok_or(IfsError::NoContainersFound)?;
    let header = StartupHeader::read_from(&blob, offset)?;
    let compression = header.compression();

    let mut frames = 0usize;
    let mut stream_bytes = 0usize;
    if compression != CompressionKind::None {
        let end = (offset + header.stored_size as usize).min(blob.len());
        let start = offset + header.startup_size as usize;
        if start <= end {
            for frame in FrameReader::new(&blob[..end], start) {
                match frame {
                    Ok(f) => {
                        frames += 1;
                        stream_bytes += f.payload.len();
                    }
                    Err(e) => {
                        tracing::warn!("block stream stops early: {e}");
                        break;
                    }
                }
            }
        }
    }

    let summary = serde_json::json!({
        "offset":       offset,
        "header":       &header,
        "compression":  compression.name(),
        "virtual":      header.is_virtual(),
        "big_endian":   header.is_big_endian(),
        "frames":       frames,
        "stream_bytes": stream_bytes,
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::warn!("cannot render header: {e}"),
    }
    Ok(())
}
