// Command-line interface for oxivcd.
//
// Subcommands: encode, decode, header, headers, delta, config, dict-id.
// Every command returns a process exit code; `run()` parses arguments,
// installs the logger and exits with it.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::dictionary::{Dictionary, DictionaryId};
use crate::error::Error;
use crate::hash::config::{ALL_PROFILES, DEFAULT_LEVEL, DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE};
use crate::sink::IoSink;
use crate::stream::decoder::DEFAULT_MAX_TARGET;
use crate::stream::{DecoderOptions, EncoderOptions, StreamingDecoder, StreamingEncoder};
use crate::vcdiff::header::{FormatFlags, HeaderIndicator, WindowIndicator};
use crate::vcdiff::{Instruction, InstructionIter, WindowIter};

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1u64 << 10),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1 << 20),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1 << 30),
        _ => (s, 1),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Dictionary-based VCDIFF (RFC 3284) encoder/decoder.
#[derive(Parser, Debug)]
#[command(
    name = "oxivcd",
    version,
    about = "Dictionary-based VCDIFF delta encoder/decoder",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Encode a target against a dictionary.
    Encode(EncodeArgs),
    /// Reconstruct a target from a dictionary and a delta.
    Decode(DecodeArgs),
    /// Print build/configuration details.
    Config,
    /// Print the file header and the first window header.
    Header(PrintArgs),
    /// Print every window header.
    Headers(PrintArgs),
    /// Print every window header and its instructions.
    Delta(PrintArgs),
    /// Print the identifier of a dictionary file.
    DictId(DictIdArgs),
}

#[derive(Args, Debug)]
struct IoArgs {
    /// Input file (default: stdin).
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "input_pos")]
    input: Option<PathBuf>,

    /// Output file (default: stdout).
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "output_pos")]
    output: Option<PathBuf>,

    /// Write output to stdout.
    #[arg(short = 'c', long)]
    stdout: bool,

    /// Run the command without writing output.
    #[arg(long = "check-only")]
    no_output: bool,

    /// Input file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    input_pos: Option<PathBuf>,

    /// Output file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    output_pos: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Dictionary file.
    #[arg(long, short = 'd', value_hint = ValueHint::FilePath)]
    dictionary: PathBuf,

    /// Compression level (0-9).
    #[arg(long, short = 'l', value_parser = clap::value_parser!(u32).range(0..=9), default_value_t = DEFAULT_LEVEL)]
    level: u32,

    /// Target bytes per window (supports K/M/G suffix).
    #[arg(long = "window-size", value_parser = parse_byte_size, default_value_t = DEFAULT_WINDOW_SIZE as u64)]
    window_size: u64,

    /// Write interleaved windows (extended format).
    #[arg(long)]
    interleaved: bool,

    /// Write Adler-32 window checksums (extended format).
    #[arg(long)]
    checksum: bool,

    /// Only match against the dictionary, never earlier target bytes.
    #[arg(long = "no-target-matches")]
    no_target_matches: bool,

    #[command(flatten)]
    io: IoArgs,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Dictionary file.
    #[arg(long, short = 'd', value_hint = ValueHint::FilePath)]
    dictionary: PathBuf,

    /// Disable Adler-32 verification.
    #[arg(long = "no-checksum")]
    no_checksum: bool,

    /// Reject windows that copy from earlier target bytes.
    #[arg(long = "no-vcd-target")]
    no_vcd_target: bool,

    /// Largest target window accepted (supports K/M/G suffix).
    #[arg(long = "max-window-size", value_parser = parse_byte_size, default_value_t = DEFAULT_MAX_TARGET as u64)]
    max_window_size: u64,

    /// Largest total target accepted (supports K/M/G suffix).
    #[arg(long = "max-target-size", value_parser = parse_byte_size, default_value_t = DEFAULT_MAX_TARGET as u64)]
    max_target_size: u64,

    /// Exact expected target size (supports K/M/G suffix).
    #[arg(long = "expected-size", value_parser = parse_byte_size)]
    expected_size: Option<u64>,

    #[command(flatten)]
    io: IoArgs,
}

#[derive(Args, Debug)]
struct PrintArgs {
    /// VCDIFF input file.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,
}

#[derive(Args, Debug)]
struct DictIdArgs {
    /// Dictionary file.
    #[arg(value_hint = ValueHint::FilePath)]
    dictionary: PathBuf,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Encode,
    Decode,
    Config,
    PrintHdr,
    PrintHdrs,
    PrintDelta,
    DictId,
}

#[derive(Debug)]
struct Options {
    command: Command,
    use_stdout: bool,
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
    no_output: bool,
    dictionary_file: Option<PathBuf>,
    input_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
    encoder: EncoderOptions,
    decoder: DecoderOptions,
}

fn resolve_options(cli: Cli) -> Options {
    let mut opts = Options {
        command: Command::Config,
        use_stdout: false,
        force: cli.force,
        quiet: cli.quiet,
        verbose: cli.verbose.min(2),
        json_output: cli.json_output,
        no_output: false,
        dictionary_file: None,
        input_file: None,
        output_file: None,
        encoder: EncoderOptions::default(),
        decoder: DecoderOptions::default(),
    };

    let io = match cli.command {
        Cmd::Encode(args) => {
            let mut format = FormatFlags::empty();
            format.set(FormatFlags::INTERLEAVED, args.interleaved);
            format.set(FormatFlags::CHECKSUM, args.checksum);
            opts.command = Command::Encode;
            opts.dictionary_file = Some(args.dictionary);
            opts.encoder = EncoderOptions {
                level: args.level,
                window_size: usize::try_from(args.window_size).unwrap_or(usize::MAX),
                format,
                target_matches: !args.no_target_matches,
            };
            Some(args.io)
        }
        Cmd::Decode(args) => {
            opts.command = Command::Decode;
            opts.dictionary_file = Some(args.dictionary);
            opts.decoder = DecoderOptions {
                verify_checksum: !args.no_checksum,
                allow_vcd_target: !args.no_vcd_target,
                max_window_size: usize::try_from(args.max_window_size).unwrap_or(usize::MAX),
                max_target_size: args.max_target_size,
                expected_target_size: args.expected_size,
            };
            Some(args.io)
        }
        Cmd::Config => None,
        Cmd::Header(args) => print_options(&mut opts, Command::PrintHdr, args),
        Cmd::Headers(args) => print_options(&mut opts, Command::PrintHdrs, args),
        Cmd::Delta(args) => print_options(&mut opts, Command::PrintDelta, args),
        Cmd::DictId(args) => {
            opts.command = Command::DictId;
            opts.dictionary_file = Some(args.dictionary);
            None
        }
    };
    if let Some(io) = io {
        opts.use_stdout = io.stdout;
        opts.no_output = io.no_output;
        opts.input_file = io.input.or(io.input_pos);
        opts.output_file = io.output.or(io.output_pos);
    }
    opts
}

fn print_options(opts: &mut Options, command: Command, args: PrintArgs) -> Option<IoArgs> {
    opts.command = command;
    opts.input_file = Some(args.input);
    None
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("oxivcd".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = resolve_options(cli);
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn read_dictionary(path: &Path) -> Result<Vec<u8>, i32> {
    std::fs::read(path).map_err(|e| {
        eprintln!("oxivcd: dictionary file: {}: {e}", path.display());
        1
    })
}

fn open_input(opts: &Options) -> Result<Box<dyn Read>, i32> {
    match &opts.input_file {
        Some(path) => match File::open(path) {
            Ok(f) => Ok(Box::new(BufReader::with_capacity(BUF_SIZE, f))),
            Err(e) => {
                eprintln!("oxivcd: input file: {}: {e}", path.display());
                Err(1)
            }
        },
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn open_output(opts: &Options) -> Result<Box<dyn Write>, i32> {
    if opts.no_output {
        return Ok(Box::new(io::sink()));
    }
    match (opts.use_stdout, &opts.output_file) {
        (true, _) | (_, None) => Ok(Box::new(BufWriter::with_capacity(BUF_SIZE, io::stdout().lock()))),
        (false, Some(path)) => {
            if path.exists() && !opts.force {
                eprintln!("oxivcd: output file exists, use -f to overwrite: {}", path.display());
                return Err(1);
            }
            match File::create(path) {
                Ok(f) => Ok(Box::new(BufWriter::with_capacity(BUF_SIZE, f))),
                Err(e) => {
                    eprintln!("oxivcd: output file: {}: {e}", path.display());
                    Err(1)
                }
            }
        }
    }
}

/// Feed `reader` to `step` in `BUF_SIZE` pieces.
fn pump(mut reader: impl Read, mut step: impl FnMut(&[u8]) -> crate::Result<()>) -> crate::Result<()> {
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => step(&buf[..n])?,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

fn emit_json(value: &serde_json::Value) {
    eprintln!("{value:#}");
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("oxivcd version {version}");

    let adler32 = cfg!(feature = "adler32") as u8;
    let file_io = cfg!(feature = "file-io") as u8;
    let parallel = cfg!(feature = "parallel") as u8;
    let ptr_size = std::mem::size_of::<*const ()>();

    eprintln!("ADLER32_SIMD={adler32}");
    eprintln!("FILE_IO={file_io}");
    eprintln!("PARALLEL={parallel}");
    eprintln!("DEFAULT_LEVEL={DEFAULT_LEVEL}");
    eprintln!("DEFAULT_WINDOW_SIZE={DEFAULT_WINDOW_SIZE}");
    eprintln!("MAX_WINDOW_SIZE={MAX_WINDOW_SIZE}");
    eprintln!("DEFAULT_MAX_TARGET={DEFAULT_MAX_TARGET}");
    for profile in ALL_PROFILES {
        eprintln!(
            "PROFILE_{}=max_probes:{},min_match:{}",
            profile.name.to_uppercase(),
            profile.max_probes,
            profile.min_match
        );
    }
    eprintln!("sizeof(usize)={ptr_size}");

    0
}

// ---------------------------------------------------------------------------
// Dictionary id command
// ---------------------------------------------------------------------------

fn cmd_dict_id(opts: &Options) -> i32 {
    let Some(path) = &opts.dictionary_file else {
        eprintln!("oxivcd: dict-id requires a dictionary file");
        return 1;
    };
    let bytes = match read_dictionary(path) {
        Ok(bytes) => bytes,
        Err(code) => return code,
    };
    let id = DictionaryId::of(&bytes);
    println!("{id}");
    if opts.json_output {
        emit_json(&serde_json::json!({
            "command": "dict-id",
            "dictionary_size": bytes.len(),
            "id": id.to_string(),
        }));
    }
    0
}

// ---------------------------------------------------------------------------
// Encode command
// ---------------------------------------------------------------------------

fn cmd_encode(opts: &Options) -> i32 {
    let Some(path) = &opts.dictionary_file else {
        eprintln!("oxivcd: encode requires --dictionary");
        return 1;
    };
    let dictionary = match read_dictionary(path).map(Dictionary::build) {
        Ok(Ok(dictionary)) => Arc::new(dictionary),
        Ok(Err(e)) => {
            eprintln!("oxivcd: {}: {e}", path.display());
            return 1;
        }
        Err(code) => return code,
    };
    let reader = match open_input(opts) {
        Ok(r) => r,
        Err(code) => return code,
    };
    let writer = match open_output(opts) {
        Ok(w) => w,
        Err(code) => return code,
    };

    let mut encoder = StreamingEncoder::new(Arc::clone(&dictionary), IoSink::new(writer), opts.encoder);
    let result = encoder
        .start()
        .and_then(|()| pump(reader, |chunk| encoder.encode_chunk(chunk)))
        .and_then(|()| encoder.finish());
    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("oxivcd: encode error: {e}");
            return 1;
        }
    };
    if let Err(e) = encoder.into_sink().into_inner().flush() {
        eprintln!("oxivcd: write flush error: {e}");
        return 1;
    }

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "oxivcd: encoder: dictionary {} ({} bytes), input size: {}, delta size: {}, windows: {}, copies: {}",
            dictionary.id(),
            dictionary.len(),
            stats.bytes_in,
            stats.bytes_out,
            stats.windows,
            stats.copies
        );
    }
    if opts.json_output {
        emit_json(&serde_json::json!({
            "command": "encode",
            "dictionary_id": dictionary.id().to_string(),
            "dictionary_size": dictionary.len(),
            "input_size": stats.bytes_in,
            "delta_size": stats.bytes_out,
            "windows": stats.windows,
            "copies": stats.copies,
            "level": opts.encoder.level,
        }));
    }
    0
}

// ---------------------------------------------------------------------------
// Decode command
// ---------------------------------------------------------------------------

fn cmd_decode(opts: &Options) -> i32 {
    let Some(path) = &opts.dictionary_file else {
        eprintln!("oxivcd: decode requires --dictionary");
        return 1;
    };
    let dictionary = match read_dictionary(path) {
        Ok(bytes) => bytes,
        Err(code) => return code,
    };
    let reader = match open_input(opts) {
        Ok(r) => r,
        Err(code) => return code,
    };
    let writer = match open_output(opts) {
        Ok(w) => w,
        Err(code) => return code,
    };

    let mut decoder = StreamingDecoder::new(dictionary, IoSink::new(writer), opts.decoder);
    let result = pump(reader, |chunk| decoder.decode_chunk(chunk)).and_then(|()| decoder.finish());
    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("oxivcd: decode error: {e}");
            return 1;
        }
    };
    if let Err(e) = decoder.into_sink().into_inner().flush() {
        eprintln!("oxivcd: write flush error: {e}");
        return 1;
    }

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "oxivcd: decoder: delta size: {}, output size: {}, windows: {}",
            stats.bytes_in, stats.bytes_out, stats.windows
        );
    }
    if opts.json_output {
        emit_json(&serde_json::json!({
            "command": "decode",
            "delta_size": stats.bytes_in,
            "output_size": stats.bytes_out,
            "windows": stats.windows,
        }));
    }
    0
}

// ---------------------------------------------------------------------------
// Print commands (header, headers, delta)
// ---------------------------------------------------------------------------

fn flag_names<const N: usize>(names: [(bool, &str); N]) -> String {
    let set: Vec<&str> = names.iter().filter(|(on, _)| *on).map(|(_, name)| *name).collect();
    if set.is_empty() { "none".into() } else { set.join(" ") }
}

fn cmd_print(opts: &Options) -> i32 {
    let Some(path) = &opts.input_file else {
        eprintln!("oxivcd: print commands require an input file");
        return 1;
    };
    let delta = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("oxivcd: {}: {e}", path.display());
            return 1;
        }
    };
    let (file_header, windows) = match WindowIter::new(&delta) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("oxivcd: invalid VCDIFF header: {e}");
            return 1;
        }
    };
    let extended = windows.is_extended();

    println!("VCDIFF version:               {:#04x}", file_header.version);
    println!(
        "VCDIFF header indicator:      {}",
        flag_names([(file_header.indicator.contains(HeaderIndicator::APPHEADER), "VCD_APPHEADER")])
    );
    if let Some(app) = file_header.app_header.as_deref().filter(|a| !a.is_empty()) {
        println!("VCDIFF application header:    {}", String::from_utf8_lossy(app));
    }

    let mut target_offset = 0u64;
    for (number, window) in windows.enumerate() {
        let window = match window {
            Ok(w) => w,
            Err(e) => {
                eprintln!("oxivcd: window {number}: {e}");
                return 1;
            }
        };
        let header = &window.header;
        println!();
        println!("VCDIFF window number:         {number}");
        println!("VCDIFF window offset:         {}", window.offset);
        println!(
            "VCDIFF window indicator:      {}",
            flag_names([
                (header.indicator.contains(WindowIndicator::SOURCE), "VCD_SOURCE"),
                (header.indicator.contains(WindowIndicator::TARGET), "VCD_TARGET"),
                (header.indicator.contains(WindowIndicator::CHECKSUM), "VCD_ADLER32"),
            ])
        );
        if let Some(checksum) = header.checksum {
            println!("VCDIFF adler32 checksum:      {checksum:08X}");
        }
        if let Some(seg) = header.segment {
            println!("VCDIFF copy window length:    {}", seg.len);
            println!("VCDIFF copy window offset:    {}", seg.pos);
        }
        println!("VCDIFF delta encoding length: {}", header.delta_len(extended));
        println!("VCDIFF target window length:  {}", header.target_len);
        println!("VCDIFF target window offset:  {target_offset}");
        if header.is_interleaved(extended) {
            println!("VCDIFF layout:                interleaved ({} bytes)", header.inst_len);
        } else {
            println!("VCDIFF data section length:   {}", header.data_len);
            println!("VCDIFF inst section length:   {}", header.inst_len);
            println!("VCDIFF addr section length:   {}", header.addr_len);
        }

        if opts.command == Command::PrintDelta {
            println!("  Offset Code Type1 Size1  @Addr1");
            let mut at = 0usize;
            for inst in InstructionIter::new(header, window.body, extended) {
                let inst = match inst {
                    Ok(inst) => inst,
                    Err(e) => {
                        eprintln!("oxivcd: window {number}: {e}");
                        return 1;
                    }
                };
                match inst {
                    Instruction::Add { len } => println!("  {at:06} ADD   {len:6}"),
                    Instruction::Run { len, byte } => println!("  {at:06} RUN   {len:6}  byte {byte:#04x}"),
                    Instruction::Copy { len, addr, mode } => {
                        println!("  {at:06} CPY_{mode} {len:6}  @{addr}");
                    }
                }
                at += inst.len();
            }
        }

        target_offset += header.target_len as u64;
        if opts.command == Command::PrintHdr {
            break;
        }
    }
    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let mut opts = resolve_options(cli);

    let default_filter = match (opts.quiet, opts.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    if opts.encoder.window_size > MAX_WINDOW_SIZE {
        eprintln!(
            "oxivcd: --window-size: window size {} exceeds max {MAX_WINDOW_SIZE}",
            opts.encoder.window_size
        );
        process::exit(1);
    }

    if opts.use_stdout && !opts.quiet
        && let Some(path) = opts.output_file.take()
    {
        eprintln!("oxivcd: warning: -c option overrides output filename: {}", path.display());
    }

    let exit_code = match opts.command {
        Command::Encode => cmd_encode(&opts),
        Command::Decode => cmd_decode(&opts),
        Command::Config => cmd_config(),
        Command::PrintHdr | Command::PrintHdrs | Command::PrintDelta => cmd_print(&opts),
        Command::DictId => cmd_dict_id(&opts),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
