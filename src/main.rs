//! # wconv - streaming text encoding converter
//!
//! Reads text in one encoding and writes it in another, chunk by chunk,
//! through [`TextInput`] and [`TextOutput`]. Handles byte order marks,
//! newline conventions and terminals.

#[cfg(feature = "cli")]
use std::path::{Path, PathBuf};
#[cfg(feature = "cli")]
use std::process::ExitCode;
#[cfg(feature = "cli")]
use std::time::Instant;

#[cfg(feature = "cli")]
use anyhow::{Context, Result, bail};
#[cfg(feature = "cli")]
use clap::{ArgAction, Parser, ValueEnum};
#[cfg(feature = "cli")]
use log::{LevelFilter, debug, error, warn};
#[cfg(feature = "cli")]
use serde::Serialize;

#[cfg(feature = "cli")]
use textconv::{
    CodePageArg, CodePageCategory, CodePageInfo, Error as TextError, TextInput, TextInputFlags,
    TextOutput, TextOutputFlags,
};

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features disabled. Enable with --features cli");
    std::process::exit(1);
}

#[cfg(feature = "cli")]
const DEFAULT_FROM: &str = "1252bom";
#[cfg(feature = "cli")]
const DEFAULT_TO: &str = "utf8bom";
#[cfg(feature = "cli")]
const STDIO_NAME: &str = "-";

/// wconv: convert text between encodings
#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "wconv")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Input encoding: NNNN, cpNNNN, utf8, utf16[le|be] or utf32[le|be],
    /// with an optional `bom` suffix to honor a byte order mark
    #[arg(short = 'f', long = "from", value_name = "ENC", default_value = DEFAULT_FROM)]
    from: String,

    /// Input file; may be repeated ("-" is standard input)
    #[arg(short = 'i', long = "input", value_name = "FILE", action = ArgAction::Append)]
    input: Vec<PathBuf>,

    /// More input files
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Output encoding; a `bom` suffix writes a byte order mark
    #[arg(short = 't', long = "to", value_name = "ENC", default_value = DEFAULT_TO)]
    to: String,

    /// Output file (standard output if not specified)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Newline handling
    #[arg(short = 'n', long = "newline", value_enum, default_value = "preserve")]
    newline: Newline,

    /// Replace invalid input and output instead of failing
    #[arg(short = 'r', long = "replace")]
    replace: bool,

    /// Same as --replace --o-no-warn
    #[arg(short = 's', long = "silent")]
    silent: bool,

    /// Character written for text the output encoding cannot represent (default: ?)
    #[arg(long = "subst", value_name = "C")]
    subst: Option<char>,

    /// Never substitute look-alike characters in non-Unicode output
    #[arg(long = "no-best-fit")]
    no_best_fit: bool,

    /// Do not warn when characters were replaced in the output
    #[arg(long = "o-no-warn")]
    o_no_warn: bool,

    /// List supported encodings and exit
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Report format (text, json)
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Verbose diagnostics (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Newline {
    /// Read any newline, write CRLF
    Crlf,
    /// Read any newline, write LF
    Lf,
    /// Leave newlines alone
    Preserve,
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct ConversionSummary {
    success: bool,
    from: String,
    to: String,
    inputs: Vec<InputSummary>,
    default_char_used: bool,
    processing_time_ms: u64,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct InputSummary {
    name: String,
    status: InputStatus,
    replaced_invalid_input: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum InputStatus {
    Converted,
    Skipped,
    Failed,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct EncodingList {
    encodings: Vec<CodePageInfo>,
}

#[cfg(feature = "cli")]
fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.verbose) {
        eprintln!("wconv: {err:#}");
    }

    let result = if cli.list {
        list_command(&cli).map(|()| true)
    } else {
        convert_command(&cli)
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "cli")]
fn init_logging(verbose: u8) -> Result<()> {
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("[{h({l:<5})} {t}] {m}{n}")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .context("invalid logging configuration")?;

    log4rs::init_config(config).context("failed to install logger")?;
    Ok(())
}

/// Parses an encoding token, keeping "not a name" and "not supported" apart.
#[cfg(feature = "cli")]
fn parse_encoding(token: &str, role: &str) -> Result<CodePageArg> {
    match CodePageArg::parse_supported(token) {
        Ok((arg, info)) => {
            debug!("{role} encoding: {}", info.name);
            Ok(arg)
        }
        Err(TextError::Parse(_)) => bail!("'{token}' is not a valid {role} encoding name"),
        Err(TextError::Unsupported { name, category, .. }) => match category {
            CodePageCategory::Error => bail!("{role} encoding {name} is not available"),
            category => bail!("{role} encoding {name} is a {category} code page and cannot be streamed"),
        },
        Err(err) => Err(err).with_context(|| format!("cannot use {role} encoding '{token}'")),
    }
}

#[cfg(feature = "cli")]
fn display_name(path: &Path) -> String {
    if path == Path::new(STDIO_NAME) {
        "<stdin>".to_string()
    } else {
        path.display().to_string()
    }
}

/// Pumps one input into the output. Returns true if a default character
/// was used.
#[cfg(feature = "cli")]
fn copy_stream(
    input: &mut TextInput<'_>,
    output: &mut TextOutput<'_>,
    default_char: Option<u8>,
) -> textconv::Result<bool> {
    let mut used_default = output.write_chars(input.chars(), default_char)?;
    while input.read_next_chars()? {
        used_default |= output.write_chars(input.chars(), default_char)?;
    }
    Ok(used_default)
}

#[cfg(feature = "cli")]
fn convert_command(cli: &Cli) -> Result<bool> {
    let start_time = Instant::now();

    let from = parse_encoding(&cli.from, "input")?;
    let to = parse_encoding(&cli.to, "output")?;

    let replace = cli.replace || cli.silent;
    let warn_default_char = !(cli.o_no_warn || cli.silent);

    let default_char = match cli.subst {
        Some(c) if !c.is_ascii() => bail!("substitution character '{c}' must be ASCII"),
        Some(_) if to.is_unicode => {
            warn!("--subst has no effect on Unicode output; ignoring it");
            None
        }
        Some(c) => Some(c as u8),
        None => None,
    };

    let mut input_flags = TextInputFlags::CHECK_CONSOLE | TextInputFlags::CONSOLE_CTRL_Z;
    if cli.newline != Newline::Preserve {
        input_flags |= TextInputFlags::FOLD_CRLF;
    }
    if from.bom_suffix {
        input_flags |= TextInputFlags::CONSUME_BOM;
    }
    if !replace {
        input_flags |= TextInputFlags::INVALID_MBCS_ERROR;
    }

    let mut output_flags = TextOutputFlags::CHECK_CONSOLE;
    if cli.newline == Newline::Crlf {
        output_flags |= TextOutputFlags::EXPAND_CRLF;
    }
    if to.bom_suffix {
        if to.is_unicode {
            output_flags |= TextOutputFlags::INSERT_BOM;
        } else {
            warn!("'{}' is not a Unicode encoding; ignoring the bom suffix", cli.to);
        }
    }
    if !replace {
        output_flags |= TextOutputFlags::INVALID_UTF16_ERROR;
    }
    if cli.no_best_fit {
        output_flags |= TextOutputFlags::NO_BEST_FIT_CHARS;
    }

    let mut output = TextOutput::new();
    match &cli.output {
        Some(path) if path != Path::new(STDIO_NAME) => output
            .open_file(path, to.code_page, output_flags)
            .with_context(|| format!("cannot create output file {}", path.display()))?,
        _ => output
            .open_stdout(to.code_page, output_flags)
            .context("cannot open standard output")?,
    }

    let mut names: Vec<&Path> = cli
        .input
        .iter()
        .chain(&cli.files)
        .map(PathBuf::as_path)
        .collect();
    if names.is_empty() {
        names.push(Path::new(STDIO_NAME));
    }

    let mut success = true;
    let mut default_char_used = false;
    let mut inputs = Vec::with_capacity(names.len());
    let mut input = TextInput::new();

    for path in names {
        let name = display_name(path);
        let opened = if path == Path::new(STDIO_NAME) {
            input.open_stdin(from.code_page, input_flags)
        } else {
            input.open_file(path, from.code_page, input_flags)
        };

        let result = opened.map_err(|err| (err, true)).and_then(|()| {
            copy_stream(&mut input, &mut output, default_char).map_err(|err| (err, false))
        });
        let replaced = input.used_replacement();
        input.close();

        match result {
            Ok(used_default) => {
                default_char_used |= used_default;
                if replaced && !cli.silent {
                    warn!("{name}: invalid input was replaced with U+FFFD");
                }
                inputs.push(InputSummary {
                    name,
                    status: InputStatus::Converted,
                    replaced_invalid_input: replaced,
                    error: None,
                });
            }
            Err((err, true)) if !err.is_invalid_sequence() => {
                warn!("{name}: {err}. Skipping.");
                inputs.push(InputSummary {
                    name,
                    status: InputStatus::Skipped,
                    replaced_invalid_input: false,
                    error: Some(err.to_string()),
                });
            }
            Err((err, _)) if err.is_invalid_sequence() => {
                error!("{name}: {err}");
                success = false;
                inputs.push(InputSummary {
                    name,
                    status: InputStatus::Failed,
                    replaced_invalid_input: replaced,
                    error: Some(err.to_string()),
                });
            }
            Err((err, _)) => {
                return Err(err).with_context(|| format!("failed to convert {name}"));
            }
        }
    }

    output.close().context("failed to write output")?;

    if default_char_used && warn_default_char {
        warn!("Some input could not be converted to the output encoding.");
    }

    if let OutputFormat::Json = cli.format {
        let summary = ConversionSummary {
            success,
            from: CodePageInfo::new(from.code_page).name,
            to: CodePageInfo::new(to.code_page).name,
            inputs,
            default_char_used,
            processing_time_ms: start_time.elapsed().as_millis() as u64,
        };
        // Standard output may be carrying the converted text.
        eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(success)
}

#[cfg(feature = "cli")]
fn list_command(cli: &Cli) -> Result<()> {
    let (unicode, other): (Vec<CodePageInfo>, Vec<CodePageInfo>) = CodePageInfo::all()
        .into_iter()
        .filter(CodePageInfo::is_supported)
        .partition(|info| info.category == CodePageCategory::Unicode);

    match cli.format {
        OutputFormat::Json => {
            let list = EncodingList {
                encodings: other.into_iter().chain(unicode).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        OutputFormat::Text => {
            for info in other.iter().chain(&unicode) {
                println!("{}", info.name);
            }
        }
    }

    Ok(())
}
