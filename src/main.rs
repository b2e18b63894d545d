use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{IntoDiagnostic, Result, WrapErr};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use slimdex::config::{CompilationMode, CompilerOptions};
use slimdex::error::CompileError;

/// slimdex - whole-program DEX shrinker and minifier
#[derive(Parser, Debug)]
#[command(name = "slimdex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input files: .class, .dex, .jar, .zip or .apk. With no inputs the
    /// configuration is parsed and validated, nothing is compiled.
    inputs: Vec<PathBuf>,

    /// Compile without debugging information and with optimizations
    #[arg(long, conflicts_with = "debug")]
    release: bool,

    /// Compile with debugging information
    #[arg(long)]
    debug: bool,

    /// Output destination (directory or .zip)
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// Library file (repeatable)
    #[arg(long = "lib")]
    libraries: Vec<PathBuf>,

    /// Minimum supported Android API level
    #[arg(long = "min-api", default_value_t = 1)]
    min_api: u32,

    /// Proguard configuration file (repeatable)
    #[arg(long = "pg-conf")]
    pg_conf: Vec<PathBuf>,

    /// Proguard mapping file for composition
    #[arg(long = "pg-map")]
    pg_map: Option<PathBuf>,

    /// Disable tree shaking
    #[arg(long = "no-tree-shaking")]
    no_tree_shaking: bool,

    /// Disable minification
    #[arg(long = "no-minification")]
    no_minification: bool,

    /// Proguard-syntax rules deciding the main dex content
    #[arg(long = "main-dex-rules")]
    main_dex_rules: Option<PathBuf>,

    /// Explicit list of classes for the main dex file
    #[arg(long = "main-dex-list")]
    main_dex_list: Option<PathBuf>,

    /// Where to write the resulting main dex list
    #[arg(long = "main-dex-list-output")]
    main_dex_list_output: Option<PathBuf>,

    /// Restrict the primary dex to the main dex closure
    #[arg(long = "minimal-main-dex")]
    minimal_main_dex: bool,

    /// Treat missing classes as warnings
    #[arg(long = "ignore-missing-classes")]
    ignore_missing_classes: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// When set, every invocation appends its argument vector to this file;
/// non-flag arguments are logged as absolute paths.
const LOGGER_OUTPUT: &str = "LOGGER_OUTPUT";

fn log_invocation(args: &[String]) {
    let Ok(path) = std::env::var(LOGGER_OUTPUT) else {
        return;
    };
    let line: Vec<String> = args
        .iter()
        .map(|arg| {
            if arg.starts_with('-') {
                arg.clone()
            } else {
                std::fs::canonicalize(arg)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| arg.clone())
            }
        })
        .collect();
    let _ = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| {
            use std::io::Write;
            writeln!(file, "{}", line.join("\t"))
        });
}

/// `@file` arguments are replaced by the whitespace-separated contents of
/// the file.
fn expand_argfiles(args: Vec<String>) -> Result<Vec<String>> {
    let mut expanded = Vec::with_capacity(args.len());
    for arg in args {
        if let Some(path) = arg.strip_prefix('@') {
            let contents = std::fs::read_to_string(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read argument file: {path}"))?;
            expanded.extend(contents.split_whitespace().map(str::to_string));
        } else {
            expanded.push(arg);
        }
    }
    Ok(expanded)
}

fn options_from_cli(cli: &Cli) -> CompilerOptions {
    CompilerOptions {
        mode: if cli.debug {
            CompilationMode::Debug
        } else {
            CompilationMode::Release
        },
        min_api: cli.min_api,
        output: cli.output.clone(),
        file_per_class: false,
        tree_shaking: !cli.no_tree_shaking,
        minification: !cli.no_minification,
        inputs: cli.inputs.clone(),
        libraries: cli.libraries.clone(),
        proguard_configs: cli.pg_conf.clone(),
        proguard_map: cli.pg_map.clone(),
        main_dex_rules: cli.main_dex_rules.clone(),
        main_dex_list: cli.main_dex_list.clone(),
        main_dex_list_output: cli.main_dex_list_output.clone(),
        minimal_main_dex: cli.minimal_main_dex,
        package_distribution: None,
        ignore_missing_classes: cli.ignore_missing_classes,
    }
}

fn run() -> Result<()> {
    let raw_args: Vec<String> = std::env::args().collect();
    log_invocation(&raw_args[1..]);
    let args = expand_argfiles(raw_args)?;
    let cli = Cli::parse_from(args);

    // The filter is reloadable so that `-verbose` in a configuration file,
    // seen only after parsing, can still raise the level.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let (filter, filter_handle) = tracing_subscriber::reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = options_from_cli(&cli);
    options.validate().into_diagnostic()?;

    // Parse all Proguard configuration up front; syntax errors must surface
    // whether or not anything is compiled.
    let factory = std::sync::Arc::new(slimdex::ItemFactory::new());
    let mut parser = slimdex::ConfigurationParser::new(factory.clone());
    for path in &options.proguard_configs {
        parser.parse_file(path)?;
    }
    let config = parser.finish();
    if config.verbose && !cli.verbose {
        // Configuration-level -verbose has the same effect as --verbose.
        let _ = filter_handle.reload(tracing_subscriber::EnvFilter::new("debug"));
    }
    if let Some(path) = &options.main_dex_rules {
        let mut main_dex_parser = slimdex::ConfigurationParser::new(factory.clone());
        main_dex_parser.parse_file(path)?;
    }
    if let Some(path) = &options.proguard_map {
        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read mapping file: {}", path.display()))?;
        let map = slimdex::ProguardMap::parse(&contents).into_diagnostic()?;
        info!(classes = map.len(), "loaded input mapping");
    }
    info!(
        rules = config.rules.len(),
        inputs = options.inputs.len(),
        libraries = options.libraries.len(),
        "configuration validated"
    );

    if options.inputs.is_empty() {
        println!("configuration ok: {} rule(s)", config.rules.len());
        return Ok(());
    }

    // The binary input codecs (.class/.dex/.jar readers and the dex byte
    // writer) are separate components wired in by the distribution. Without
    // them, inputs cannot be demultiplexed here.
    for input in &options.inputs {
        let extension = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match extension.as_str() {
            "class" | "dex" | "jar" | "zip" | "apk" => {}
            _ => {
                return Err(CompileError::input(
                    input.display().to_string(),
                    "unrecognized input format",
                ))
                .into_diagnostic();
            }
        }
    }
    Err(CompileError::input(
        options.inputs[0].display().to_string(),
        "no input codec is registered in this build; link a classfile/dex \
         codec and drive the pipeline through slimdex::Compiler",
    ))
    .into_diagnostic()
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error:?}");
            ExitCode::FAILURE
        }
    }
}
