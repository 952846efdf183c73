use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::{Arc, Once};

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use swallow_core::code::asm::{Program, assemble, parse_literal};
use swallow_core::jit::{self, JitStats};
use swallow_core::val::Namespace;
use swallow_core::{ArtifactCache, JitConfig, OptLevel, Value, Vm, op};

#[cfg(test)]
mod main_test;

static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "swallow_core=info,swallow=info";
const DEFAULT_ENTRY: &str = "main";

#[derive(Parser, Debug)]
#[command(
    name = "swallow",
    version,
    about = "Run, inspect and cross-check stack bytecode with a tiered JIT",
    propagate_version = true
)]
struct CliArgs {
    /// TOML file with JIT settings.
    #[arg(long, global = true, value_name = "FILE", value_parser = parse_sanitized_path)]
    config: Option<PathBuf>,

    /// Print JIT counters (or artifact sizes for `ir`) as JSON on stderr.
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a program, call its entry function and print the result.
    Run {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,

        /// Function to call after the program's bodies have run.
        #[arg(long, value_name = "NAME")]
        entry: Option<String>,

        /// Compile every code unit instead of only the ones that opt in.
        #[arg(long)]
        jit: bool,

        /// Optimization level for compiled code (0-3).
        #[arg(long, value_name = "N", value_parser = parse_level)]
        level: Option<OptLevel>,

        /// Positional arguments, as literals (`3`, `'abc'`, `(1, 2.5)`).
        #[arg(value_name = "ARGS", allow_negative_numbers = true)]
        args: Vec<String>,
    },
    /// Disassemble every code unit in a program.
    Dis {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
    /// Print the compiled form of one code unit.
    Ir {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,

        #[arg(long, value_name = "NAME")]
        entry: Option<String>,

        #[arg(long, value_name = "N", value_parser = parse_level)]
        level: Option<OptLevel>,
    },
    /// Call the entry interpreted and compiled at every level; report divergences.
    Check {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,

        #[arg(long, value_name = "NAME")]
        entry: Option<String>,

        #[arg(value_name = "ARGS", allow_negative_numbers = true)]
        args: Vec<String>,
    },
}

fn read_file_content(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(anyhow!("Parent directory components ('..') are not allowed in file paths."));
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn parse_level(raw: &str) -> Result<OptLevel, String> {
    raw.parse::<OptLevel>()
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_tracing() {
    let raw = match std::env::var("SWALLOW_TRACE") {
        Ok(value) => value,
        Err(_) => return,
    };

    if !env_toggle_enabled(&raw) {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

fn load_config(path: Option<&Path>) -> anyhow::Result<JitConfig> {
    let config = match path {
        Some(path) => JitConfig::load(path)?,
        None => JitConfig::default(),
    };
    config.with_env_overrides()
}

fn parse_program_file(path: &Path) -> anyhow::Result<Program> {
    let src = read_file_content(path)?;
    assemble(&src).with_context(|| format!("Failed to assemble {}", path.display()))
}

fn parse_args(raw: &[String]) -> anyhow::Result<Vec<Value>> {
    raw.iter()
        .map(|text| parse_literal(text).with_context(|| format!("invalid argument `{text}`")))
        .collect()
}

/// What one call produced, in a form two tiers can be compared by.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Returned(String),
    Raised(String),
}

impl Outcome {
    fn describe(&self) -> &str {
        match self {
            Outcome::Returned(repr) => repr,
            Outcome::Raised(traceback) => traceback,
        }
    }
}

/// Loads `program` into `vm` and calls `entry`. `Ok(None)` means the entry
/// was defaulted and the program defines no such function.
fn call_entry(
    vm: &mut Vm,
    program: &Program,
    entry: Option<&str>,
    args: Vec<Value>,
) -> anyhow::Result<Option<Outcome>> {
    let globals: Rc<Namespace> = match vm.load_program(program) {
        Ok(globals) => globals,
        Err(err) => return Ok(Some(Outcome::Raised(err.render()))),
    };
    let name = entry.unwrap_or(DEFAULT_ENTRY);
    let Some(func) = globals.get(name) else {
        if entry.is_some() {
            bail!("program defines no function `{name}`");
        }
        if !args.is_empty() {
            bail!("arguments given but the program defines no `{DEFAULT_ENTRY}` function");
        }
        return Ok(None);
    };
    let outcome = match vm.call(&func, args, Vec::new()) {
        Ok(value) => match op::repr(vm, &value) {
            Ok(repr) => Outcome::Returned(repr),
            Err(err) => Outcome::Raised(err.render()),
        },
        Err(err) => Outcome::Raised(err.render()),
    };
    Ok(Some(outcome))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    eprintln!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_run(
    config: JitConfig,
    show_stats: bool,
    file: &Path,
    entry: Option<&str>,
    jit: bool,
    level: Option<OptLevel>,
    args: &[String],
) -> anyhow::Result<ExitCode> {
    let mut config = config.with_overrides(jit.then_some("all"), None)?;
    if let Some(level) = level {
        config.default_level = level;
    }
    let program = parse_program_file(file)?;
    let args = parse_args(args)?;
    let cache = Arc::new(ArtifactCache::new(config.cache_capacity));
    let mut vm = Vm::with_cache(config, cache);
    let outcome = call_entry(&mut vm, &program, entry, args)?;
    if show_stats {
        print_json(vm.stats())?;
    }
    Ok(match outcome {
        Some(Outcome::Returned(repr)) => {
            println!("{repr}");
            ExitCode::SUCCESS
        }
        Some(Outcome::Raised(traceback)) => {
            eprintln!("{traceback}");
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    })
}

fn cmd_dis(file: &Path) -> anyhow::Result<ExitCode> {
    let program = parse_program_file(file)?;
    let mut out = String::new();
    for (i, code) in program.all_code().iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let listing = code
            .disassemble()
            .with_context(|| format!("Failed to decode `{}`", code.name))?;
        out.push_str(&format!("== {} ==\n", code.name));
        out.push_str(&listing);
        if !listing.ends_with('\n') {
            out.push('\n');
        }
    }
    print!("{out}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_ir(
    config: JitConfig,
    show_stats: bool,
    file: &Path,
    entry: Option<&str>,
    level: Option<OptLevel>,
) -> anyhow::Result<ExitCode> {
    let program = parse_program_file(file)?;
    let name = entry.unwrap_or(DEFAULT_ENTRY);
    let unit = program
        .get(name)
        .ok_or_else(|| anyhow!("program defines no code unit `{name}`"))?;
    let level = config.clamp_level(level.unwrap_or(config.default_level));
    match jit::compile(&unit.code, level) {
        Ok(artifact) => {
            print!("{}", artifact.render(&unit.code));
            if show_stats {
                print_json(&artifact.summary())?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("cannot compile `{name}` at {level}: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Per-mode result of `check`.
#[derive(Debug, Serialize)]
struct ModeReport {
    mode: String,
    outcome: String,
    matches: bool,
    stats: JitStats,
}

fn check_modes(base: &JitConfig) -> Vec<(String, JitConfig)> {
    let mut modes = vec![(
        "interpreted".to_string(),
        JitConfig {
            enabled: false,
            ..base.clone()
        },
    )];
    for level in OptLevel::ALL {
        modes.push((
            level.to_string(),
            JitConfig {
                enabled: true,
                compile_all: true,
                default_level: level,
                max_level: OptLevel::O3,
                ..base.clone()
            },
        ));
    }
    modes
}

fn cmd_check(
    config: JitConfig,
    show_stats: bool,
    file: &Path,
    entry: Option<&str>,
    args: &[String],
) -> anyhow::Result<ExitCode> {
    let program_src = read_file_content(file)?;
    let mut reports: Vec<ModeReport> = Vec::new();
    let mut baseline: Option<Outcome> = None;

    for (mode, mode_config) in check_modes(&config) {
        // Each mode gets fresh code units so tier state does not leak across modes.
        let program = assemble(&program_src).with_context(|| format!("Failed to assemble {}", file.display()))?;
        let cache = Arc::new(ArtifactCache::new(mode_config.cache_capacity));
        let mut vm = Vm::with_cache(mode_config, cache);
        let outcome = call_entry(&mut vm, &program, Some(entry.unwrap_or(DEFAULT_ENTRY)), parse_args(args)?)?
            .ok_or_else(|| anyhow!("entry function not found"))?;
        let matches = baseline.as_ref().is_none_or(|base| *base == outcome);
        if baseline.is_none() {
            baseline = Some(outcome.clone());
        }
        tracing::debug!(%mode, matches, "check mode finished");
        reports.push(ModeReport {
            mode,
            outcome: outcome.describe().to_string(),
            matches,
            stats: *vm.stats(),
        });
    }

    let diverged = reports.iter().filter(|r| !r.matches).count();
    for report in &reports {
        let marker = if report.matches { "ok" } else { "DIVERGED" };
        println!("{:<12} {:<8} {}", report.mode, marker, report.outcome.replace('\n', "\n    "));
    }
    if show_stats {
        print_json(&reports)?;
    }
    if diverged > 0 {
        eprintln!("{diverged} mode(s) diverged from the interpreter");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> anyhow::Result<ExitCode> {
    maybe_init_tracing();
    let args = CliArgs::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Run {
            file,
            entry,
            jit,
            level,
            args: call_args,
        } => cmd_run(config, args.stats, &file, entry.as_deref(), jit, level, &call_args),
        Commands::Dis { file } => cmd_dis(&file),
        Commands::Ir { file, entry, level } => cmd_ir(config, args.stats, &file, entry.as_deref(), level),
        Commands::Check {
            file,
            entry,
            args: call_args,
        } => cmd_check(config, args.stats, &file, entry.as_deref(), &call_args),
    }
}
