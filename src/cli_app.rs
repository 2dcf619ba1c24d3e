//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use vmx_inventory::core::config::Config;
use vmx_inventory::core::errors::VmiError;
use vmx_inventory::core::paths::absolutize;
use vmx_inventory::inventory::descriptor::DescriptorParser;
use vmx_inventory::inventory::disk::DiskSizeResolver;
use vmx_inventory::inventory::engine::{InventoryReport, ReconciliationEngine, validate_root};
use vmx_inventory::inventory::record::{DiagnosticKind, VmRecord, VmStatus};
use vmx_inventory::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
use vmx_inventory::platform::pal::LocalFs;

/// VMX inventory: VMware descriptors on disk, reconciled with what is running.
#[derive(Debug, Parser)]
#[command(
    name = "vmi",
    author,
    version,
    about = "VMX inventory - VMware descriptor discovery and running-state reconciliation",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Inventory every VM under the root and reconcile with running instances.
    Scan(ScanArgs),
    /// Print the consolidated folders holding running VMs.
    Folders(RootArgs),
    /// Parse a single descriptor file.
    Inspect(InspectArgs),
    /// Resolve the size of a virtual disk descriptor.
    DiskSize(DiskSizeArgs),
    /// Inspect or validate configuration.
    Config(ConfigArgs),
    /// Generate shell completion scripts.
    Completions(CompletionsArgs),
    /// Print version information.
    Version(VersionArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct RootArgs {
    /// Inventory root (falls back to the configured root_dir when omitted).
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ScanArgs {
    #[command(flatten)]
    root: RootArgs,
    /// Only display VMs with this status.
    #[arg(long, value_enum, value_name = "STATUS")]
    status: Option<StatusFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum StatusFilter {
    Running,
    Stopped,
}

impl StatusFilter {
    fn matches(self, record: &VmRecord) -> bool {
        match self {
            Self::Running => record.status == VmStatus::Running,
            Self::Stopped => record.status == VmStatus::Stopped,
        }
    }
}

#[derive(Debug, Clone, Args, Serialize)]
struct InspectArgs {
    /// Path to the VM descriptor.
    #[arg(value_name = "DESCRIPTOR")]
    descriptor: PathBuf,
}

#[derive(Debug, Clone, Args, Serialize)]
struct DiskSizeArgs {
    /// Path to the virtual disk descriptor.
    #[arg(value_name = "DISK_DESCRIPTOR")]
    disk: PathBuf,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<VmiError> for CliError {
    fn from(err: VmiError) -> Self {
        match err {
            VmiError::InvalidConfig { .. }
            | VmiError::MissingConfig { .. }
            | VmiError::ConfigParse { .. }
            | VmiError::InvalidRoot { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Folders(args) => run_folders(cli, args),
        Command::Inspect(args) => run_inspect(cli, args),
        Command::DiskSize(args) => run_disk_size(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version(args) => emit_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn open_activity_log(config: &Config) -> Arc<Mutex<JsonlWriter>> {
    Arc::new(Mutex::new(JsonlWriter::open(JsonlConfig::at(
        &config.paths.jsonl_log,
    ))))
}

/// Run the engine against the requested or configured root, logging the run.
fn inventory(cli: &Cli, config: &Config, root: Option<&Path>) -> InventoryReport {
    let root = root.map_or_else(|| config.inventory.root_dir.clone(), Path::to_path_buf);
    let log = open_activity_log(config);

    {
        let mut entry = LogEntry::new(EventType::ConfigLoaded, Severity::Info);
        entry.path = Some(config.paths.config_file.display().to_string());
        entry.details = config.stable_hash().ok().map(|hash| format!("hash={hash}"));
        log.lock().write_entry(&entry);
    }

    // A missing root is not fatal: running VMs are still reported.
    if let Err(err) = validate_root(&root) {
        if !cli.quiet {
            eprintln!("[VMI-WARN] {err}");
        }
        let mut entry = LogEntry::new(EventType::Error, Severity::Warning);
        entry.root = Some(root.display().to_string());
        entry.error_code = Some(err.code().to_string());
        entry.error_message = Some(err.to_string());
        log.lock().write_entry(&entry);
    }

    let report = ReconciliationEngine::from_config(config)
        .with_activity_log(log)
        .run(&root);

    if !cli.quiet {
        for diagnostic in &report.diagnostics {
            if diagnostic.kind == DiagnosticKind::RunningQuery {
                eprintln!(
                    "[VMI-WARN] running-instance query failed, treating all VMs as stopped: {}",
                    diagnostic.message
                );
            }
        }
    }
    report
}

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let report = inventory(cli, &config, args.root.root.as_deref());

    let shown: Vec<&VmRecord> = report
        .records
        .iter()
        .filter(|record| args.status.is_none_or(|filter| filter.matches(record)))
        .collect();

    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            println!(
                "VM Inventory\n  Root: {}\n  Descriptors found: {} | Running: {} | Records: {} ({} ms)\n",
                report.root.display(),
                report.discovered_count,
                report.running_count,
                report.records.len(),
                report.duration_ms,
            );

            if shown.is_empty() {
                println!("  No virtual machines found.");
            } else {
                print_record_table(&shown);
            }

            if !report.consolidated_folders.is_empty() {
                println!("\n  Running folders:");
                for folder in &report.consolidated_folders {
                    println!("    {folder}");
                }
            }

            if !report.diagnostics.is_empty() {
                if cli.verbose {
                    println!("\n  Diagnostics:");
                    for diagnostic in &report.diagnostics {
                        let location = diagnostic
                            .path
                            .as_ref()
                            .map_or_else(String::new, |p| format!("{} ", p.display()));
                        println!("    [{}] {location}{}", diagnostic.code, diagnostic.message);
                    }
                } else {
                    println!(
                        "\n  {} diagnostic(s); rerun with -v for details.",
                        report.diagnostics.len()
                    );
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "root": report.root.to_string_lossy(),
                "status_filter": args.status,
                "discovered_count": report.discovered_count,
                "running_count": report.running_count,
                "duration_ms": report.duration_ms,
                "records": shown,
                "consolidated_folders": report.consolidated_folders,
                "diagnostics": report.diagnostics,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_record_table(records: &[&VmRecord]) {
    println!(
        "  {:<8}  {:<24}  {:<8}  {:>9}  {:>9}  {:>10}  {:<20}  {:<17}",
        "ID", "Name", "Status", "vCPUs", "RAM", "Disk", "Guest OS", "MAC"
    );
    println!("  {}", "-".repeat(120));
    for record in records {
        let status = match record.status {
            VmStatus::Running => format!("{:<8}", record.status.label()).green().bold(),
            VmStatus::Stopped => format!("{:<8}", record.status.label()).dimmed(),
        };
        println!(
            "  {:<8}  {:<24}  {}  {:>9}  {:>9}  {:>10}  {:<20}  {:<17}",
            record.id,
            truncate(&record.name, 24),
            status,
            record.cpu_count.trim_end_matches(" vCPUs"),
            record.ram_size,
            record.disk_size,
            truncate(&record.guest_os, 20),
            record.mac_address,
        );
    }
}

fn run_folders(cli: &Cli, args: &RootArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let report = inventory(cli, &config, args.root.as_deref());

    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            if report.consolidated_folders.is_empty() {
                println!("No running virtual machines.");
            }
            for folder in &report.consolidated_folders {
                println!("{folder}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "folders",
                "running_count": report.running_count,
                "consolidated_folders": report.consolidated_folders,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_inspect(cli: &Cli, args: &InspectArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let fs = LocalFs;
    let parser = DescriptorParser::new(
        &fs,
        &config.inventory.descriptor_extension,
        config.inventory.descriptor_scan_limit_bytes,
    );
    let descriptor = absolutize(&args.descriptor);
    let outcome = parser.parse(&descriptor);
    let unreadable = matches!(outcome.issue, Some(VmiError::DescriptorRead { .. }));

    match output_mode(cli) {
        OutputMode::Human => {
            let record = &outcome.record;
            println!("{} ({})", record.name.bold(), record.path.display());
            println!("  id:        {}", record.id);
            println!("  guest os:  {}", record.guest_os);
            println!("  vcpus:     {}", record.cpu_count);
            println!("  memory:    {}", record.ram_size);
            println!("  disk:      {}", record.disk_size);
            println!("  mac:       {}", record.mac_address);
            if let Some(issue) = &outcome.issue {
                eprintln!("[VMI-WARN] {issue}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "inspect",
                "record": outcome.record,
                "issue": outcome.issue.as_ref().map(issue_json),
            });
            write_json_line(&payload)?;
        }
    }

    if unreadable {
        return Err(CliError::User(format!(
            "cannot read descriptor {}",
            descriptor.display()
        )));
    }
    Ok(())
}

fn run_disk_size(cli: &Cli, args: &DiskSizeArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let fs = LocalFs;
    let disk = absolutize(&args.disk);
    let resolution =
        DiskSizeResolver::new(&fs, config.inventory.descriptor_scan_limit_bytes).resolve(&disk);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}  {}", resolution.size, disk.display());
            if cli.verbose {
                println!("  source: {:?}", resolution.source);
            }
            if let Some(issue) = &resolution.issue {
                eprintln!("[VMI-WARN] {issue}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "disk-size",
                "path": disk.to_string_lossy(),
                "size": resolution.size,
                "source": resolution.source,
                "issue": resolution.issue.as_ref().map(issue_json),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn issue_json(err: &VmiError) -> Value {
    json!({ "code": err.code(), "message": err.to_string() })
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    match args.command.as_ref().unwrap_or(&ConfigCommand::Path) {
        ConfigCommand::Path => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let overrides = Config::active_env_overrides();
            if mode == OutputMode::Json {
                return write_json_line(&json!({
                    "command": "config path",
                    "path": path.to_string_lossy(),
                    "exists": path.exists(),
                    "env_overrides": overrides,
                }));
            }
            println!("{}", path.display());
            if !path.exists() {
                println!("  (not present, built-in defaults apply)");
            }
            for name in overrides {
                println!("  overridden by ${name}");
            }
            Ok(())
        }
        ConfigCommand::Show => {
            let config = load_config(cli)?;
            if mode == OutputMode::Json {
                return write_json_line(&json!({
                    "command": "config show",
                    "config": serde_json::to_value(&config)?,
                }));
            }
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| CliError::Runtime(format!("render config: {e}")))?;
            print!("{rendered}");
            Ok(())
        }
        ConfigCommand::Validate => validate_config(cli, mode),
    }
}

/// Load and validate the config, then check that its root is usable. An
/// unusable root is reported but does not make the config invalid, matching
/// how `scan` treats it.
fn validate_config(cli: &Cli, mode: OutputMode) -> Result<(), CliError> {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            if mode == OutputMode::Json {
                write_json_line(&json!({
                    "command": "config validate",
                    "valid": false,
                    "code": err.code(),
                    "error": err.to_string(),
                }))?;
            } else {
                eprintln!("invalid configuration: {err}");
            }
            return Err(err.into());
        }
    };
    let hash = config.stable_hash()?;
    let root_problem = validate_root(&config.inventory.root_dir).err();

    if mode == OutputMode::Json {
        return write_json_line(&json!({
            "command": "config validate",
            "valid": true,
            "path": config.paths.config_file.to_string_lossy(),
            "hash": hash,
            "root": config.inventory.root_dir.to_string_lossy(),
            "root_usable": root_problem.is_none(),
            "root_warning": root_problem.as_ref().map(ToString::to_string),
        }));
    }
    println!("{} ({hash})", "configuration valid".green());
    println!("  source: {}", config.paths.config_file.display());
    println!("  vmrun:  {}", config.vmrun.binary.display());
    match root_problem {
        None => println!("  root:   {}", config.inventory.root_dir.display()),
        Some(err) if !cli.quiet => eprintln!("[VMI-WARN] {err}"),
        Some(_) => {}
    }
    Ok(())
}

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");
    let git_sha = option_env!("GIT_SHA").unwrap_or("unknown");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("vmi {version}");
            if args.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
                println!("git_sha: {git_sha}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "binary": "vmi",
                "version": version,
                "package": package,
                "build": {
                    "target": target,
                    "profile": profile,
                    "git_sha": git_sha,
                }
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("VMI_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "vmi",
            "--config",
            "/tmp/vmi.toml",
            "--json",
            "--no-color",
            "-v",
            "scan",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["vmi", "scan", "--json", "--no-color", "-q"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_all_subcommands() {
        let cases = [
            vec!["vmi", "scan", "--root", "/storage/VMS", "--status", "running"],
            vec!["vmi", "scan", "--status", "stopped"],
            vec!["vmi", "folders", "--root", "/storage/VMS"],
            vec!["vmi", "inspect", "/storage/VMS/a/a.vmx"],
            vec!["vmi", "disk-size", "/storage/VMS/a/a.vmdk"],
            vec!["vmi", "config", "path"],
            vec!["vmi", "config", "show"],
            vec!["vmi", "config", "validate"],
            vec!["vmi", "version", "--verbose"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn rejects_unknown_status_and_conflicting_verbosity() {
        assert!(Cli::try_parse_from(["vmi", "scan", "--status", "paused"]).is_err());
        assert!(Cli::try_parse_from(["vmi", "-v", "-q", "scan"]).is_err());
        assert!(Cli::try_parse_from(["vmi", "inspect"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["vmi", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some(" AUTO "), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn status_filter_matches_record_status() {
        let mut record = VmRecord::unknown(Path::new("/vms/a/a.vmx"), "vmx");
        assert!(StatusFilter::Stopped.matches(&record));
        assert!(!StatusFilter::Running.matches(&record));
        record.status = VmStatus::Running;
        assert!(StatusFilter::Running.matches(&record));
    }

    #[test]
    fn config_errors_map_to_user_exit_code() {
        let missing: CliError = VmiError::MissingConfig {
            path: PathBuf::from("/nope.toml"),
        }
        .into();
        assert_eq!(missing.exit_code(), 1);

        let tool: CliError = VmiError::Runtime {
            details: "boom".to_string(),
        }
        .into();
        assert_eq!(tool.exit_code(), 2);
    }

    #[test]
    fn truncate_is_char_aware() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ünïcödé-name-long", 8), "ünïcö...");
    }
}
