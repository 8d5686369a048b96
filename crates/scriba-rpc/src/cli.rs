//! Argument definitions and helpers for both binaries.

use clap::{Args, Parser, Subcommand};
use scriba_core::config::{ClientConfig, EngineConfig, ListenerConfig};
use scriba_core::engine::{FilterOption, LaunchSpec};
use scriba_core::transport::HostLocation;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Arguments of the `scribad` daemon.
#[derive(Parser, Debug)]
#[command(name = "scribad")]
#[command(about = "Document conversion server wrapping one warm engine instance")]
pub struct DaemonArgs {
    /// Interface to listen on
    #[arg(long, default_value = ListenerConfig::DEFAULT_INTERFACE)]
    pub interface: String,

    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value_t = ListenerConfig::DEFAULT_PORT)]
    pub port: u16,

    /// Interface the engine control socket binds to
    #[arg(long, default_value = EngineConfig::DEFAULT_INTERFACE)]
    pub engine_interface: String,

    /// Port for the engine control socket
    #[arg(long, default_value_t = EngineConfig::DEFAULT_PORT)]
    pub engine_port: u16,

    /// Path to the engine executable (searched on PATH when omitted)
    #[arg(long)]
    pub executable: Option<PathBuf>,

    /// Private user-profile directory for the engine (temporary by default)
    #[arg(long)]
    pub user_profile_dir: Option<PathBuf>,

    /// File to write the supervised engine's PID to
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Kill the engine and exit when a conversion takes longer than this
    /// many seconds
    #[arg(long)]
    pub conversion_timeout: Option<u64>,

    /// Detach: relaunch in the background, print the child PID and exit
    #[arg(long)]
    pub daemon: bool,

    /// Set on the relaunched background child
    #[arg(long, hide = true)]
    pub daemonized: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

/// Build the engine launch spec from the daemon arguments.
///
/// The operator's `--pid-file` records the supervised engine's pid;
/// without one the pid lands next to the engine profile.
pub fn engine_launch_spec(args: &DaemonArgs, executable: &Path, profile_dir: &Path) -> LaunchSpec {
    let pid_file = args
        .pid_file
        .clone()
        .unwrap_or_else(|| profile_dir.join("engine.pid"));
    LaunchSpec::new(executable, profile_dir)
        .with_endpoint(args.engine_interface.as_str(), args.engine_port)
        .with_pid_file(pid_file)
}

/// Rebuild argv for the detached child: `--daemon` is dropped and the
/// hidden marker appended, so the child serves in the foreground of its
/// own process and leaves the pid-file in place when it shuts down.
pub fn detached_child_args(args: impl Iterator<Item = OsString>) -> Vec<OsString> {
    let mut out: Vec<OsString> = args.filter(|a| a.as_os_str() != "--daemon").collect();
    out.push(OsString::from("--daemonized"));
    out
}

/// Arguments of the `scriba` client.
#[derive(Parser, Debug)]
#[command(name = "scriba")]
#[command(about = "Client for the scribad document conversion server")]
pub struct ClientArgs {
    #[command(subcommand)]
    pub command: ClientCommand,

    /// Server host
    #[arg(long, global = true, default_value = ListenerConfig::DEFAULT_INTERFACE)]
    pub host: String,

    /// Server port
    #[arg(long, global = true, default_value_t = ListenerConfig::DEFAULT_PORT)]
    pub port: u16,

    /// Whether the server shares this machine's filesystem
    #[arg(long, global = true, default_value = "auto")]
    pub host_location: HostLocation,

    /// Total connection attempts before giving up
    #[arg(long, global = true, default_value_t = ClientConfig::DEFAULT_MAX_RETRIES)]
    pub retries: u32,

    /// Seconds between connection attempts
    #[arg(long, global = true, default_value_t = ClientConfig::DEFAULT_RETRY_INTERVAL.as_secs())]
    pub retry_interval: u64,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// Convert a document to another format
    Convert(ConvertArgs),
    /// Compare two documents, producing a tracked-changes document
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Input file, or `-` for stdin
    pub infile: String,

    /// Output file, or `-` for stdout
    pub outfile: String,

    /// Target format when the output suffix does not say (e.g. `pdf`)
    #[arg(long)]
    pub convert_to: Option<String>,

    /// Explicit import filter name
    #[arg(long)]
    pub input_filter: Option<String>,

    /// Explicit export filter name (overrides --convert-to)
    #[arg(long)]
    pub output_filter: Option<String>,

    /// Export filter option as name=value (repeatable)
    #[arg(long = "filter-option")]
    pub filter_options: Vec<FilterOption>,

    /// Skip refreshing document indexes before export
    #[arg(long)]
    pub dont_update_index: bool,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Original file, or `-` for stdin
    pub oldfile: String,

    /// Modified file
    pub newfile: String,

    /// Output file, or `-` for stdout
    pub outfile: String,

    /// Output format when the output suffix does not say (e.g. `odt`)
    #[arg(long)]
    pub file_type: Option<String>,
}

/// The conventional stdin/stdout sentinel.
pub const STDIO_SENTINEL: &str = "-";

/// Find the first engine executable candidate on PATH.
pub fn find_engine_executable(candidates: &[&str]) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for candidate in candidates {
            let full = dir.join(candidate);
            if is_executable(&full) {
                return Some(full);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
