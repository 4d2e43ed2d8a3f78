pub mod completions;
pub mod copy;
pub mod man_pages;
pub mod relocate;
pub mod remote;

use ferry_remote::config::default_config_path;
use ferry_remote::ClientConfig;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 3;

/// Prefix of every message that should exit with [`EXIT_CONFIG_ERROR`].
pub const CONFIG_ERROR_PREFIXES: [&str; 2] = ["config error:", "remote config error:"];

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn exit_code_for(msg: &str) -> u8 {
    if CONFIG_ERROR_PREFIXES.iter().any(|p| msg.starts_with(p)) {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_FAILURE
    }
}

/// `--config-file`, then the default location.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf, String> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path().map_err(|e| format!("config error: {e}")),
    }
}

pub fn load_config(path: &Path) -> Result<ClientConfig, String> {
    ClientConfig::load_or_default(path).map_err(|e| format!("config error: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    let mark = console::style("✓").green();
    finish(pb, format!("{mark} {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    let mark = console::style("✗").red();
    finish(pb, format!("{mark} {msg}"));
}
