//! Building the tool command line from the configured templates.

use std::path::PathBuf;
use tokio::process::Command;

use crate::config::ToolConfig;
use crate::store::JobId;

/// One tool run: a single chapter URL into a destination directory.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub job_id: JobId,
    pub url: String,
    pub dest: PathBuf,
    pub language: String,
}

/// Replaces `{url}`, `{dest}` and `{lang}` in one argument template.
pub fn substitute(template: &str, inv: &ToolInvocation) -> String {
    template
        .replace("{url}", &inv.url)
        .replace("{dest}", &inv.dest.to_string_lossy())
        .replace("{lang}", &inv.language)
}

pub fn build_args(tool: &ToolConfig, inv: &ToolInvocation) -> Vec<String> {
    tool.args.iter().map(|a| substitute(a, inv)).collect()
}

/// Command with piped stdout/stderr, killed on drop, in its own process group
/// so a forced kill also reaches anything the tool spawned.
pub fn build_command(tool: &ToolConfig, inv: &ToolInvocation) -> Command {
    let mut cmd = Command::new(&tool.program);
    cmd.args(build_args(tool, inv))
        .current_dir(&inv.dest)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}
