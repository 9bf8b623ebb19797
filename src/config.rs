use clap::Parser;
use std::path::PathBuf;

/// Startup options for the sidecar. Every flag can also come from the environment.
#[derive(Debug, Parser, Clone)]
#[command(name = "learnhubd", version, about = "Smart Learning Hub sidecar")]
pub struct Config {
    /// Workspace directory to open before reading requests.
    #[arg(long, env = "LEARNHUB_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    #[arg(long, env = "LEARNHUB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Completed work sessions between long breaks.
    #[arg(long, env = "LEARNHUB_LONG_BREAK_EVERY", default_value_t = 4)]
    pub long_break_every: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_flags() {
        let cfg = Config::try_parse_from(["learnhubd"]).expect("parse");
        assert_eq!(cfg.long_break_every, 4);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "learnhubd",
            "--workspace",
            "/tmp/hub",
            "--long-break-every",
            "3",
        ])
        .expect("parse");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/hub")));
        assert_eq!(cfg.long_break_every, 3);
    }
}
