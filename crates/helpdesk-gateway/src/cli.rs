use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "helpdesk", version, about = "🎫 Helpdesk: support tickets for Discord")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to helpdesk.toml
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Connect to Discord and serve tickets until interrupted.
    Start,
    /// Validate settings, stored state and token without connecting.
    Check {
        #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Human,
    Json,
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_check_with_global_config() {
        let cli = Cli::try_parse_from(["helpdesk", "check", "--format", "json", "-c", "x.toml"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Check {
                format: OutputFormat::Json
            }
        ));
        assert_eq!(cli.config.as_deref(), Some("x.toml"));
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Cli::try_parse_from(["helpdesk", "check", "--format", "yaml"]).is_err());
    }
}
