//! Command line interface.

use clap::Parser;

use crate::tracing::{LogLevel, TracingFormat};

/// Source address Terraform uses for this provider unless told otherwise.
pub const DEFAULT_PROVIDER_ADDRESS: &str = "registry.terraform.io/local/containerregistry";

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "terraform-provider-containerregistry")]
#[command(about = "Terraform provider resolving container image digests")]
#[command(
    long_about = "Terraform provider resolving container image digests.\n\n\
                  Terraform starts this binary itself. Run it with --debug to start it \
                  standalone and attach Terraform through TF_REATTACH_PROVIDERS."
)]
#[command(version)]
pub struct Cli {
    /// Standalone debug mode
    #[arg(
        long,
        env = "TF_PROVIDER_DEBUG",
        help = "Start standalone and print TF_REATTACH_PROVIDERS instructions"
    )]
    pub debug: bool,

    /// Log level
    #[arg(
        short = 'l',
        long = "log-level",
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    /// Log format
    #[arg(
        long = "log-format",
        help = "Log output format (written to stderr)",
        default_value = "json",
        value_enum
    )]
    pub log_format: TracingFormat,

    /// Filter directive
    #[arg(
        long = "log-filter",
        help = "tracing filter directive, e.g. containerregistry_oci=trace (overrides RUST_LOG and --log-level)"
    )]
    pub log_filter: Option<String>,

    /// Reattach key
    #[arg(
        long,
        help = "Provider source address used as the reattach key",
        default_value = DEFAULT_PROVIDER_ADDRESS
    )]
    pub provider_address: String,
}

/// Parses the process arguments, exiting on error.
pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_values() {
        temp_env::with_var_unset("TF_PROVIDER_DEBUG", || {
            let cli = Cli::try_parse_from(["terraform-provider-containerregistry"]).unwrap();

            assert!(!cli.debug);
            assert_eq!(cli.level, LogLevel::Warn);
            assert_eq!(cli.log_format, TracingFormat::Json);
            assert_eq!(cli.provider_address, DEFAULT_PROVIDER_ADDRESS);
            assert!(cli.log_filter.is_none());
        });
    }

    #[test]
    fn test_cli_log_level_parsing() {
        let cli =
            Cli::try_parse_from(["terraform-provider-containerregistry", "--log-level", "trace"])
                .unwrap();
        assert_eq!(cli.level, LogLevel::Trace);

        let cli = Cli::try_parse_from(["terraform-provider-containerregistry", "-l", "error"])
            .unwrap();
        assert_eq!(cli.level, LogLevel::Error);

        assert!(
            Cli::try_parse_from(["terraform-provider-containerregistry", "-l", "loud"]).is_err()
        );
    }

    #[test]
    fn test_cli_debug_mode() {
        let cli = Cli::try_parse_from([
            "terraform-provider-containerregistry",
            "--debug",
            "--log-format",
            "pretty",
            "--provider-address",
            "example.com/me/containerregistry",
            "--log-filter",
            "containerregistry_oci=trace",
        ])
        .unwrap();

        assert!(cli.debug);
        assert_eq!(cli.log_format, TracingFormat::Pretty);
        assert_eq!(cli.provider_address, "example.com/me/containerregistry");
        assert_eq!(cli.log_filter.as_deref(), Some("containerregistry_oci=trace"));
    }
}
