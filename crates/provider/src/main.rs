//! Entry point for `terraform-provider-containerregistry`.

use containerregistry_provider::ContainerRegistryProvider;
use containerregistry_provider::cli;
use containerregistry_provider::tracing::{TracingConfig, init_tracing};
use containerregistry_tfplugin::{ServeConfig, serve};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = cli::parse();

    init_tracing(TracingConfig {
        format: cli.log_format,
        level: cli.level.into(),
        filter: cli.log_filter,
    })?;

    let provider = ContainerRegistryProvider::new()?;
    serve(
        provider,
        ServeConfig {
            debug: cli.debug,
            provider_address: cli.provider_address,
        },
    )
    .await?;

    Ok(())
}
