use checkout_service::{config::Config, services::init_metrics, Application};
use service_core::observability::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        environment = %config.common.environment,
        store = ?config.database.backend,
        form_url = %config.gateway.form_url,
        "Starting checkout service"
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
