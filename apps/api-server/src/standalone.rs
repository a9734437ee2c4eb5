use crate::{
    config::{load_caption_model, ServerArgs},
    routes::{get_routes, parse_origins},
    Ctx,
};
use anyhow::Context;

pub async fn start_server(args: ServerArgs) -> anyhow::Result<()> {
    let cors_origins = parse_origins(&args.cors_origins);
    tracing::debug!("cors origins: {:?}", cors_origins);

    // the service is useless without a model, fail before binding
    let caption_model = load_caption_model(&args.model)
        .await
        .context("failed to load caption model")?;
    tracing::info!("model {} loaded", caption_model.model_id());

    let ctx = Ctx::new(caption_model.clone());
    let app = get_routes(ctx, cors_origins);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped, shutting down model");
    caption_model.shutdown().await?;

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl-C received, shut down...");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, shut down...");
        },
    }
}
