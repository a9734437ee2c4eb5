use api_server::{config::ServerArgs, standalone};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => println!(".env read successfully from {}", path.display()),
        Err(e) => println!("Could not load .env file: {e}"),
    };

    let args = ServerArgs::parse();

    match &args.log_dir {
        Some(log_dir) => analytics_tracing::init_tracing_to_file("api-server", "info", log_dir.clone()),
        None => analytics_tracing::init_tracing_to_stdout("api-server", "info"),
    }

    if let Err(e) = standalone::start_server(args).await {
        tracing::error!("Error starting standalone server: {:?}", e);
        return Err(e);
    }
    Ok(())
}
