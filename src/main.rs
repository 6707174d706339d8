use ad_polls::protocol;
use ad_polls::{Config, PollEngine};
use log::{error, info};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() {
    // Load .env before the logger reads RUST_LOG
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::init();

    let config = Config::from_env();

    let engine = match PollEngine::open(&config).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to initialize poll engine: {}", e);
            std::process::exit(1);
        }
    };
    info!("Poll engine ready, reading requests from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read request: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = protocol::handle_line(&engine, &line).await;
        let mut encoded = match serde_json::to_string(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Failed to encode response: {}", e);
                continue;
            }
        };
        encoded.push('\n');

        if let Err(e) = stdout.write_all(encoded.as_bytes()).await {
            error!("Failed to write response: {}", e);
            break;
        }
        if let Err(e) = stdout.flush().await {
            error!("Failed to flush response: {}", e);
            break;
        }
    }

    info!("Input closed, shutting down");
}
