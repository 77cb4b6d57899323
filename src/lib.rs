pub mod cli;
pub mod client;
pub mod error;
pub mod llm;
pub mod models;
pub mod server;

use cli::{ Args, Command };
use llm::chat::new_client as new_chat_client;
use log::{ error, info };
use server::Server;
use std::error::Error;

pub use error::{ RelayError, Result };

pub async fn run(args: Args) -> std::result::Result<(), Box<dyn Error + Send + Sync>> {
    match args.command.clone() {
        Some(Command::Chat { relay_url }) => {
            client::terminal::run_chat(
                &relay_url,
                args.system_instruction.clone(),
                args.stream_error_sentinel()
            ).await
        }
        Some(Command::Serve) | None => serve(args).await,
    }
}

async fn serve(args: Args) -> std::result::Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Relay Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Gemini Model: {}", args.gemini_model);
    info!("Gemini Base URL: {}", args.gemini_base_url);
    info!("System Instruction: {}", args.system_instruction.is_some());
    info!("Google Search Tool: {}", args.enable_search);
    info!("Stream Error Sentinel: {}", args.stream_error_sentinel().is_some());
    info!("TLS Enabled: {}", args.enable_tls);
    info!("---------------------------");

    if args.gemini_api_key.is_empty() {
        error!("GEMINI_API_KEY is not set");
    }

    let chat_client = new_chat_client(&args.llm_config())?;
    let server = Server::new(args.server_addr.clone(), chat_client, args);
    server.run().await
}
