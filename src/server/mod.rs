pub mod api;

use crate::cli::Args;
use crate::llm::chat::ChatClient;
use log::{ error, info };
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct Server {
    addr: String,
    chat_client: Arc<dyn ChatClient>,
    args: Args,
}

impl Server {
    pub fn new(addr: String, chat_client: Arc<dyn ChatClient>, args: Args) -> Self {
        Self { addr, chat_client, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let state = api::AppState::new(self.chat_client.clone(), self.args.stream_error_sentinel());
        let app = api::router(state);

        for (method, path) in api::routes() {
            info!("  {:<5} {}", method, path);
        }

        if self.args.enable_tls {
            let (cert_path, key_path) = match (&self.args.tls_cert_path, &self.args.tls_key_path) {
                (Some(cert_path), Some(key_path)) => (cert_path, key_path),
                (Some(_), None) | (None, Some(_)) => {
                    error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                    return Err("Missing TLS certificate or key path".into());
                }
                (None, None) => {
                    error!("--enable-tls was set but no certificate/key paths provided.");
                    return Err("TLS enabled without cert/key".into());
                }
            };

            info!(
                "TLS enabled. Loading certificate from '{}' and key from '{}'",
                cert_path,
                key_path
            );
            let _ = rustls::crypto::ring::default_provider().install_default();
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                cert_path,
                key_path
            ).await?;

            info!("Relay listening on: https://{}", addr);
            axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
        } else {
            let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                error!("Failed to bind relay to {}: {}. Try a different port.", addr, e);
                e
            })?;
            info!("Relay listening on: http://{}", addr);
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown_signal()).await?;
        }

        info!("Relay stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
