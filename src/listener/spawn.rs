use std::sync::Arc;

use tokio::{net::TcpListener, sync::watch};

use crate::{config::Config, core::Core};

use super::session::Session;

pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Server {
    pub fn from_config(config: &Config) -> Self {
        Server {
            host: config.host.clone(),
            port: config.port,
        }
    }

    /// Binds the listening socket and spawns the accept loop. Bind errors
    /// are returned to the caller; accept errors are transient and only
    /// logged.
    pub async fn spawn(
        self,
        core: Arc<Core>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), String> {
        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|err| format!("Failed to bind {}:{}: {}", self.host, self.port, err))?;

        let listener_span = tracing::info_span!(
            "listener",
            bind.host = self.host.as_str(),
            bind.port = self.port,
        );

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    stream = listener.accept() => {
                        match stream {
                            Ok((stream, remote_addr)) => {
                                let span = tracing::info_span!(
                                    "session",
                                    remote.ip = remote_addr.ip().to_string(),
                                    remote.port = remote_addr.port(),
                                );
                                span.follows_from(&listener_span);

                                let session = Session {
                                    core: core.clone(),
                                    stream,
                                    span,
                                };
                                tokio::spawn(session.handle_conn(shutdown_rx.clone()));
                            }
                            Err(err) => {
                                tracing::debug!(parent: &listener_span,
                                                context = "io",
                                                event = "error",
                                                "Failed to accept TCP connection: {}", err);
                            }
                        }
                    },
                    _ = shutdown_rx.changed() => {
                        tracing::debug!(parent: &listener_span,
                            event = "shutdown",
                            "Listener shutting down.");
                        break;
                    }
                };
            }
        });

        Ok(())
    }
}
