use std::sync::Arc;

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot, watch},
    task::JoinSet,
};
use tracing::Span;

use crate::{
    core::Core,
    lookup::{CacheEntry, CacheUpdate},
    sts::{FetchResult, Mode},
};

use super::{
    frame::{self, NetstringDecoder},
    QueueEvent,
};

const NOTFOUND: &[u8] = b"NOTFOUND ";
const QUEUE_DEPTH: usize = 1024;
const READ_CHUNK: usize = 4096;

pub struct Session<T: AsyncRead + AsyncWrite> {
    pub core: Arc<Core>,
    pub stream: T,
    pub span: Span,
}

impl<T: AsyncRead + AsyncWrite + Send + 'static> Session<T> {
    pub async fn handle_conn(self, mut shutdown_rx: watch::Receiver<bool>) {
        let span = self.span;
        let core = self.core;
        let (mut reader, writer) = tokio::io::split(self.stream);
        let mut decoder = NetstringDecoder::new(core.max_frame_size);
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_DEPTH);
        let sender = tokio::spawn(send_loop(writer, queue_rx, span.clone()));
        let mut resolutions = JoinSet::new();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            tokio::select! {
                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        tracing::debug!(
                            parent: &span,
                            event = "disconnect",
                            reason = "peer",
                            "Connection closed by peer."
                        );
                        sender.abort();
                        return;
                    }
                    Ok(bytes_read) => {
                        let status = decoder.ingest(&buf[..bytes_read]);
                        while let Some(request) = decoder.next_frame() {
                            let (tx, rx) = oneshot::channel();
                            if queue_tx.send(QueueEvent::Reply(rx)).await.is_err() {
                                // Writer failed underneath us.
                                return;
                            }
                            let core = core.clone();
                            let span = span.clone();
                            resolutions.spawn(async move {
                                tx.send(core.process_request(&request, &span).await).ok();
                            });
                        }
                        if let Err(err) = status {
                            tracing::debug!(
                                parent: &span,
                                context = "protocol",
                                event = "error",
                                reason = ?err,
                                "Malformed request stream."
                            );
                            // Answer everything parsed so far, then close.
                            queue_tx.send(QueueEvent::Stop).await.ok();
                            sender.await.ok();
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(
                            parent: &span,
                            context = "io",
                            event = "error",
                            reason = %err,
                            "Connection read failed."
                        );
                        sender.abort();
                        return;
                    }
                },
                // Reap completed resolution tasks.
                Some(_) = resolutions.join_next() => (),
                _ = shutdown_rx.changed() => {
                    tracing::debug!(
                        parent: &span,
                        event = "disconnect",
                        reason = "shutdown",
                        "Server shutting down."
                    );
                    queue_tx.send(QueueEvent::Stop).await.ok();
                    sender.await.ok();
                    return;
                }
            }
        }
    }
}

/// Drains the reply FIFO in order, writing each framed reply as its
/// promise completes. A dead promise means a resolution task was lost;
/// the ordering guarantee is gone, so the connection is terminated.
async fn send_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut queue_rx: mpsc::Receiver<QueueEvent>,
    span: Span,
) {
    while let Some(event) = queue_rx.recv().await {
        match event {
            QueueEvent::Reply(promise) => match promise.await {
                Ok(reply) => {
                    if let Err(err) = writer.write_all(&frame::encode(&reply)).await {
                        tracing::debug!(
                            parent: &span,
                            context = "io",
                            event = "error",
                            reason = %err,
                            "Failed to write response."
                        );
                        break;
                    }
                }
                Err(_) => {
                    tracing::warn!(
                        parent: &span,
                        context = "responder",
                        event = "lost-promise",
                        "Resolution task died before completing its reply."
                    );
                    break;
                }
            },
            QueueEvent::Stop => break,
        }
    }
    writer.shutdown().await.ok();
}

impl Core {
    /// Answers one socketmap request: `<zone> <domain>` in, `NOTFOUND ` or
    /// `OK secure match=<mx-list>` out. Every recoverable failure collapses
    /// to `NOTFOUND `.
    pub async fn process_request(&self, raw: &[u8], span: &Span) -> Vec<u8> {
        // Requests are latin-1; map bytes straight to code points.
        let request: String = raw.iter().map(|&byte| byte as char).collect();
        let (zone_name, domain) = match request.split_once(' ') {
            Some((zone_name, domain)) => (zone_name, domain),
            None => ("", request.as_str()),
        };

        // Parent-domain policies, address literals and other non-recipient
        // keys are never resolved.
        if domain.starts_with('.') || domain.starts_with('[') || domain.contains(':') {
            return NOTFOUND.to_vec();
        }
        let domain = domain.trim().trim_end_matches('.').to_lowercase();
        if domain.is_empty() {
            return NOTFOUND.to_vec();
        }

        let zone = self.zones.get(zone_name);
        let domain = domain.as_str();
        let entry = self
            .cache
            .get_or_compute(domain, |cached| async move {
                let latest_pol_id = cached.as_ref().map(|entry| entry.pol_id.as_str());
                match zone.resolve(domain, latest_pol_id).await {
                    FetchResult::Valid { id, policy } => {
                        CacheUpdate::Store(CacheEntry::new(id, policy))
                    }
                    FetchResult::NotChanged => match cached {
                        Some(entry) => {
                            CacheUpdate::Store(CacheEntry::new(entry.pol_id, entry.pol_body))
                        }
                        None => {
                            tracing::warn!(
                                parent: span,
                                context = "responder",
                                event = "not-changed-without-witness",
                                domain = domain,
                                "Resolver reported an unchanged policy with nothing cached."
                            );
                            CacheUpdate::Keep
                        }
                    },
                    FetchResult::NotFound | FetchResult::Failed => CacheUpdate::Keep,
                }
            })
            .await;

        match entry {
            Some(entry) if entry.is_live() => match entry.pol_body.mode {
                Mode::None => NOTFOUND.to_vec(),
                Mode::Testing if !zone.strict_testing => NOTFOUND.to_vec(),
                _ => format!("OK secure match={}", entry.pol_body.match_list()).into_bytes(),
            },
            _ => NOTFOUND.to_vec(),
        }
    }
}
