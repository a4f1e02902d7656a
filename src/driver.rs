//! Driver spawns the tasks that relay buffers over a transport

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::Result;
use crate::client::StreamingClient;
use crate::config::StreamingConfig;
use crate::server::StreamingServer;
use crate::transport::Transport;
use crate::types::Packet;

/// Handle to a running server relay task
pub struct ServerDriverHandle {
    /// Cancel to flush pending buffers, force a final release, and stop
    pub cancel: CancellationToken,
    /// Resolves to the number of frames sent
    pub task: JoinHandle<Result<u64>>,
}

/// Handle to a running client relay task
pub struct ClientDriverChannels {
    /// Reconstructed `(signal_id, packet)` pairs in arrival order
    pub packets: ReceiverStream<(u32, Packet)>,
    /// Cancellation token for graceful shutdown; also cancelled on fatal errors
    pub cancel: CancellationToken,
    /// Resolves to the number of frames received
    pub task: JoinHandle<Result<u64>>,
}

/// Drains a [`StreamingServer`] into a transport.
///
/// Every poll interval the queue is flushed and a release buffer is emitted if
/// enough ids are ready. On cancellation the queue is flushed once more and any
/// remaining ids are released.
pub struct ServerDriver;

impl ServerDriver {
    pub fn spawn<T>(
        server: Arc<StreamingServer>,
        transport: T,
        config: &StreamingConfig,
    ) -> ServerDriverHandle
    where
        T: Transport,
    {
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();
        let poll_interval = config.poll_interval();

        let task = tokio::spawn(async move {
            let result =
                Self::relay_task(server, transport, poll_interval, cancel_task.clone()).await;
            if let Err(e) = &result {
                error!(error = %e, "Server relay failed");
                cancel_task.cancel();
            }
            result
        });

        ServerDriverHandle { cancel, task }
    }

    async fn relay_task<T>(
        server: Arc<StreamingServer>,
        mut transport: T,
        poll_interval: std::time::Duration,
        cancel: CancellationToken,
    ) -> Result<u64>
    where
        T: Transport,
    {
        info!(?poll_interval, "Server relay started");
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sent = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Server relay cancelled; flushing");
                    sent += Self::flush(&server, &mut transport).await?;
                    if server.check_and_send_release_packet(true) {
                        sent += Self::flush(&server, &mut transport).await?;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    sent += Self::flush(&server, &mut transport).await?;
                    if server.check_and_send_release_packet(false) {
                        sent += Self::flush(&server, &mut transport).await?;
                    }
                }
            }
        }

        info!(frames = sent, "Server relay ended");
        Ok(sent)
    }

    async fn flush<T: Transport>(server: &StreamingServer, transport: &mut T) -> Result<u64> {
        let mut sent = 0;
        while let Some(buffer) = server.get_next_buffer() {
            trace!(kind = ?buffer.kind(), signal_id = buffer.signal_id(), "Relaying buffer");
            transport.send(buffer.encode()).await?;
            buffer.release();
            sent += 1;
        }
        Ok(sent)
    }
}

/// Feeds frames from a transport into a [`StreamingClient`] and forwards the
/// reconstructed packets.
pub struct ClientDriver;

impl ClientDriver {
    pub fn spawn<T>(
        client: Arc<StreamingClient>,
        transport: T,
        config: &StreamingConfig,
    ) -> ClientDriverChannels
    where
        T: Transport,
    {
        let (packet_tx, packet_rx) = mpsc::channel(config.packet_channel_capacity);
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        let task = tokio::spawn(async move {
            let result =
                Self::receive_task(client, transport, packet_tx, cancel_task.clone()).await;
            if let Err(e) = &result {
                error!(error = %e, "Client relay failed");
                cancel_task.cancel();
            }
            result
        });

        ClientDriverChannels { packets: ReceiverStream::new(packet_rx), cancel, task }
    }

    async fn receive_task<T>(
        client: Arc<StreamingClient>,
        mut transport: T,
        packet_tx: mpsc::Sender<(u32, Packet)>,
        cancel: CancellationToken,
    ) -> Result<u64>
    where
        T: Transport,
    {
        info!("Client relay started");
        let mut received = 0u64;

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Client relay cancelled");
                    break;
                }
                frame = transport.recv() => frame?,
            };

            let Some(frame) = frame else {
                info!(frames = received, "Transport closed");
                break;
            };
            received += 1;

            match client.add_frame(frame) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, "Skipping undecodable frame"),
            }

            while let Some(item) = client.get_next_packet() {
                if packet_tx.send(item).await.is_err() {
                    debug!("Packet receiver dropped, shutting down");
                    return Ok(received);
                }
            }
        }

        info!(frames = received, "Client relay ended");
        Ok(received)
    }
}
