use tokio::sync::oneshot;

pub mod frame;
pub mod session;
pub mod spawn;

/// One slot in the per-connection reply FIFO. Replies are enqueued at
/// request-parse time and completed by their resolution tasks, so the
/// sender drains them in request order.
pub enum QueueEvent {
    Reply(oneshot::Receiver<Vec<u8>>),
    Stop,
}
