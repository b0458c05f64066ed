//! Socket router: control vs. large-data socket selection and send queue.
//!
//! At most one socket holds each role. Every outbound frame picks a socket:
//!
//! 1. large-data socket, if bound and the payload exceeds the threshold
//! 2. control socket, if bound
//! 3. large-data socket, if bound
//! 4. otherwise the frame waits in the send queue
//!
//! The queue is drained in FIFO order as soon as any socket binds. It is
//! bounded; overflowing it fails the offending call and leaves queued frames
//! untouched.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::{ConnectorError, Result};
use crate::transport::SocketRole;
use crate::writer::{SocketId, WriterHandle};

/// Default send queue capacity.
pub const DEFAULT_MAX_SEND_QUEUE: usize = 10_000;

/// An encoded frame ready to be written.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Complete wire bytes.
    pub bytes: Bytes,
    /// Length of the payload part, used for socket selection.
    pub payload_len: usize,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(bytes: Bytes, payload_len: usize) -> Self {
        Self { bytes, payload_len }
    }
}

/// Role bindings plus the pre-connection send queue.
#[derive(Debug)]
pub struct SocketRouter {
    control: Option<WriterHandle>,
    large_data: Option<WriterHandle>,
    queue: VecDeque<OutboundFrame>,
    max_queue: usize,
    large_data_threshold: usize,
}

impl SocketRouter {
    /// Create a router with the given queue capacity and large-payload threshold.
    pub fn new(max_queue: usize, large_data_threshold: usize) -> Self {
        Self {
            control: None,
            large_data: None,
            queue: VecDeque::new(),
            max_queue,
            large_data_threshold,
        }
    }

    /// Record `socket` under `role`, then flush the send queue through it.
    ///
    /// Rebinding a role replaces the previous socket.
    pub fn bind(&mut self, socket: WriterHandle, role: SocketRole) {
        tracing::info!("{} socket established ({})", role, socket.id());
        match role {
            SocketRole::Control => self.control = Some(socket),
            SocketRole::LargeData => self.large_data = Some(socket),
        }
        self.drain();
    }

    /// Forget `socket` in every role it holds.
    ///
    /// Returns the role that was cleared, if any. A socket that announced
    /// both roles loses both and reports [`SocketRole::Control`].
    pub fn unbind(&mut self, socket: SocketId) -> Option<SocketRole> {
        let mut cleared = None;
        if self.large_data.as_ref().map(WriterHandle::id) == Some(socket) {
            self.large_data = None;
            tracing::warn!("large data socket disconnected ({})", socket);
            cleared = Some(SocketRole::LargeData);
        }
        if self.control.as_ref().map(WriterHandle::id) == Some(socket) {
            self.control = None;
            tracing::warn!("control socket disconnected ({})", socket);
            cleared = Some(SocketRole::Control);
        }
        cleared
    }

    /// Send `frame` on the best bound socket, or queue it.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::QueueOverflow`] if no socket is bound and the queue
    /// is full.
    pub fn route(&mut self, frame: OutboundFrame) -> Result<()> {
        loop {
            let Some(socket) = self.select(frame.payload_len) else {
                return self.enqueue(frame);
            };
            let id = socket.id();
            if socket.send(frame.bytes.clone()).is_ok() {
                return Ok(());
            }
            // writer task is gone; drop the stale binding and retry
            self.unbind(id);
        }
    }

    /// Send a response, preferring the socket the request came in on.
    ///
    /// A payload above the threshold still moves to the large-data socket.
    pub fn respond(&mut self, origin: &WriterHandle, frame: OutboundFrame) -> Result<()> {
        let socket = match &self.large_data {
            Some(large) if frame.payload_len > self.large_data_threshold => large,
            _ => origin,
        };
        if socket.send(frame.bytes.clone()).is_ok() {
            return Ok(());
        }
        let id = socket.id();
        self.unbind(id);
        self.route(frame)
    }

    fn select(&self, payload_len: usize) -> Option<&WriterHandle> {
        if payload_len > self.large_data_threshold {
            if let Some(large) = &self.large_data {
                return Some(large);
            }
        }
        self.control.as_ref().or(self.large_data.as_ref())
    }

    fn enqueue(&mut self, frame: OutboundFrame) -> Result<()> {
        if self.queue.len() >= self.max_queue {
            return Err(ConnectorError::QueueOverflow {
                capacity: self.max_queue,
            });
        }
        self.queue.push_back(frame);
        Ok(())
    }

    fn drain(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let queued = std::mem::take(&mut self.queue);
        tracing::debug!("draining {} queued frames", queued.len());
        for frame in queued {
            // Execute in order as we received them
            if let Err(e) = self.route(frame) {
                tracing::error!("failed to send queued frame: {}", e);
            }
        }
    }

    /// Socket currently bound under `role`.
    pub fn bound(&self, role: SocketRole) -> Option<&WriterHandle> {
        match role {
            SocketRole::Control => self.control.as_ref(),
            SocketRole::LargeData => self.large_data.as_ref(),
        }
    }

    /// Number of frames waiting for a socket.
    #[inline]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Check if at least one socket is bound.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.control.is_some() || self.large_data.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{self, MemorySource};
    use crate::transport::{FrameSource, Inbound};
    use crate::writer::spawn_writer_task;

    fn socket() -> (WriterHandle, MemorySource) {
        let ((sink, _), (_, source)) = memory::pair();
        let (handle, _task) = spawn_writer_task(sink);
        (handle, source)
    }

    fn frame(tag: u8, payload_len: usize) -> OutboundFrame {
        OutboundFrame::new(Bytes::from(vec![tag]), payload_len)
    }

    async fn next_tag(source: &mut MemorySource) -> u8 {
        match source.recv().await.unwrap().unwrap() {
            Inbound::Binary(bytes) => bytes[0],
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_queue_then_flush_in_order() {
        let mut router = SocketRouter::new(100, 10);
        for tag in 0..5 {
            router.route(frame(tag, 0)).unwrap();
        }
        assert_eq!(router.queued(), 5);
        assert!(!router.is_connected());

        let (control, mut source) = socket();
        router.bind(control, SocketRole::Control);

        assert_eq!(router.queued(), 0);
        for tag in 0..5 {
            assert_eq!(next_tag(&mut source).await, tag);
        }
    }

    #[tokio::test]
    async fn test_large_payload_prefers_large_data_socket() {
        let mut router = SocketRouter::new(100, 10);
        let (control, mut control_rx) = socket();
        let (large, mut large_rx) = socket();
        router.bind(control, SocketRole::Control);
        router.bind(large, SocketRole::LargeData);

        router.route(frame(1, 11)).unwrap();
        router.route(frame(2, 10)).unwrap();
        router.route(frame(3, 0)).unwrap();

        assert_eq!(next_tag(&mut large_rx).await, 1);
        assert_eq!(next_tag(&mut control_rx).await, 2);
        assert_eq!(next_tag(&mut control_rx).await, 3);
    }

    #[tokio::test]
    async fn test_falls_back_to_either_socket() {
        let mut router = SocketRouter::new(100, 10);
        let (large, mut large_rx) = socket();
        router.bind(large, SocketRole::LargeData);

        // small frame, only the large data socket exists
        router.route(frame(7, 0)).unwrap();
        assert_eq!(next_tag(&mut large_rx).await, 7);

        let mut router = SocketRouter::new(100, 10);
        let (control, mut control_rx) = socket();
        router.bind(control, SocketRole::Control);

        // large frame, only the control socket exists
        router.route(frame(8, 1000)).unwrap();
        assert_eq!(next_tag(&mut control_rx).await, 8);
    }

    #[test]
    fn test_queue_overflow_keeps_existing_entries() {
        let mut router = SocketRouter::new(3, 10);
        for tag in 0..3 {
            router.route(frame(tag, 0)).unwrap();
        }

        let err = router.route(frame(99, 0)).unwrap_err();
        assert!(matches!(err, ConnectorError::QueueOverflow { capacity: 3 }));
        assert_eq!(router.queued(), 3);
        let tags: Vec<u8> = router.queue.iter().map(|f| f.bytes[0]).collect();
        assert_eq!(tags, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unbind_only_clears_matching_role() {
        let mut router = SocketRouter::new(100, 10);
        let (control, _c) = socket();
        let (large, _l) = socket();
        let control_id = control.id();
        router.bind(control, SocketRole::Control);
        router.bind(large.clone(), SocketRole::LargeData);

        assert_eq!(router.unbind(control_id), Some(SocketRole::Control));
        assert!(router.bound(SocketRole::Control).is_none());
        assert_eq!(
            router.bound(SocketRole::LargeData).map(WriterHandle::id),
            Some(large.id())
        );
        assert_eq!(router.unbind(control_id), None);
    }

    #[tokio::test]
    async fn test_unbind_clears_socket_holding_both_roles() {
        let mut router = SocketRouter::new(100, 10);
        let (both, _b) = socket();
        let id = both.id();
        router.bind(both.clone(), SocketRole::Control);
        router.bind(both, SocketRole::LargeData);

        assert_eq!(router.unbind(id), Some(SocketRole::Control));
        assert!(router.bound(SocketRole::Control).is_none());
        assert!(router.bound(SocketRole::LargeData).is_none());
        assert!(!router.is_connected());

        router.route(frame(1, 1000)).unwrap();
        assert_eq!(router.queued(), 1);
    }

    #[tokio::test]
    async fn test_rebind_replaces_socket() {
        let mut router = SocketRouter::new(100, 10);
        let (first, _f) = socket();
        let (second, mut second_rx) = socket();
        router.bind(first, SocketRole::Control);
        router.bind(second, SocketRole::Control);

        router.route(frame(4, 0)).unwrap();
        assert_eq!(next_tag(&mut second_rx).await, 4);
    }

    #[tokio::test]
    async fn test_closed_socket_is_unbound_and_frame_queued() {
        let mut router = SocketRouter::new(100, 10);
        let ((sink, _), (_, _source)) = memory::pair();
        let (handle, task) = spawn_writer_task(sink);
        router.bind(handle, SocketRole::Control);

        task.abort();
        let _ = task.await;

        router.route(frame(1, 0)).unwrap();
        assert!(!router.is_connected());
        assert_eq!(router.queued(), 1);
    }

    #[tokio::test]
    async fn test_respond_uses_origin_socket() {
        let mut router = SocketRouter::new(100, 10);
        let (control, mut control_rx) = socket();
        let (large, mut large_rx) = socket();
        router.bind(control, SocketRole::Control);
        router.bind(large.clone(), SocketRole::LargeData);

        // small response to a request that arrived on the large data socket
        router.respond(&large, frame(5, 0)).unwrap();
        assert_eq!(next_tag(&mut large_rx).await, 5);

        // large response always goes to the large data socket
        let (origin, _o) = socket();
        router.respond(&origin, frame(6, 11)).unwrap();
        assert_eq!(next_tag(&mut large_rx).await, 6);

        router.route(frame(7, 0)).unwrap();
        assert_eq!(next_tag(&mut control_rx).await, 7);
    }
}
