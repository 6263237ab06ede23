//! In-memory windows.
//!
//! Two windows wired together with tokio broadcast channels. Used by the test
//! suite and the loopback binary in place of a real browser messaging
//! primitive. Like a browser window, every listener sees every message.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::transport;
use crate::transport::ANY_ORIGIN;
use crate::transport::Listener;
use crate::transport::Posted;
use crate::transport::Transport;
use crate::transport::TransportError;

/// Messages a listener may fall behind by before it starts losing them.
const BUFFER: usize = 1024;

/// The sending half of one direction. `None` once its window closed.
type Outlet = Mutex<Option<broadcast::Sender<Posted>>>;

/// One end of a window pair, held by the window at `local_origin`.
///
/// Posts made here appear on the other end's listeners stamped with
/// `local_origin`, and vice versa.
pub struct MemoryWindow {
    local_origin: String,
    remote_origin: String,
    outbound: Arc<Outlet>,
    inbound: Weak<Outlet>,
}

impl MemoryWindow {
    /// Creates a pair of windows connected to each other.
    ///
    /// `a` is held by the window at `origin_a` and talks to `origin_b`;
    /// `b` is the mirror image.
    pub fn pair(origin_a: impl Into<String>, origin_b: impl Into<String>) -> (Self, Self) {
        let origin_a = origin_a.into();
        let origin_b = origin_b.into();
        let (tx_a, _) = broadcast::channel(BUFFER);
        let (tx_b, _) = broadcast::channel(BUFFER);
        let outlet_a = Arc::new(Mutex::new(Some(tx_a)));
        let outlet_b = Arc::new(Mutex::new(Some(tx_b)));

        let a = Self {
            local_origin: origin_a.clone(),
            remote_origin: origin_b.clone(),
            inbound: Arc::downgrade(&outlet_b),
            outbound: outlet_a,
        };

        let b = Self {
            local_origin: origin_b,
            remote_origin: origin_a,
            inbound: Arc::downgrade(&a.outbound),
            outbound: outlet_b,
        };

        (a, b)
    }

    pub fn local_origin(&self) -> &str {
        &self.local_origin
    }

    pub fn remote_origin(&self) -> &str {
        &self.remote_origin
    }

    /// Simulates this window going away: the other end's listeners yield
    /// `None` once they have drained what was already posted.
    pub async fn close(&self) {
        lock(&self.outbound).take();
    }
}

fn lock(outlet: &Outlet) -> MutexGuard<'_, Option<broadcast::Sender<Posted>>> {
    outlet.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait::async_trait]
impl Transport for MemoryWindow {
    async fn post(&self, data: &[u8], target_origin: &str) -> transport::Result<()> {
        if target_origin != ANY_ORIGIN && target_origin != self.remote_origin {
            tracing::trace!(
                target_origin,
                remote_origin = %self.remote_origin,
                "dropping post for mismatched target origin"
            );
            return Ok(());
        }

        let guard = lock(&self.outbound);
        let tx = guard
            .as_ref()
            .ok_or_else(|| TransportError::ConnectionLost("window closed".into()))?;

        let posted = Posted { origin: self.local_origin.clone(), data: data.to_vec() };
        if tx.send(posted).is_err() {
            tracing::trace!(remote_origin = %self.remote_origin, "nobody is listening, post dropped");
        }
        Ok(())
    }

    fn listen(&self) -> Box<dyn Listener> {
        let Some(outlet) = self.inbound.upgrade() else {
            return Box::new(MemoryListener { rx: None });
        };
        let guard = lock(&outlet);
        let rx = guard.as_ref().map(broadcast::Sender::subscribe);
        Box::new(MemoryListener { rx })
    }
}

/// A listener on a [`MemoryWindow`]. Starts closed if the remote end already was.
struct MemoryListener {
    rx: Option<broadcast::Receiver<Posted>>,
}

#[async_trait::async_trait]
impl Listener for MemoryListener {
    async fn recv(&mut self) -> transport::Result<Option<Posted>> {
        let Some(rx) = self.rx.as_mut() else {
            return Ok(None);
        };

        loop {
            match rx.recv().await {
                Ok(posted) => return Ok(Some(posted)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "listener fell behind, messages were lost");
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return Ok(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "https://host.example";
    const EDITOR: &str = "https://editor.example";

    #[tokio::test]
    async fn posts_are_stamped_with_the_sender_origin() {
        let (a, b) = MemoryWindow::pair(HOST, EDITOR);
        let mut inbox = b.listen();

        a.post(b"hello", EDITOR).await.unwrap();
        let posted = inbox.recv().await.unwrap().unwrap();

        assert_eq!(posted.origin, HOST);
        assert_eq!(posted.data, b"hello");
    }

    #[tokio::test]
    async fn mismatched_target_origin_is_dropped_silently() {
        let (a, b) = MemoryWindow::pair(HOST, EDITOR);
        let mut inbox = b.listen();

        a.post(b"lost", "https://elsewhere.example").await.unwrap();
        a.post(b"kept", ANY_ORIGIN).await.unwrap();

        let posted = inbox.recv().await.unwrap().unwrap();
        assert_eq!(posted.data, b"kept");
    }

    #[tokio::test]
    async fn every_listener_sees_every_message() {
        let (a, b) = MemoryWindow::pair(HOST, EDITOR);
        let mut first = b.listen();
        let mut second = b.listen();

        a.post(b"one", ANY_ORIGIN).await.unwrap();
        a.post(b"two", ANY_ORIGIN).await.unwrap();

        for inbox in [&mut first, &mut second] {
            assert_eq!(inbox.recv().await.unwrap().unwrap().data, b"one");
            assert_eq!(inbox.recv().await.unwrap().unwrap().data, b"two");
        }
    }

    #[tokio::test]
    async fn listeners_only_see_later_messages() {
        let (a, b) = MemoryWindow::pair(HOST, EDITOR);

        a.post(b"early", ANY_ORIGIN).await.unwrap();
        let mut inbox = b.listen();
        a.post(b"late", ANY_ORIGIN).await.unwrap();

        assert_eq!(inbox.recv().await.unwrap().unwrap().data, b"late");
    }

    #[tokio::test]
    async fn close_ends_the_remote_stream() {
        let (a, b) = MemoryWindow::pair(HOST, EDITOR);
        let mut inbox = b.listen();

        a.post(b"queued", ANY_ORIGIN).await.unwrap();
        a.close().await;

        assert_eq!(inbox.recv().await.unwrap().unwrap().data, b"queued");
        assert!(inbox.recv().await.unwrap().is_none());
        assert!(b.listen().recv().await.unwrap().is_none());
        assert!(matches!(
            a.post(b"late", ANY_ORIGIN).await,
            Err(TransportError::ConnectionLost(_))
        ));
    }

    #[tokio::test]
    async fn dropping_a_window_ends_the_remote_stream() {
        let (a, b) = MemoryWindow::pair(HOST, EDITOR);
        let mut inbox = b.listen();

        drop(a);

        assert!(inbox.recv().await.unwrap().is_none());
    }
}
