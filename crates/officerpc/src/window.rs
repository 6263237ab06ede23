//! Resolving the window on the other side of the channel.

use std::sync::Arc;

use crate::error::Error;
use crate::error::Result;
use crate::transport::Transport;

/// Returns the parent (or opener) window, or fails if there is none.
///
/// A missing window is a configuration problem of the embedding page, not a
/// transient condition, so there is nothing to retry.
pub fn parent_window(window: Option<Arc<dyn Transport>>) -> Result<Arc<dyn Transport>> {
    window.ok_or_else(|| Error::ClientNotAccessible("no parent or opener window is reachable".into()))
}

pub fn is_client_not_accessible(error: &Error) -> bool {
    matches!(error, Error::ClientNotAccessible(_))
}
