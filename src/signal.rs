//! Ctrl-C handling.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` when the process receives Ctrl-C.
///
/// The task ends when either happens first, so cancelling the token from
/// elsewhere also releases the signal listener.
pub fn cancel_on_ctrl_c(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("received Ctrl-C");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
            },
            _ = token.cancelled() => {}
        }
    })
}
