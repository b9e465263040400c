//! Messages sent to the session's command actor.

use pigpio_wire::CommandFrame;
use tokio::sync::oneshot;

use crate::error::RequestError;

/// Commands processed by the command actor, one at a time.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Send one frame and return the result word.
    Request {
        frame: CommandFrame,
        respond_to: oneshot::Sender<Result<u32, RequestError>>,
    },

    /// Push the current callback mask to the daemon with `NB`.
    ///
    /// The mask is read when the actor processes the command, so the last
    /// `NB` sent always matches the callback table. Without a responder the
    /// command is fire-and-forget.
    SyncNotifyBits {
        respond_to: Option<oneshot::Sender<Result<u32, RequestError>>>,
    },
}
