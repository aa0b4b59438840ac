//! Local ingress errors

use thiserror::Error;

/// Errors that can occur while publishing names or proxy routes
#[derive(Debug, Error)]
pub enum IngressError {
    /// Reading or writing proxy configuration failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Talking to avahi over D-Bus failed
    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),

    /// A host name that cannot be published as a DNS name
    #[error("invalid name {name:?}: {reason}")]
    InvalidName {
        /// Name as given
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// A helper command exited unsuccessfully
    #[error("command `{command}` failed: {detail}")]
    Command {
        /// Command line that was run
        command: String,
        /// Exit status and stderr
        detail: String,
    },
}
