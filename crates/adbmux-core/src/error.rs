//! Error types.

use core::fmt;

use crate::packet::Command;

/// Packet codec failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The transport ended in the middle of a packet.
    ShortRead,
    /// Header magic does not complement the command tag.
    BadMagic { command: u32, magic: u32 },
    /// Magic checks out but the tag is not one this engine knows.
    UnknownCommand(u32),
    /// Declared payload length exceeds the transport's hard cap.
    PayloadTooLarge { len: usize, max: usize },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortRead => write!(f, "transport ended mid-packet"),
            Self::BadMagic { command, magic } => {
                write!(f, "bad magic {magic:#010x} for command {command:#010x}")
            }
            Self::UnknownCommand(raw) => write!(f, "unknown command {raw:#010x}"),
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload of {len} bytes exceeds cap of {max}")
            }
        }
    }
}

impl std::error::Error for WireError {}

/// Transport-level errors.
#[derive(Debug)]
pub enum TransportError {
    /// The peer disconnected (or the transport was closed locally).
    Closed,
    Io(std::io::Error),
    Wire(WireError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Wire(e) => write!(f, "wire error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Wire(e) => Some(e),
            Self::Closed => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<WireError> for TransportError {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

/// Fatal session-scope failures. Any of these tears down the session and every
/// socket on it.
#[derive(Debug)]
pub enum SessionError {
    Transport(TransportError),
    /// The peer's checksum does not match its payload (legacy versions only).
    BadChecksum { expected: u32, actual: u32 },
    /// The peer sent a payload larger than the negotiated maximum.
    PayloadTooLarge { len: usize, max: usize },
    /// A command that has no business arriving after the handshake.
    UnexpectedCommand(Command),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport failed: {e}"),
            Self::BadChecksum { expected, actual } => {
                write!(f, "checksum mismatch: header {expected:#010x}, payload sums to {actual:#010x}")
            }
            Self::PayloadTooLarge { len, max } => {
                write!(f, "peer sent {len} bytes, negotiated maximum is {max}")
            }
            Self::UnexpectedCommand(command) => {
                write!(f, "protocol violation: unexpected {command} after handshake")
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Handshake failures. None of these produce a session.
#[derive(Debug)]
pub enum ConnectError {
    Transport(TransportError),
    /// The peer closed the transport while authentication was in progress.
    AuthRejected,
    /// The peer demanded authentication and no private keys were provided.
    NoKeys,
    /// The peer sent something other than `CNXN`/`AUTH` during the handshake.
    UnexpectedCommand(Command),
    /// The peer speaks a protocol version older than we can talk to.
    UnsupportedVersion(u32),
    /// Checksum mismatch on a handshake packet.
    BadChecksum { expected: u32, actual: u32 },
    /// RSA signing of the auth token failed.
    Sign(rsa::Error),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport failed: {e}"),
            Self::AuthRejected => write!(f, "peer rejected authentication"),
            Self::NoKeys => write!(f, "peer demanded authentication but no keys were provided"),
            Self::UnexpectedCommand(command) => {
                write!(f, "unexpected {command} during handshake")
            }
            Self::UnsupportedVersion(version) => {
                write!(f, "peer protocol version {version:#010x} is too old")
            }
            Self::BadChecksum { expected, actual } => {
                write!(f, "handshake checksum mismatch: header {expected:#010x}, payload sums to {actual:#010x}")
            }
            Self::Sign(e) => write!(f, "failed to sign auth token: {e}"),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Sign(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ConnectError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<rsa::Error> for ConnectError {
    fn from(e: rsa::Error) -> Self {
        Self::Sign(e)
    }
}

/// Per-socket errors. These never affect other sockets on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    /// The socket (or the whole session) closed underneath the operation.
    Closed,
    /// The device refused to open the requested service.
    ServiceUnavailable,
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "socket closed"),
            Self::ServiceUnavailable => write!(f, "service unavailable"),
        }
    }
}

impl std::error::Error for SocketError {}
