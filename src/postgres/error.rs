//! Wire protocol decoding error.
use std::fmt;

/// An error when translating a buffer received from postgres.
pub enum ProtocolError {
    /// Message type byte did not match what the current phase expected.
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    /// `Authentication` message carried a request code this crate does not implement.
    UnknownAuth { auth: u32 },
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected { expect: None, found, phase: None }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected { expect: Some(expect), found, phase: None }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected { expect: None, found, phase: Some(phase) }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unexpected { expect: Some(expect), found, phase: Some(phase) } => {
                write!(f, "unexpected message {found:?} during {phase}, expected {expect:?}")
            }
            Self::Unexpected { expect: Some(expect), found, phase: None } => {
                write!(f, "unexpected message {found:?}, expected {expect:?}")
            }
            Self::Unexpected { expect: None, found, phase: Some(phase) } => {
                write!(f, "unexpected message {found:?} during {phase}")
            }
            Self::Unexpected { expect: None, found, phase: None } => {
                write!(f, "unknown backend message type {found:?}")
            }
            Self::UnknownAuth { auth } => {
                write!(f, "unsupported authentication request code {auth}")
            }
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
