// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! pdiprog - Error types

use core::fmt;
use serde::Serialize;

use pdiprog_mailbox::MailboxError;

/// pdiprog firmware error type
#[allow(unused)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PdiprogError {
    #[serde(rename = "mailbox")]
    Mailbox(MailboxError),
    #[serde(rename = "pdiprog")]
    Pdiprog(ErrorKind),
}

impl fmt::Display for PdiprogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdiprogError::Mailbox(mailbox) => write!(f, "{mailbox}"),
            PdiprogError::Pdiprog(kind) => write!(f, "{kind}"),
        }
    }
}

impl From<MailboxError> for PdiprogError {
    fn from(error: MailboxError) -> Self {
        PdiprogError::Mailbox(error)
    }
}

/// PdiprogError::Pdiprog error kinds
#[allow(unused)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    NotAtmel,
    UnknownDevice,
    Verify,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotAtmel => write!(f, "Not an Atmel device"),
            ErrorKind::UnknownDevice => write!(f, "Unknown device"),
            ErrorKind::Verify => write!(f, "Verify failed"),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ErrorKind", 2)?;

        let kind = match self {
            ErrorKind::NotAtmel => "not atmel",
            ErrorKind::UnknownDevice => "unknown device",
            ErrorKind::Verify => "verify",
        };
        state.serialize_field("kind", kind)?;
        state.serialize_field("detail", "")?;
        state.end()
    }
}
