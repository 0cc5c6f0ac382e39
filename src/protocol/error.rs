use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    FrameTooLarge(usize),
    Truncated,
    InvalidFileLine(String),
    InvalidAckLine(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::FrameTooLarge(size) =>
                write!(f, "frame too large: {}", size),
            ProtocolError::Truncated =>
                write!(f, "truncated frame"),
            ProtocolError::InvalidFileLine(line) =>
                write!(f, "invalid file line: '{}'", line),
            ProtocolError::InvalidAckLine(line) =>
                write!(f, "invalid acknowledgement line: '{}'", line),
        }
    }
}

impl std::error::Error for ProtocolError {}
