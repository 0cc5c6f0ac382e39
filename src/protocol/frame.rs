use std::time::Duration;

use tracing::{trace, warn};

use crate::protocol::constants::*;
use crate::protocol::error::ProtocolError;
use crate::transport::{Connection, TransportError};

pub const COMMAND_WRITE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DATA_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed-size frame header (2 bytes, big-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub is_command: bool,
    pub length: u16,
}

impl FrameHeader {
    pub const SIZE: usize = 2;

    pub fn decode(buf: [u8; 2]) -> Self {
        let raw = u16::from_be_bytes(buf);
        Self {
            is_command: raw & COMMAND_FLAG != 0,
            length: raw & LENGTH_MASK,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut raw = self.length & LENGTH_MASK;
        if self.is_command {
            raw |= COMMAND_FLAG;
        }
        raw.to_be_bytes()
    }
}

/// One variant per command id; ids this engine does not know decode to `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nul(String),
    Adr(String),
    Pwd(String),
    File(String),
    Ok(String),
    Eob(String),
    Got(String),
    Err(String),
    Bsy(String),
    Get(String),
    Skip(String),
    Unknown { id: u8, arg: String },
}

impl Command {
    pub fn from_parts(id: u8, arg: String) -> Self {
        match id {
            M_NUL => Command::Nul(arg),
            M_ADR => Command::Adr(arg),
            M_PWD => Command::Pwd(arg),
            M_FILE => Command::File(arg),
            M_OK => Command::Ok(arg),
            M_EOB => Command::Eob(arg),
            M_GOT => Command::Got(arg),
            M_ERR => Command::Err(arg),
            M_BSY => Command::Bsy(arg),
            M_GET => Command::Get(arg),
            M_SKIP => Command::Skip(arg),
            id => Command::Unknown { id, arg },
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            Command::Nul(_) => M_NUL,
            Command::Adr(_) => M_ADR,
            Command::Pwd(_) => M_PWD,
            Command::File(_) => M_FILE,
            Command::Ok(_) => M_OK,
            Command::Eob(_) => M_EOB,
            Command::Got(_) => M_GOT,
            Command::Err(_) => M_ERR,
            Command::Bsy(_) => M_BSY,
            Command::Get(_) => M_GET,
            Command::Skip(_) => M_SKIP,
            Command::Unknown { id, .. } => *id,
        }
    }

    pub fn arg(&self) -> &str {
        match self {
            Command::Nul(s)
            | Command::Adr(s)
            | Command::Pwd(s)
            | Command::File(s)
            | Command::Ok(s)
            | Command::Eob(s)
            | Command::Got(s)
            | Command::Err(s)
            | Command::Bsy(s)
            | Command::Get(s)
            | Command::Skip(s) => s,
            Command::Unknown { arg, .. } => arg,
        }
    }

    pub fn name(&self) -> &'static str {
        command_name(self.id())
    }

    /// Argument as it may appear in logs; passwords are masked.
    pub fn log_arg(&self) -> String {
        match self {
            Command::Pwd(_) => "*".repeat(8),
            other => other.arg().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Command(Command),
    Data(Vec<u8>),
}

pub fn encode_command(command: &Command) -> Result<Vec<u8>, ProtocolError> {
    let arg = command.arg().as_bytes();
    let length = arg.len() + 1;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    let header = FrameHeader { is_command: true, length: length as u16 };
    let mut out = Vec::with_capacity(FrameHeader::SIZE + length);
    out.extend_from_slice(&header.encode());
    out.push(command.id());
    out.extend_from_slice(arg);
    Ok(out)
}

pub fn encode_data(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    let header = FrameHeader { is_command: false, length: data.len() as u16 };
    let mut out = Vec::with_capacity(FrameHeader::SIZE + data.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(data);
    Ok(out)
}

fn command_from_body(body: &[u8]) -> Command {
    match body.split_first() {
        Some((&id, arg)) => Command::from_parts(id, String::from_utf8_lossy(arg).into_owned()),
        // A zero-length command frame carries no id; treat it as an empty M_NUL.
        None => Command::Nul(String::new()),
    }
}

/// Decode one frame from the front of `bytes`, returning it and the bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    if bytes.len() < FrameHeader::SIZE {
        return Err(ProtocolError::Truncated);
    }
    let header = FrameHeader::decode([bytes[0], bytes[1]]);
    let end = FrameHeader::SIZE + header.length as usize;
    if bytes.len() < end {
        return Err(ProtocolError::Truncated);
    }
    let body = &bytes[FrameHeader::SIZE..end];
    let frame = if header.is_command {
        Frame::Command(command_from_body(body))
    } else {
        Frame::Data(body.to_vec())
    };
    Ok((frame, end))
}

pub async fn read_command<C: Connection + ?Sized>(
    conn: &mut C,
    length: u16,
    wait: Duration,
) -> Result<Command, TransportError> {
    if length == 0 {
        warn!("zero-length command frame");
        return Ok(Command::Nul(String::new()));
    }
    let id = conn.read(1, wait).await?[0];
    let arg = if length > 1 {
        conn.read(length as usize - 1, wait).await?
    } else {
        Vec::new()
    };
    Ok(Command::from_parts(id, String::from_utf8_lossy(&arg).into_owned()))
}

pub async fn read_data<C: Connection + ?Sized>(
    conn: &mut C,
    length: u16,
    wait: Duration,
) -> Result<Vec<u8>, TransportError> {
    conn.read(length as usize, wait).await
}

/// Read one frame. `wait` bounds the wait for a header; once a header has
/// arrived the body is read with `body_wait`.
pub async fn read_frame<C: Connection + ?Sized>(
    conn: &mut C,
    wait: Duration,
    body_wait: Duration,
) -> Result<Frame, TransportError> {
    let raw = conn.read(FrameHeader::SIZE, wait).await?;
    let header = FrameHeader::decode([raw[0], raw[1]]);
    trace!("frame header: command={} length={}", header.is_command, header.length);
    let body = if header.is_command {
        read_command(conn, header.length, body_wait).await.map(Frame::Command)
    } else {
        read_data(conn, header.length, body_wait).await.map(Frame::Data)
    };
    // The header is consumed; a stalled body means the stream is out of step.
    body.map_err(|e| match e {
        TransportError::Timeout => TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out reading frame body",
        )),
        other => other,
    })
}

fn invalid_input(e: ProtocolError) -> TransportError {
    TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
}

pub async fn write_command<C: Connection + ?Sized>(
    conn: &mut C,
    command: &Command,
) -> Result<(), TransportError> {
    let packet = encode_command(command).map_err(invalid_input)?;
    conn.write(&packet, COMMAND_WRITE_TIMEOUT).await
}

pub async fn write_data<C: Connection + ?Sized>(
    conn: &mut C,
    data: &[u8],
) -> Result<(), TransportError> {
    if data.len() > MAX_DATA_CHUNK {
        return Err(invalid_input(ProtocolError::FrameTooLarge(data.len())));
    }
    let packet = encode_data(data).map_err(invalid_input)?;
    conn.write(&packet, DATA_WRITE_TIMEOUT).await?;
    trace!("SEND:  data packet: length: {}", data.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamConnection;
    use tokio::io::duplex;

    #[test]
    fn command_header_sets_top_bit() {
        let bytes = encode_command(&Command::Eob(String::new())).unwrap();
        assert_eq!(bytes, vec![0x80, 0x01, M_EOB]);

        let bytes = encode_command(&Command::Adr("20000:20000/1@wwivnet".into())).unwrap();
        assert_eq!(bytes[0], 0x80);
        assert_eq!(bytes[1] as usize, "20000:20000/1@wwivnet".len() + 1);
        assert_eq!(bytes[2], M_ADR);
    }

    #[test]
    fn data_header_clears_top_bit() {
        let bytes = encode_data(&[0u8; 300]).unwrap();
        assert_eq!(&bytes[..2], &[0x01, 0x2c]);
        assert_eq!(bytes.len(), 302);
    }

    #[test]
    fn header_roundtrip_at_limits() {
        for &(is_command, length) in &[(true, 0u16), (false, 0), (true, 0x7fff), (false, 0x7fff), (false, 16384)] {
            let header = FrameHeader { is_command, length };
            assert_eq!(FrameHeader::decode(header.encode()), header);
        }
    }

    #[test]
    fn frame_roundtrip() {
        let frames = vec![
            Frame::Command(Command::File("s1.net 40000 1700000000 0".into())),
            Frame::Command(Command::Unknown { id: 42, arg: "what".into() }),
            Frame::Data(vec![7u8; MAX_FRAME_SIZE]),
            Frame::Data(Vec::new()),
        ];
        for frame in frames {
            let bytes = match &frame {
                Frame::Command(c) => encode_command(c).unwrap(),
                Frame::Data(d) => encode_data(d).unwrap(),
            };
            let (decoded, used) = decode_frame(&bytes).unwrap();
            assert_eq!(used, bytes.len());
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn oversize_frames_rejected() {
        assert_eq!(
            encode_data(&vec![0u8; MAX_FRAME_SIZE + 1]),
            Err(ProtocolError::FrameTooLarge(MAX_FRAME_SIZE + 1))
        );
        let long = "x".repeat(MAX_FRAME_SIZE);
        assert!(encode_command(&Command::Nul(long)).is_err());
    }

    #[test]
    fn decode_needs_whole_frame() {
        let bytes = encode_command(&Command::Ok("fine".into())).unwrap();
        assert_eq!(decode_frame(&bytes[..3]), Err(ProtocolError::Truncated));
        assert_eq!(decode_frame(&bytes[..1]), Err(ProtocolError::Truncated));
    }

    #[tokio::test]
    async fn read_frame_over_stream() {
        let (a, b) = duplex(1024);
        let mut tx = StreamConnection::new(a, "tx");
        let mut rx = StreamConnection::new(b, "rx");

        write_command(&mut tx, &Command::Ok(String::new())).await.unwrap();
        write_data(&mut tx, b"hello").await.unwrap();

        let wait = Duration::from_millis(200);
        assert_eq!(
            read_frame(&mut rx, wait, wait).await.unwrap(),
            Frame::Command(Command::Ok(String::new()))
        );
        assert_eq!(read_frame(&mut rx, wait, wait).await.unwrap(), Frame::Data(b"hello".to_vec()));
        assert!(read_frame(&mut rx, Duration::from_millis(20), wait).await.unwrap_err().is_timeout());
    }

    #[test]
    fn password_is_masked_in_logs() {
        assert_eq!(Command::Pwd("secret".into()).log_arg(), "********");
        assert_eq!(Command::Nul("SYS x".into()).log_arg(), "SYS x");
    }
}
