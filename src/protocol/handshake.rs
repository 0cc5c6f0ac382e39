//! Argument grammars carried inside command frames: greeting `M_NUL` lines,
//! `OPT` negotiation, WWIVnet addresses and the file description lines of
//! `M_FILE`, `M_GET` and `M_GOT`.

use std::fmt;

use tracing::{debug, info};

use crate::protocol::constants::WWIVNET_ZONE_NET;
use crate::protocol::error::ProtocolError;

pub const DEFAULT_NETWORK: &str = "wwivnet";

fn version_string() -> String {
    format!("binkpd/{}", env!("CARGO_PKG_VERSION"))
}

/// Options offered by the peer in an `OPT` line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OptFlags {
    pub cram_challenge: Option<String>,
    pub crc: bool,
}

/// Parse the tokens following `OPT`.
pub fn parse_opt(line: &str) -> OptFlags {
    let mut flags = OptFlags::default();
    for token in line.split_whitespace() {
        if token.starts_with("CRAM") {
            match token.rfind('-') {
                Some(dash) => {
                    let challenge = &token[dash + 1..];
                    debug!("CRAM requested by remote side, challenge: '{}'", challenge);
                    flags.cram_challenge = Some(challenge.to_string());
                }
                None => info!("CRAM option without challenge: '{}'", token),
            }
        } else if token == "CRC" {
            flags.crc = true;
        } else {
            info!("Unknown OPT: '{}'", token);
        }
    }
    flags
}

/// Meaning of an `M_NUL` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NulLine {
    Opt(OptFlags),
    System(String),
    Version(String),
    Other(String),
}

pub fn parse_nul(line: &str) -> NulLine {
    if let Some(rest) = line.strip_prefix("OPT") {
        NulLine::Opt(parse_opt(rest.trim_start()))
    } else if let Some(rest) = line.strip_prefix("SYS ") {
        NulLine::System(rest.to_string())
    } else if let Some(rest) = line.strip_prefix("VER ") {
        NulLine::Version(rest.to_string())
    } else {
        NulLine::Other(line.to_string())
    }
}

/// A WWIVnet node address, `20000:20000/<node>@<network>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WwivAddress {
    pub node: u16,
    pub network: String,
}

impl WwivAddress {
    pub fn new(node: u16, network: &str) -> Self {
        Self { node, network: network.to_lowercase() }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.trim().strip_prefix(WWIVNET_ZONE_NET)?;
        let (node_part, network) = match rest.split_once('@') {
            Some((node, network)) => (node, network),
            None => (rest, DEFAULT_NETWORK),
        };
        // Drop any point or trailing path: "2.0" or "2/..." both mean node 2.
        let node = node_part.split(['.', '/']).next()?.parse().ok()?;
        if network.is_empty() {
            return None;
        }
        Some(Self::new(node, network))
    }
}

impl fmt::Display for WwivAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}@{}", WWIVNET_ZONE_NET, self.node, self.network)
    }
}

/// Parse a space-delimited `M_ADR` list, skipping non-WWIVnet addresses.
pub fn parse_address_list(list: &str) -> Vec<WwivAddress> {
    list.split_whitespace()
        .filter_map(|s| {
            let parsed = WwivAddress::parse(s);
            if parsed.is_none() {
                debug!("skipping address '{}'", s);
            }
            parsed
        })
        .collect()
}

/// Everything this side says about itself before authentication.
#[derive(Debug, Clone)]
pub struct Greeting {
    pub system_name: String,
    pub sysop_name: String,
    pub cram_challenge: Option<String>,
    pub crc: bool,
    pub addresses: Vec<WwivAddress>,
}

impl Greeting {
    /// The `M_NUL` lines, in send order.
    pub fn nul_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(challenge) = &self.cram_challenge {
            lines.push(format!("OPT CRAM-MD5-{}", challenge));
        }
        lines.push(format!("WWIVVER {}", version_string()));
        lines.push(format!("SYS {}", self.system_name));
        lines.push(format!("ZYZ {}", self.sysop_name));
        lines.push(format!("VER {} binkp/1.0", version_string()));
        lines.push("LOC Unknown".to_string());
        if self.crc {
            lines.push("OPT CRC".to_string());
        }
        for address in &self.addresses {
            lines.push(format!("WWIV @{}.{}", address.node, address.network));
        }
        lines
    }

    pub fn address_list(&self) -> String {
        self.addresses
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn parse_number<T: std::str::FromStr>(token: &str, line: &str) -> Result<T, ProtocolError> {
    token
        .parse()
        .map_err(|_| ProtocolError::InvalidFileLine(line.to_string()))
}

/// `filename length timestamp [offset [crc-hex]]`, as carried by `M_FILE` and `M_GET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLine {
    pub name: String,
    pub length: u64,
    pub timestamp: i64,
    pub offset: u64,
    pub crc: Option<u32>,
}

impl FileLine {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(ProtocolError::InvalidFileLine(line.to_string()));
        }
        let offset = match parts.get(3) {
            Some(s) => parse_number(s, line)?,
            None => 0,
        };
        let crc = match parts.get(4) {
            Some(s) => Some(
                u32::from_str_radix(s, 16)
                    .map_err(|_| ProtocolError::InvalidFileLine(line.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            name: parts[0].to_string(),
            length: parse_number(parts[1], line)?,
            timestamp: parse_number(parts[2], line)?,
            offset,
            crc,
        })
    }

    pub fn to_line(&self) -> String {
        let mut line = format!("{} {} {} {}", self.name, self.length, self.timestamp, self.offset);
        if let Some(crc) = self.crc {
            line.push_str(&format!(" {:08X}", crc));
        }
        line
    }
}

/// `filename length [timestamp [crc-hex]]`, as carried by `M_GOT` and `M_SKIP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckLine {
    pub name: String,
    pub length: u64,
    pub timestamp: Option<i64>,
    pub crc: Option<u32>,
}

impl AckLine {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidAckLine(line.to_string());
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            return Err(invalid());
        }
        let length = parts[1].parse().map_err(|_| invalid())?;
        let timestamp = match parts.get(2) {
            Some(s) => Some(s.parse().map_err(|_| invalid())?),
            None => None,
        };
        let crc = match parts.get(3) {
            Some(s) => Some(u32::from_str_radix(s, 16).map_err(|_| invalid())?),
            None => None,
        };
        Ok(Self { name: parts[0].to_string(), length, timestamp, crc })
    }

    pub fn to_line(&self) -> String {
        let mut line = format!("{} {}", self.name, self.length);
        if let Some(ts) = self.timestamp {
            line.push_str(&format!(" {}", ts));
            if let Some(crc) = self.crc {
                line.push_str(&format!(" {:08X}", crc));
            }
        }
        line
    }
}
