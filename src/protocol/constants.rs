//! Protocol constants for BinkP network communication

/// Command ids, fixed by the wire protocol
pub const M_NUL: u8 = 0;
pub const M_ADR: u8 = 1;
pub const M_PWD: u8 = 2;
pub const M_FILE: u8 = 3;
pub const M_OK: u8 = 4;
pub const M_EOB: u8 = 5;
pub const M_GOT: u8 = 6;
pub const M_ERR: u8 = 7;
pub const M_BSY: u8 = 8;
pub const M_GET: u8 = 9;
pub const M_SKIP: u8 = 10;

/// Top bit of the frame header marks a command frame
pub const COMMAND_FLAG: u16 = 0x8000;
pub const LENGTH_MASK: u16 = 0x7fff;

/// Largest body a frame header can describe
pub const MAX_FRAME_SIZE: usize = 0x7fff;

/// Outbound data frames are capped at 1 << 14
pub const MAX_DATA_CHUNK: usize = 16384;

/// Default BinkP port
pub const BINKP_PORT: u16 = 24554;

/// WWIVnet addresses are presented as `20000:20000/<node>@<network>`
pub const WWIVNET_ZONE_NET: &str = "20000:20000/";

/// Password used when a callout record has none
pub const DEFAULT_PASSWORD: &str = "-";

pub const CRAM_MD5_PREFIX: &str = "CRAM-MD5-";

pub fn command_name(id: u8) -> &'static str {
    match id {
        M_NUL => "M_NUL",
        M_ADR => "M_ADR",
        M_PWD => "M_PWD",
        M_FILE => "M_FILE",
        M_OK => "M_OK",
        M_EOB => "M_EOB",
        M_GOT => "M_GOT",
        M_ERR => "M_ERR",
        M_BSY => "M_BSY",
        M_GET => "M_GET",
        M_SKIP => "M_SKIP",
        _ => "M_UNKNOWN",
    }
}
