use std::path::Path;

use crc32fast::Hasher;
use tokio::io::AsyncReadExt;

/// Compute CRC32 checksum for a byte slice
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// CRC32 of a file on disk, read in chunks
pub async fn crc32_file(path: impl AsRef<Path>) -> std::io::Result<u32> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
