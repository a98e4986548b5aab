//! Byte-order mark removal stage.

use bytes::Bytes;
use tokio::io::{self, AsyncRead, AsyncReadExt};

use crate::net::prebuffered::{replay, ReplayReader};

/// A known byte-order mark.
#[derive(Debug, PartialEq, Eq)]
pub struct Bom {
    pub encoding: &'static str,
    pub signature: &'static [u8],
}

pub const KNOWN_BOMS: &[Bom] = &[
    Bom { encoding: "UTF-8", signature: &[0xEF, 0xBB, 0xBF] },
    Bom { encoding: "UTF-16BE", signature: &[0xFE, 0xFF] },
    Bom { encoding: "UTF-16LE", signature: &[0xFF, 0xFE] },
    Bom { encoding: "UTF-32BE", signature: &[0x00, 0x00, 0xFE, 0xFF] },
    Bom { encoding: "UTF-32LE", signature: &[0xFF, 0xFE, 0x00, 0x00] },
    Bom { encoding: "UTF-7", signature: &[0x2B, 0x2F, 0x76, 0x38] },
    Bom { encoding: "UTF-7", signature: &[0x2B, 0x2F, 0x76, 0x39] },
    Bom { encoding: "UTF-7", signature: &[0x2B, 0x2F, 0x76, 0x2B] },
    Bom { encoding: "UTF-7", signature: &[0x2B, 0x2F, 0x76, 0x2F] },
    Bom { encoding: "UTF-1", signature: &[0xF7, 0x64, 0x4C] },
    Bom { encoding: "UTF-EBCDIC", signature: &[0xDD, 0x73, 0x66, 0x73] },
    Bom { encoding: "SCSU", signature: &[0x0E, 0xFE, 0xFF] },
    Bom { encoding: "BOCU-1", signature: &[0xFB, 0xEE, 0x28] },
    Bom { encoding: "GB-18030", signature: &[0x84, 0x31, 0x95, 0x33] },
];

/// Longest signature in [`KNOWN_BOMS`].
const MAX_SIGNATURE_LEN: usize = 4;

/// Find the byte-order mark at the start of `prefix`.
///
/// `prefix` must hold at least [`MAX_SIGNATURE_LEN`] bytes unless the stream
/// ended earlier. Returns `None` when no signature matches or when more than
/// one does.
pub fn detect(prefix: &[u8]) -> Option<&'static Bom> {
    let mut matches = KNOWN_BOMS.iter().filter(|bom| prefix.starts_with(bom.signature));
    match (matches.next(), matches.next()) {
        (Some(bom), None) => Some(bom),
        _ => None,
    }
}

/// Skip a leading byte-order mark, if there is exactly one candidate.
///
/// Reads up to four bytes ahead; they are replayed unless they belong to the
/// detected mark.
pub async fn strip<R>(mut reader: R) -> io::Result<(ReplayReader<R>, Option<&'static Bom>)>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = Vec::with_capacity(MAX_SIGNATURE_LEN);
    while prefix.len() < MAX_SIGNATURE_LEN {
        let missing = (MAX_SIGNATURE_LEN - prefix.len()) as u64;
        if (&mut reader).take(missing).read_buf(&mut prefix).await? == 0 {
            break;
        }
    }

    let bom = detect(&prefix);
    let skip = bom.map_or(0, |bom| bom.signature.len());
    let rest = Bytes::from(prefix).slice(skip..);
    Ok((replay(rest, reader), bom))
}
