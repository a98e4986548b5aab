//! Gzip decoding stage.

use async_compression::tokio::bufread::GzipDecoder;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, BufReader};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether a `Content-Encoding` value names gzip.
pub fn is_gzip(content_encoding: &str) -> bool {
    let encoding = content_encoding.trim();
    encoding.eq_ignore_ascii_case("gzip") || encoding.eq_ignore_ascii_case("x-gzip")
}

/// A gzip decoder with its first decoded block already buffered.
pub type Decoder<R> = BufReader<GzipDecoder<BufReader<R>>>;

/// Wrap `reader` in a gzip decoder.
///
/// The gzip header and the first compressed block are decoded before the
/// decoder is returned, so a corrupt stream fails here instead of after the
/// response headers went out.
pub async fn decoder<R>(reader: R) -> io::Result<Decoder<R>>
where
    R: AsyncRead + Unpin,
{
    let mut buffered = BufReader::new(reader);
    let head = buffered.fill_buf().await?;

    if head.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "empty gzip stream",
        ));
    }
    if !GZIP_MAGIC.starts_with(&head[..head.len().min(GZIP_MAGIC.len())]) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing gzip header",
        ));
    }

    let mut decoder = GzipDecoder::new(buffered);
    decoder.multiple_members(true);

    let mut decoded = BufReader::new(decoder);
    decoded.fill_buf().await?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};
    use tokio::io::AsyncReadExt;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn recognizes_encodings() {
        assert!(is_gzip("gzip"));
        assert!(is_gzip(" X-GZIP "));
        assert!(!is_gzip("br"));
        assert!(!is_gzip("gzip, br"));
    }

    #[tokio::test]
    async fn decodes_body() {
        let mut reader = decoder(Cursor::new(gzip(b"hello gzip"))).await.unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello gzip");
    }

    #[tokio::test]
    async fn decodes_concatenated_members() {
        let mut data = gzip(b"first ");
        data.extend(gzip(b"second"));

        let mut reader = decoder(Cursor::new(data)).await.unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "first second");
    }

    #[tokio::test]
    async fn rejects_plain_body() {
        let err = decoder(Cursor::new(b"plain text".to_vec())).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn rejects_corrupt_header_after_magic() {
        let body = b"\x1f\x8b\x63not really gzip at all".to_vec();
        let err = decoder(Cursor::new(body)).await.err().unwrap();
        assert_ne!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn empty_member_decodes_to_nothing() {
        let mut reader = decoder(Cursor::new(gzip(b""))).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_body() {
        let err = decoder(Cursor::new(Vec::new())).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
