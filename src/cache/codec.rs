//! Record Codec Module
//!
//! Length-prefixed record layout shared by every cache file.
//!
//! A record is a sequence of segments, each a little-endian `u32` byte count
//! followed by that many bytes. Item codecs write two segments: a header
//! (`url + "\n" + ticks`) and the payload. The store prepends the index key
//! as one more segment.

use std::io::{self, Read, Write};

use chrono::{DateTime, Utc};

use crate::cache::entry::{from_ticks, to_ticks, BlobItem, CacheItem, ResponseItem};
use crate::error::{CacheError, Result};

// == Record Codec ==
/// Serialization strategy for one kind of cached artifact.
pub trait RecordCodec: Send + Sync {
    /// Artifact type this codec persists.
    type Item: CacheItem;

    /// Writes `item` as its header and payload segments.
    fn write<W: Write>(&self, out: &mut W, item: &Self::Item) -> io::Result<()>;

    /// Reads one item written by [`RecordCodec::write`].
    ///
    /// Any structural damage is reported as `CorruptRecord`.
    fn read<R: Read>(&self, input: &mut R) -> Result<Self::Item>;

    /// Rejects items that [`RecordCodec::write`] cannot represent, before
    /// anything is written.
    fn check(&self, _item: &Self::Item) -> io::Result<()> {
        Ok(())
    }

    /// Encodes `item` into a standalone byte vector.
    fn encode(&self, item: &Self::Item) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write(&mut buf, item)?;
        Ok(buf)
    }

    /// Decodes a byte vector produced by [`RecordCodec::encode`].
    fn decode(&self, bytes: &[u8]) -> Result<Self::Item> {
        let mut input = bytes;
        let item = self.read(&mut input)?;
        if !input.is_empty() {
            return Err(CacheError::corrupt(format!(
                "{} trailing bytes after record",
                input.len()
            )));
        }
        Ok(item)
    }
}

// == Segment Framing ==
/// Writes one length-prefixed segment.
pub fn write_bytes<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("segment of {} bytes exceeds the u32 length prefix", bytes.len()),
        )
    })?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(bytes)
}

/// Writes one length-prefixed UTF-8 string segment.
pub fn write_string<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    write_bytes(out, value.as_bytes())
}

/// Reads one length-prefixed segment.
///
/// Never allocates more than the input actually holds, so a garbage prefix
/// cannot trigger a huge allocation.
pub fn read_bytes<R: Read>(input: &mut R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    input
        .read_exact(&mut prefix)
        .map_err(|_| CacheError::corrupt("truncated length prefix"))?;
    let len = u64::from(u32::from_le_bytes(prefix));

    let mut buf = Vec::new();
    input
        .by_ref()
        .take(len)
        .read_to_end(&mut buf)
        .map_err(|e| CacheError::corrupt(format!("unreadable segment: {e}")))?;

    if buf.len() as u64 != len {
        return Err(CacheError::corrupt(format!(
            "segment truncated: expected {} bytes, found {}",
            len,
            buf.len()
        )));
    }
    Ok(buf)
}

/// Reads one length-prefixed UTF-8 string segment.
pub fn read_string<R: Read>(input: &mut R) -> Result<String> {
    String::from_utf8(read_bytes(input)?)
        .map_err(|_| CacheError::corrupt("segment is not valid UTF-8"))
}

// == Header ==
/// The header joins url and ticks with a newline, so the url must not hold one.
fn check_header_url(url: &str) -> io::Result<()> {
    if url.contains('\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("url {:?} contains a newline", url),
        ));
    }
    Ok(())
}

fn write_header<W: Write>(out: &mut W, url: &str, created_at: DateTime<Utc>) -> io::Result<()> {
    check_header_url(url)?;
    write_string(out, &format!("{}\n{}", url, to_ticks(created_at)))
}

fn read_header<R: Read>(input: &mut R) -> Result<(String, DateTime<Utc>)> {
    let header = read_string(input)?;
    let fields: Vec<&str> = header.split('\n').collect();
    if fields.len() != 2 {
        return Err(CacheError::corrupt(format!(
            "expected 2 header fields, found {}",
            fields.len()
        )));
    }

    let ticks: i64 = fields[1]
        .parse()
        .map_err(|_| CacheError::corrupt(format!("unparsable timestamp {:?}", fields[1])))?;
    let created_at = from_ticks(ticks)
        .ok_or_else(|| CacheError::corrupt(format!("timestamp {} out of range", ticks)))?;

    Ok((fields[0].to_string(), created_at))
}

// == Response Codec ==
/// Codec for cached API responses (`responseCache.dat`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseCodec;

impl RecordCodec for ResponseCodec {
    type Item = ResponseItem;

    fn check(&self, item: &ResponseItem) -> io::Result<()> {
        check_header_url(&item.url)
    }

    fn write<W: Write>(&self, out: &mut W, item: &ResponseItem) -> io::Result<()> {
        write_header(out, &item.url, item.created_at)?;
        write_string(out, &item.response)
    }

    fn read<R: Read>(&self, input: &mut R) -> Result<ResponseItem> {
        let (url, created_at) = read_header(input)?;
        let response = read_string(input)?;
        Ok(ResponseItem {
            url,
            response,
            created_at,
        })
    }
}

// == Blob Codec ==
/// Codec for cached binary downloads (`downloadCache.dat`).
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobCodec;

impl RecordCodec for BlobCodec {
    type Item = BlobItem;

    fn check(&self, item: &BlobItem) -> io::Result<()> {
        check_header_url(&item.url)
    }

    fn write<W: Write>(&self, out: &mut W, item: &BlobItem) -> io::Result<()> {
        write_header(out, &item.url, item.created_at)?;
        write_bytes(out, &item.data)
    }

    fn read<R: Read>(&self, input: &mut R) -> Result<BlobItem> {
        let (url, created_at) = read_header(input)?;
        let data = read_bytes(input)?;
        Ok(BlobItem {
            url,
            data,
            created_at,
        })
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap()
    }

    #[test]
    fn test_response_layout() {
        let item = ResponseItem::with_created_at("http://x", "body", fixed_time());
        let bytes = ResponseCodec.encode(&item).unwrap();

        let header = format!("http://x\n{}", to_ticks(fixed_time()));
        let mut expected = Vec::new();
        expected.extend_from_slice(&(header.len() as u32).to_le_bytes());
        expected.extend_from_slice(header.as_bytes());
        expected.extend_from_slice(&4u32.to_le_bytes());
        expected.extend_from_slice(b"body");

        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_response_roundtrip() {
        let item = ResponseItem::with_created_at(
            "https://api.example.com/rest?method=photos.search&text=cats",
            "<rsp stat=\"ok\">\n<photos page=\"1\"/>\n</rsp>",
            fixed_time(),
        );
        let decoded = ResponseCodec
            .decode(&ResponseCodec.encode(&item).unwrap())
            .unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn test_blob_roundtrip_with_binary_payload() {
        let data: Vec<u8> = (0..=255).collect();
        let item = BlobItem::with_created_at("https://farm.example.com/1.jpg", data, fixed_time());
        let decoded = BlobCodec.decode(&BlobCodec.encode(&item).unwrap()).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let item = ResponseItem::with_created_at("k", "", fixed_time());
        let decoded = ResponseCodec
            .decode(&ResponseCodec.encode(&item).unwrap())
            .unwrap();
        assert_eq!(decoded.response, "");
    }

    #[test]
    fn test_future_timestamp_is_accepted() {
        let future = Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap();
        let item = ResponseItem::with_created_at("k", "v", future);
        let decoded = ResponseCodec
            .decode(&ResponseCodec.encode(&item).unwrap())
            .unwrap();
        assert_eq!(decoded.created_at, future);
    }

    #[test]
    fn test_header_with_extra_newline_is_corrupt() {
        let mut bytes = Vec::new();
        write_string(&mut bytes, "http://x\nextra\n123").unwrap();
        write_string(&mut bytes, "body").unwrap();

        let result = ResponseCodec.decode(&bytes);
        assert!(matches!(result, Err(CacheError::CorruptRecord(_))));
    }

    #[test]
    fn test_url_with_newline_is_not_written() {
        let item = ResponseItem::with_created_at("http://x\ninjected", "body", fixed_time());
        let mut bytes = Vec::new();

        let err = ResponseCodec.write(&mut bytes, &item).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(bytes.is_empty());
        assert_eq!(
            ResponseCodec.check(&item).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_blob_url_with_newline_fails_check() {
        let item = BlobItem::with_created_at("a\nb", vec![1], fixed_time());
        assert!(BlobCodec.check(&item).is_err());
        assert!(BlobCodec
            .check(&BlobItem::with_created_at("a b", vec![1], fixed_time()))
            .is_ok());
    }

    #[test]
    fn test_header_without_timestamp_is_corrupt() {
        let mut bytes = Vec::new();
        write_string(&mut bytes, "http://x").unwrap();
        write_string(&mut bytes, "body").unwrap();

        assert!(matches!(
            ResponseCodec.decode(&bytes),
            Err(CacheError::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_unparsable_timestamp_is_corrupt() {
        let mut bytes = Vec::new();
        write_string(&mut bytes, "http://x\n12,5").unwrap();
        write_string(&mut bytes, "body").unwrap();

        assert!(matches!(
            ResponseCodec.decode(&bytes),
            Err(CacheError::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_truncated_payload_is_corrupt() {
        let item = ResponseItem::with_created_at("k", "a longer payload", fixed_time());
        let bytes = ResponseCodec.encode(&item).unwrap();

        let result = ResponseCodec.decode(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(CacheError::CorruptRecord(_))));
    }

    #[test]
    fn test_truncated_length_prefix_is_corrupt() {
        let result = read_bytes(&mut &[0x05u8, 0x00][..]);
        assert!(matches!(result, Err(CacheError::CorruptRecord(_))));
    }

    #[test]
    fn test_oversized_length_prefix_is_corrupt() {
        let mut bytes = u32::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"tiny");

        let result = read_bytes(&mut bytes.as_slice());
        assert!(matches!(result, Err(CacheError::CorruptRecord(_))));
    }

    #[test]
    fn test_invalid_utf8_is_corrupt() {
        let mut bytes = Vec::new();
        write_bytes(&mut bytes, &[0xff, 0xfe]).unwrap();

        let result = read_string(&mut bytes.as_slice());
        assert!(matches!(result, Err(CacheError::CorruptRecord(_))));
    }

    #[test]
    fn test_trailing_bytes_rejected_by_decode() {
        let item = ResponseItem::with_created_at("k", "v", fixed_time());
        let mut bytes = ResponseCodec.encode(&item).unwrap();
        bytes.push(0);

        assert!(matches!(
            ResponseCodec.decode(&bytes),
            Err(CacheError::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_sequential_reads_share_one_stream() {
        let first = ResponseItem::with_created_at("a", "1", fixed_time());
        let second = ResponseItem::with_created_at("b", "2", fixed_time());
        let mut bytes = Vec::new();
        ResponseCodec.write(&mut bytes, &first).unwrap();
        ResponseCodec.write(&mut bytes, &second).unwrap();

        let mut input = bytes.as_slice();
        assert_eq!(ResponseCodec.read(&mut input).unwrap(), first);
        assert_eq!(ResponseCodec.read(&mut input).unwrap(), second);
        assert!(input.is_empty());
    }
}
