use std::str::FromStr;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::codec::Codec;
use crate::error::{CodecError, CodecResult};

const MAGIC: &[u8; 4] = b"BRC1";

/// Length of the sync marker terminating every frame (and the header).
pub const SYNC_MARKER_LEN: usize = 16;

/// A packed container plus the `[start, end)` byte range of each record's
/// frame, in input order. A ranged read of `bytes[start..end]` yields a
/// self-contained frame for [`extract`].
#[derive(Debug, Clone)]
pub struct PackedBlock {
    pub bytes: Bytes,
    pub ranges: Vec<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub schema_id: i32,
    pub codec: Codec,
    pub sync: [u8; SYNC_MARKER_LEN],
}

impl ContainerHeader {
    fn encoded_len(&self) -> usize {
        MAGIC.len() + 4 + 1 + self.codec.name().len() + SYNC_MARKER_LEN
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.schema_id.to_le_bytes());
        let name = self.codec.name().as_bytes();
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        out.extend_from_slice(&self.sync);
    }
}

fn new_sync_marker() -> [u8; SYNC_MARKER_LEN] {
    uuid::Uuid::new_v4().into_bytes()
}

/// Parse a container header from the start of `bytes` and return it along
/// with the offset of the first frame.
pub fn read_header(bytes: &[u8]) -> CodecResult<(ContainerHeader, usize)> {
    let mut cursor = bytes;
    let magic = take(&mut cursor, MAGIC.len(), "magic")?;
    if magic != MAGIC.as_slice() {
        return Err(CodecError::MalformedHeader("bad magic".to_string()));
    }
    let schema_id = i32::from_le_bytes(take(&mut cursor, 4, "schema id")?.try_into().unwrap());
    let name_len = take(&mut cursor, 1, "codec name length")?[0] as usize;
    let name = std::str::from_utf8(take(&mut cursor, name_len, "codec name")?)
        .map_err(|_| CodecError::MalformedHeader("codec name is not utf-8".to_string()))?;
    let codec = Codec::from_str(name)?;
    let sync: [u8; SYNC_MARKER_LEN] = take(&mut cursor, SYNC_MARKER_LEN, "sync marker")?
        .try_into()
        .unwrap();
    let header = ContainerHeader {
        schema_id,
        codec,
        sync,
    };
    Ok((header, bytes.len() - cursor.len()))
}

/// Pack `records` into a container, one compressed frame per record.
///
/// Returns the container bytes plus the frame byte range of every input
/// record in order. The written frames are re-scanned before returning;
/// a frame declaring anything other than a single record is a codec
/// invariant violation and fails the whole pack.
pub fn pack<T: Serialize>(schema_id: i32, records: &[T], codec: Codec) -> CodecResult<PackedBlock> {
    let header = ContainerHeader {
        schema_id,
        codec,
        sync: new_sync_marker(),
    };
    let mut out = Vec::with_capacity(header.encoded_len() + records.len() * 64);
    header.write(&mut out);

    let mut ranges = Vec::with_capacity(records.len());
    for record in records {
        let start = out.len() as u64;
        let raw = serde_json::to_vec(record).map_err(CodecError::Serialize)?;
        let payload = codec.compress(&raw)?;
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&header.sync);
        ranges.push((start, out.len() as u64));
    }

    // Read the container back and verify the one-record-per-frame invariant.
    for &(start, end) in &ranges {
        let frame = &out[start as usize..end as usize];
        let declared = u32::from_le_bytes(frame[..4].try_into().unwrap()) as u64;
        if declared != 1 {
            return Err(CodecError::RecordCount {
                expected: 1,
                actual: declared,
            });
        }
    }

    Ok(PackedBlock {
        bytes: Bytes::from(out),
        ranges,
    })
}

/// Decompress the payload of a single frame.
///
/// `frame` is a slice starting at a frame boundary, as addressed by a
/// [`PackedBlock`] range; a trailing sync marker is tolerated and ignored.
pub fn extract_frame(frame: &[u8], codec: Codec) -> CodecResult<Vec<u8>> {
    let mut cursor = frame;
    let count = u32::from_le_bytes(take(&mut cursor, 4, "record count")?.try_into().unwrap());
    if count != 1 {
        return Err(CodecError::RecordCount {
            expected: 1,
            actual: count as u64,
        });
    }
    let len = u32::from_le_bytes(take(&mut cursor, 4, "payload length")?.try_into().unwrap()) as usize;
    let payload = take(&mut cursor, len, "payload")?;
    codec.decompress(payload)
}

/// Extract and deserialize exactly one record from a frame slice.
pub fn extract<T: DeserializeOwned>(frame: &[u8], codec: Codec) -> CodecResult<T> {
    let raw = extract_frame(frame, codec)?;
    serde_json::from_slice(&raw).map_err(CodecError::Deserialize)
}

/// Strip the trailing sync marker from a frame captured out of a container.
///
/// The remaining bytes are a valid [`splice`] input.
pub fn strip_sync(frame: &[u8]) -> CodecResult<&[u8]> {
    if frame.len() < SYNC_MARKER_LEN {
        return Err(CodecError::MalformedFrame(format!(
            "frame of {} bytes is too short to carry a sync marker",
            frame.len()
        )));
    }
    Ok(&frame[..frame.len() - SYNC_MARKER_LEN])
}

/// Build a container from already-framed bodies without re-encoding.
///
/// Every element of `frames` must be a frame with its trailing sync marker
/// stripped (see [`strip_sync`]); the bytes are concatenated verbatim under
/// a freshly generated marker shared by all frames.
pub fn splice<B: AsRef<[u8]>>(schema_id: i32, frames: &[B], codec: Codec) -> CodecResult<Bytes> {
    let header = ContainerHeader {
        schema_id,
        codec,
        sync: new_sync_marker(),
    };
    let body_len: usize = frames.iter().map(|f| f.as_ref().len()).sum();
    let mut out = Vec::with_capacity(header.encoded_len() + body_len + frames.len() * SYNC_MARKER_LEN);
    header.write(&mut out);
    for frame in frames {
        out.extend_from_slice(frame.as_ref());
        out.extend_from_slice(&header.sync);
    }
    Ok(Bytes::from(out))
}

fn take<'a>(cursor: &mut &'a [u8], len: usize, what: &str) -> CodecResult<&'a [u8]> {
    if cursor.len() < len {
        return Err(CodecError::MalformedFrame(format!(
            "truncated while reading {what}: need {len} bytes, have {}",
            cursor.len()
        )));
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Detection {
        id: i64,
        ra: f64,
        dec: f64,
        band: Option<String>,
    }

    fn detections(n: i64) -> Vec<Detection> {
        (0..n)
            .map(|i| Detection {
                id: 1000 + i,
                ra: 12.5 * i as f64,
                dec: -1.25 * i as f64,
                band: (i % 2 == 0).then(|| "r".to_string()),
            })
            .collect()
    }

    #[test]
    fn every_range_extracts_its_own_record() {
        for codec in [Codec::Null, Codec::Zstd] {
            let records = detections(7);
            let packed = pack(42, &records, codec).expect("pack");
            assert_eq!(packed.ranges.len(), records.len());
            for (record, &(start, end)) in records.iter().zip(&packed.ranges) {
                let frame = &packed.bytes[start as usize..end as usize];
                let restored: Detection = extract(frame, codec).expect("extract");
                assert_eq!(&restored, record);
            }
        }
    }

    #[test]
    fn ranges_are_contiguous_and_cover_the_body() {
        let packed = pack(7, &detections(4), Codec::Zstd).expect("pack");
        let (_, first_frame) = read_header(&packed.bytes).expect("header");
        assert_eq!(packed.ranges[0].0, first_frame as u64);
        for pair in packed.ranges.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert_eq!(packed.ranges.last().unwrap().1, packed.bytes.len() as u64);
    }

    #[test]
    fn header_survives_a_round_trip() {
        let packed = pack(-3, &detections(1), Codec::Zstd).expect("pack");
        let (header, _) = read_header(&packed.bytes).expect("header");
        assert_eq!(header.schema_id, -3);
        assert_eq!(header.codec, Codec::Zstd);
    }

    #[test]
    fn extract_rejects_multi_record_frames() {
        let packed = pack(1, &detections(1), Codec::Null).expect("pack");
        let (start, end) = packed.ranges[0];
        let mut frame = packed.bytes[start as usize..end as usize].to_vec();
        frame[..4].copy_from_slice(&3u32.to_le_bytes());
        let err = extract::<Detection>(&frame, Codec::Null).expect_err("must fail");
        assert!(matches!(err, CodecError::RecordCount { actual: 3, .. }));
    }

    #[test]
    fn extract_rejects_truncated_frames() {
        let packed = pack(1, &detections(1), Codec::Zstd).expect("pack");
        let (start, end) = packed.ranges[0];
        let frame = &packed.bytes[start as usize..(end as usize - SYNC_MARKER_LEN - 1)];
        let err = extract::<Detection>(frame, Codec::Zstd).expect_err("must fail");
        assert!(matches!(err, CodecError::MalformedFrame(_)));
    }

    #[test]
    fn splice_concatenates_without_reencoding() {
        let codec = Codec::Zstd;
        let first = detections(3);
        let second = detections(2);
        let packed_first = pack(9, &first, codec).expect("pack first");
        let packed_second = pack(9, &second, codec).expect("pack second");

        let mut bodies: Vec<Vec<u8>> = Vec::new();
        let mut payloads: Vec<Vec<u8>> = Vec::new();
        for (packed, _) in [(&packed_first, &first), (&packed_second, &second)] {
            for &(start, end) in &packed.ranges {
                let frame = &packed.bytes[start as usize..end as usize];
                bodies.push(strip_sync(frame).expect("strip").to_vec());
                payloads.push(extract_frame(frame, codec).expect("payload"));
            }
        }

        let spliced = splice(9, &bodies, codec).expect("splice");
        let (header, mut pos) = read_header(&spliced).expect("header");
        assert_eq!(header.schema_id, 9);

        let expected: Vec<Detection> = first.iter().chain(second.iter()).cloned().collect();
        for (record, payload) in expected.iter().zip(&payloads) {
            let frame = &spliced[pos..];
            // payload bytes are carried over untouched
            assert_eq!(&extract_frame(frame, codec).expect("payload"), payload);
            let restored: Detection = extract(frame, codec).expect("extract");
            assert_eq!(&restored, record);
            let body_len = u32::from_le_bytes(frame[4..8].try_into().unwrap()) as usize;
            pos += 4 + 4 + body_len;
            assert_eq!(&spliced[pos..pos + SYNC_MARKER_LEN], &header.sync[..]);
            pos += SYNC_MARKER_LEN;
        }
        assert_eq!(pos, spliced.len());
    }

    #[test]
    fn strip_sync_rejects_short_frames() {
        let err = strip_sync(&[0u8; 4]).expect_err("must fail");
        assert!(matches!(err, CodecError::MalformedFrame(_)));
    }
}
