//! Packed record wire format handed from the scanner to the catalog builder.
//!
//! Header (24 bytes, little-endian), followed by the four variable-length
//! UTF-8 fields in the same order they appear in the header:
//!
//! | offset | field      | width |
//! |--------|------------|-------|
//! | 0      | is_dir     | u8    |
//! | 1      | name_len   | u16   |
//! | 3      | path_len   | u16   |
//! | 5      | parent_len | u16   |
//! | 7      | ext_len    | u8    |
//! | 8      | size       | u64   |
//! | 16     | mtime      | f64   |
//!
//! This layout is canonical; no `name_lower` field travels over the wire —
//! the catalog derives the lowercased name at insert time.

use crate::model::FileRecord;

pub const HEADER_LEN: usize = 24;

/// Encode a sequence of records into the framed byte stream.
pub fn encode(records: &[FileRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for r in records {
        encode_one(r, &mut out);
    }
    out
}

fn encode_one(r: &FileRecord, out: &mut Vec<u8>) {
    let name = r.filename.as_bytes();
    let path = r.full_path.as_bytes();
    let parent = r.parent_dir.as_bytes();
    let ext = r.extension.as_bytes();

    out.push(r.is_dir as u8);
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(path.len() as u16).to_le_bytes());
    out.extend_from_slice(&(parent.len() as u16).to_le_bytes());
    out.push(ext.len() as u8);
    out.extend_from_slice(&r.size.to_le_bytes());
    out.extend_from_slice(&r.mtime.to_le_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(path);
    out.extend_from_slice(parent);
    out.extend_from_slice(ext);
}

/// Decode as many whole records as fit in `buf`. A short trailing fragment
/// silently terminates decoding rather than erroring — the caller gets the
/// records it can.
pub fn decode(buf: &[u8]) -> Vec<FileRecord> {
    let mut out = Vec::new();
    let mut offset = 0usize;

    while offset + HEADER_LEN <= buf.len() {
        let is_dir = buf[offset] != 0;
        let name_len = u16::from_le_bytes(buf[offset + 1..offset + 3].try_into().unwrap()) as usize;
        let path_len = u16::from_le_bytes(buf[offset + 3..offset + 5].try_into().unwrap()) as usize;
        let parent_len = u16::from_le_bytes(buf[offset + 5..offset + 7].try_into().unwrap()) as usize;
        let ext_len = buf[offset + 7] as usize;
        let size = u64::from_le_bytes(buf[offset + 8..offset + 16].try_into().unwrap());
        let mtime = f64::from_le_bytes(buf[offset + 16..offset + 24].try_into().unwrap());

        let body_len = name_len + path_len + parent_len + ext_len;
        let body_start = offset + HEADER_LEN;
        if body_start + body_len > buf.len() {
            break;
        }

        let name = String::from_utf8_lossy(&buf[body_start..body_start + name_len]).into_owned();
        let mut p = body_start + name_len;
        let path = String::from_utf8_lossy(&buf[p..p + path_len]).into_owned();
        p += path_len;
        let parent = String::from_utf8_lossy(&buf[p..p + parent_len]).into_owned();
        p += parent_len;
        let ext = String::from_utf8_lossy(&buf[p..p + ext_len]).into_owned();

        out.push(FileRecord {
            filename_lower: name.to_lowercase(),
            filename: name,
            full_path: path,
            parent_dir: parent,
            extension: ext,
            size,
            mtime,
            is_dir,
        });

        offset = body_start + body_len;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<FileRecord> {
        vec![
            FileRecord::new_dir("sub", "D:\\t\\sub".into(), "D:\\t".into(), 0.0),
            FileRecord::new_file("a.txt", "D:\\t\\a.txt".into(), "D:\\t".into(), 3, 1700000000.0),
            FileRecord::new_dir("empty_ext_dir", "D:\\t\\empty_ext_dir".into(), "D:\\t".into(), 5.0),
        ]
    }

    #[test]
    fn round_trip() {
        let records = sample();
        let encoded = encode(&records);
        let decoded = decode(&encoded);
        assert_eq!(records, decoded);
    }

    #[test]
    fn empty_sequence_round_trips() {
        assert!(decode(&encode(&[])).is_empty());
    }

    #[test]
    fn truncated_buffer_yields_prefix() {
        let records = sample();
        let encoded = encode(&records);
        // Cut off partway through the last record's variable-length body.
        let truncated = &encoded[..encoded.len() - 2];
        let decoded = decode(truncated);
        assert_eq!(decoded.len(), records.len() - 1);
        assert_eq!(decoded, &records[..records.len() - 1]);
    }

    #[test]
    fn truncated_header_yields_nothing_more() {
        let records = sample();
        let encoded = encode(&records);
        let only_first = &encoded[..HEADER_LEN + 3];
        let decoded = decode(only_first);
        assert!(decoded.is_empty());
    }
}
