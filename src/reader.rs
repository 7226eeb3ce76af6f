//! Iterator over the fixed-size logical records of a SEED volume.
//!
//! Use [`RecordReader`] to walk the records of an in-memory volume without
//! interpreting their blockettes. Each record starts with an 8-byte header:
//! a 6-digit sequence number, a record type (`V`, `A`, `S`, `T`, or a data
//! quality code) and a continuation flag (`*` or space).

use log::trace;

use crate::blockette::HEADER_LEN;
use crate::{MetadataError, Result};

/// Size of the sequence/type/continuation header of every logical record.
pub const RECORD_HEADER_LEN: usize = 8;

/// One logical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalRecord<'a> {
    pub sequence: u32,
    pub record_type: char,
    /// True when the record continues a blockette from the previous record.
    pub continuation: bool,
    /// Byte offset of the record within the volume.
    pub offset: usize,
    /// Record contents after the 8-byte header.
    pub data: &'a [u8],
}

impl LogicalRecord<'_> {
    /// True for the metadata record types of a dataless volume.
    pub fn is_control(&self) -> bool {
        matches!(self.record_type, 'V' | 'A' | 'S' | 'T')
    }
}

/// Iterator over the logical records in a byte slice.
///
/// A damaged record header yields an error for that record only; iteration
/// continues with the next record. A trailing partial record yields an
/// error and ends the iteration.
///
/// # Example
///
/// ```
/// use stationmeta_rs::reader::RecordReader;
///
/// let mut data = b"000001V 010001802.408~~".to_vec();
/// data.resize(256, b' ');
/// data.extend_from_slice(b"000002A ");
/// data.resize(512, b' ');
///
/// let records: Vec<_> = RecordReader::new(&data, 256)
///     .collect::<Result<Vec<_>, _>>()
///     .unwrap();
/// assert_eq!(records.len(), 2);
/// assert_eq!(records[1].record_type, 'A');
/// ```
pub struct RecordReader<'a> {
    data: &'a [u8],
    offset: usize,
    record_length: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8], record_length: usize) -> Self {
        Self {
            data,
            offset: 0,
            record_length,
        }
    }

    pub fn record_length(&self) -> usize {
        self.record_length
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<LogicalRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.offset >= self.data.len() {
                return None;
            }
            let offset = self.offset;
            let remaining = &self.data[offset..];
            let index = (offset / self.record_length) as u32 + 1;

            if remaining.len() < self.record_length {
                self.offset = self.data.len();
                if remaining.iter().all(|&b| b == b' ' || b == 0) {
                    return None;
                }
                return Some(Err(MetadataError::MalformedRecord {
                    record: index,
                    offset,
                    reason: format!(
                        "partial record of {} bytes at end of volume",
                        remaining.len()
                    ),
                }));
            }

            let raw = &remaining[..self.record_length];
            self.offset += self.record_length;

            // Blank filler records carry nothing.
            if raw.iter().all(|&b| b == b' ' || b == 0) {
                trace!("skipping blank record at offset {offset}");
                continue;
            }
            return Some(parse_header(raw, index, offset));
        }
    }
}

fn parse_header(raw: &[u8], index: u32, offset: usize) -> Result<LogicalRecord<'_>> {
    let malformed = |reason: String| MetadataError::MalformedRecord {
        record: index,
        offset,
        reason,
    };
    let digits = &raw[..6];
    let sequence: u32 = std::str::from_utf8(digits)
        .ok()
        .map(str::trim)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            malformed(format!(
                "invalid sequence number {:?}",
                String::from_utf8_lossy(digits)
            ))
        })?;
    let record_type = raw[6] as char;
    if !record_type.is_ascii_alphabetic() {
        return Err(malformed(format!("invalid record type {record_type:?}")));
    }
    let continuation = match raw[7] {
        b'*' => true,
        b' ' => false,
        other => {
            return Err(malformed(format!(
                "invalid continuation flag {:?}",
                other as char
            )));
        }
    };
    Ok(LogicalRecord {
        sequence,
        record_type,
        continuation,
        offset,
        data: &raw[RECORD_HEADER_LEN..],
    })
}

/// Read the logical record length from the volume header (blockette 005,
/// 008 or 010) at the start of the first record.
pub fn detect_record_length(data: &[u8]) -> Result<usize> {
    let malformed = |reason: &str| MetadataError::MalformedRecord {
        record: 1,
        offset: 0,
        reason: reason.into(),
    };
    // Header, blockette type/length, 4-byte version field, 2-digit exponent.
    let at = RECORD_HEADER_LEN + HEADER_LEN + 4;
    if data.len() < at + 2 || data[6] != b'V' {
        return Err(malformed("volume does not start with a volume header record"));
    }
    match &data[RECORD_HEADER_LEN..RECORD_HEADER_LEN + 3] {
        b"005" | b"008" | b"010" => {}
        _ => return Err(malformed("first blockette is not a volume header")),
    }
    let exponent: u32 = std::str::from_utf8(&data[at..at + 2])
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| malformed("invalid logical record length exponent"))?;
    if !(8..=15).contains(&exponent) {
        return Err(malformed("logical record length out of range"));
    }
    Ok(1usize << exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: u32, kind: char, continuation: bool, body: &str, len: usize) -> Vec<u8> {
        let flag = if continuation { '*' } else { ' ' };
        let mut out = format!("{sequence:06}{kind}{flag}{body}").into_bytes();
        out.resize(len, b' ');
        out
    }

    #[test]
    fn test_detect_record_length() {
        let data = record(1, 'V', false, "010001802.412~~", 4096);
        assert_eq!(detect_record_length(&data).unwrap(), 4096);
        let bad = record(1, 'S', false, "0500010", 256);
        assert!(detect_record_length(&bad).is_err());
    }

    #[test]
    fn test_reader_multiple_records() {
        let mut data = record(1, 'V', false, "", 256);
        data.extend(record(2, 'A', false, "", 256));
        data.extend(record(3, 'S', true, "", 256));
        let records: Vec<_> = RecordReader::new(&data, 256)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].sequence, 3);
        assert!(records[2].continuation);
        assert_eq!(records[2].offset, 512);
        assert_eq!(records[2].data.len(), 248);
    }

    #[test]
    fn test_bad_header_does_not_stop_iteration() {
        let mut data = record(1, 'V', false, "", 256);
        let mut bad = record(2, 'S', false, "", 256);
        bad[0] = b'X';
        data.extend(bad);
        data.extend(record(3, 'S', false, "", 256));
        let results: Vec<_> = RecordReader::new(&data, 256).collect();
        assert_eq!(results.len(), 3);
        match &results[1] {
            Err(MetadataError::MalformedRecord { record, offset, .. }) => {
                assert_eq!(*record, 2);
                assert_eq!(*offset, 256);
            }
            other => panic!("expected malformed record, got {other:?}"),
        }
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_blank_and_partial_records() {
        let mut data = record(1, 'V', false, "", 256);
        data.extend(vec![b' '; 256]);
        data.extend(b"000003S ".iter());
        let results: Vec<_> = RecordReader::new(&data, 256).collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn test_reader_empty_data() {
        assert_eq!(RecordReader::new(&[], 4096).count(), 0);
    }
}
