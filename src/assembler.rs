//! Reassembly of blockettes that span logical records.
//!
//! Record boundaries are a storage artifact: a blockette, or even its
//! 7-byte header, may continue in the next record of the same stream (the
//! next record then carries the `*` continuation flag). The
//! [`BlocketteAssembler`] consumes records one at a time and emits whole
//! blockettes, keeping only the partial blockette in progress.

use log::{debug, trace};

use crate::blockette::HEADER_LEN;
use crate::reader::{LogicalRecord, RECORD_HEADER_LEN};

/// A complete blockette as found in the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlockette {
    pub blockette_type: u16,
    /// Sequence number of the record the blockette starts in.
    pub record: u32,
    pub record_type: char,
    /// Byte offset of that record within the volume.
    pub record_offset: usize,
    /// Byte offset of the blockette header within the volume.
    pub offset: usize,
    /// Blockette contents after the 7-byte header.
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyEvent {
    Blockette(RawBlockette),
    /// Bytes that cannot be framed as blockettes. Everything up to the next
    /// plausible blockette header is skipped.
    Damaged {
        record: u32,
        offset: usize,
        /// Type of the damaged blockette, when its type digits are readable.
        blockette_type: Option<u16>,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct Start {
    record: u32,
    record_type: char,
    record_offset: usize,
    offset: usize,
}

/// Record-by-record blockette reassembly state machine.
#[derive(Debug, Default)]
pub struct BlocketteAssembler {
    pending: Vec<u8>,
    /// Total length of the pending blockette once its header is complete.
    expected: usize,
    start: Option<Start>,
    resync: bool,
}

/// Parse a `TTTLLLL` blockette header.
pub fn parse_blockette_header(header: &[u8]) -> Option<(u16, usize)> {
    if header.len() < HEADER_LEN || !header[..HEADER_LEN].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let text = std::str::from_utf8(&header[..HEADER_LEN]).ok()?;
    let blockette_type = text[..3].parse().ok()?;
    let length = text[3..].parse().ok()?;
    Some((blockette_type, length))
}

/// Blockette types defined for SEED control headers.
fn is_known_type(blockette_type: u16) -> bool {
    matches!(blockette_type, 5 | 8 | 10..=12 | 30..=35 | 41..=48 | 50..=62 | 70..=74)
}

fn header_type(bytes: &[u8]) -> Option<u16> {
    let digits = bytes.get(..3)?;
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn is_plausible_header(bytes: &[u8]) -> bool {
    parse_blockette_header(bytes).is_some_and(|(t, length)| is_known_type(t) && length >= HEADER_LEN)
}

/// Whether a blockette plausibly starts at `pos`: a known type and length,
/// followed by padding or another plausible header when it ends inside the
/// record.
fn is_plausible_start(data: &[u8], pos: usize) -> bool {
    let Some((blockette_type, length)) = parse_blockette_header(&data[pos..]) else {
        return false;
    };
    if !is_known_type(blockette_type) || length < HEADER_LEN {
        return false;
    }
    let end = pos + length;
    if end >= data.len() {
        return true;
    }
    let rest = &data[end..];
    matches!(rest[0], b' ' | 0)
        || is_plausible_header(rest)
        || (rest.len() < HEADER_LEN && rest.iter().all(u8::is_ascii_digit))
}

/// Offset of the next plausible blockette header at or after `from`.
fn find_header(data: &[u8], from: usize) -> Option<usize> {
    (from..data.len()).find(|&pos| is_plausible_start(data, pos))
}

impl BlocketteAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.expected = 0;
        self.start = None;
    }

    fn damaged_pending(&self, reason: &str) -> AssemblyEvent {
        let (record, offset) = self
            .start
            .map_or((0, 0), |s| (s.record, s.record_offset));
        AssemblyEvent::Damaged {
            record,
            offset,
            blockette_type: header_type(&self.pending),
            reason: reason.into(),
        }
    }

    /// Feed one record and return the events it completes.
    pub fn push(&mut self, record: &LogicalRecord<'_>) -> Vec<AssemblyEvent> {
        let mut events = Vec::new();
        if !record.continuation {
            if !self.pending.is_empty() {
                events.push(self.damaged_pending("blockette cut short by the start of a new record"));
                self.reset();
            }
            self.resync = false;
        }

        let data = record.data;
        let mut pos = 0;
        if self.resync {
            match find_header(data, 0) {
                Some(at) => {
                    trace!("resynchronized at byte {at} of record {}", record.sequence);
                    self.resync = false;
                    pos = at;
                }
                None => {
                    trace!("no blockette header in continuation record {}", record.sequence);
                    return events;
                }
            }
        }
        while pos < data.len() {
            if self.pending.is_empty() {
                // A blank where a blockette type should start pads the record.
                if data[pos] == b' ' || data[pos] == 0 {
                    break;
                }
                self.start = Some(Start {
                    record: record.sequence,
                    record_type: record.record_type,
                    record_offset: record.offset,
                    offset: record.offset + RECORD_HEADER_LEN + pos,
                });
            }
            if self.expected == 0 {
                let take = (HEADER_LEN - self.pending.len()).min(data.len() - pos);
                self.pending.extend_from_slice(&data[pos..pos + take]);
                pos += take;
                if self.pending.len() < HEADER_LEN {
                    break;
                }
                match parse_blockette_header(&self.pending) {
                    Some((_, length)) if length >= HEADER_LEN => self.expected = length,
                    _ => {
                        let at = self.start.map_or(0, |s| s.offset);
                        events.push(AssemblyEvent::Damaged {
                            record: record.sequence,
                            offset: record.offset,
                            blockette_type: header_type(&self.pending),
                            reason: format!(
                                "invalid blockette header {:?} at byte {at}",
                                String::from_utf8_lossy(&self.pending)
                            ),
                        });
                        self.reset();
                        // Scan from just past the first byte of the bad header.
                        match find_header(data, (pos + 1).saturating_sub(HEADER_LEN)) {
                            Some(next) => {
                                debug!(
                                    "lost framing in record {}, resuming at byte {next}",
                                    record.sequence
                                );
                                pos = next;
                                continue;
                            }
                            None => {
                                debug!(
                                    "lost framing in record {}, resynchronizing",
                                    record.sequence
                                );
                                self.resync = true;
                                return events;
                            }
                        }
                    }
                }
            }
            let take = (self.expected - self.pending.len()).min(data.len() - pos);
            self.pending.extend_from_slice(&data[pos..pos + take]);
            pos += take;
            if self.pending.len() == self.expected {
                if let Some(blockette) = self.complete() {
                    events.push(AssemblyEvent::Blockette(blockette));
                }
            }
        }
        events
    }

    fn complete(&mut self) -> Option<RawBlockette> {
        let (blockette_type, _) = parse_blockette_header(&self.pending)?;
        let start = self.start?;
        let body = self.pending.split_off(HEADER_LEN);
        self.reset();
        Some(RawBlockette {
            blockette_type,
            record: start.record,
            record_type: start.record_type,
            record_offset: start.record_offset,
            offset: start.offset,
            body,
        })
    }

    /// Drop the blockette in progress after an unreadable record. The next
    /// record is scanned for a plausible blockette header.
    pub fn interrupt(&mut self) {
        self.reset();
        self.resync = true;
    }

    /// Flush at end of volume; a blockette still in progress is damaged.
    pub fn finish(self) -> Option<AssemblyEvent> {
        (!self.pending.is_empty()).then(|| self.damaged_pending("volume ends inside a blockette"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(sequence: u32, continuation: bool, data: &[u8]) -> LogicalRecord<'_> {
        LogicalRecord {
            sequence,
            record_type: 'S',
            continuation,
            offset: (sequence as usize - 1) * 64,
            data,
        }
    }

    fn bodies(events: &[AssemblyEvent]) -> Vec<(u16, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                AssemblyEvent::Blockette(b) => {
                    Some((b.blockette_type, String::from_utf8_lossy(&b.body).into_owned()))
                }
                AssemblyEvent::Damaged { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_blockettes_in_one_record() {
        let mut asm = BlocketteAssembler::new();
        let events = asm.push(&rec(1, false, b"0510010abc0590009xy   "));
        assert_eq!(
            bodies(&events),
            vec![(51, "abc".to_string()), (59, "xy".to_string())]
        );
        assert!(asm.finish().is_none());
    }

    #[test]
    fn test_blockette_spanning_records() {
        let mut asm = BlocketteAssembler::new();
        assert!(asm.push(&rec(1, false, b"0520015abcd")).is_empty());
        let events = asm.push(&rec(2, true, b"efgh0510008z  "));
        assert_eq!(
            bodies(&events),
            vec![(52, "abcdefgh".to_string()), (51, "z".to_string())]
        );
        match &events[0] {
            AssemblyEvent::Blockette(b) => assert_eq!(b.record, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_header_spanning_records() {
        let mut asm = BlocketteAssembler::new();
        assert!(asm.push(&rec(1, false, b"052")).is_empty());
        let events = asm.push(&rec(2, true, b"0009ab"));
        assert_eq!(bodies(&events), vec![(52, "ab".to_string())]);
    }

    #[test]
    fn test_bad_header_resumes_within_the_record() {
        let mut asm = BlocketteAssembler::new();
        let events = asm.push(&rec(1, false, b"0500009ab#junk0510008z  "));
        assert_eq!(
            bodies(&events),
            vec![(50, "ab".to_string()), (51, "z".to_string())]
        );
        assert!(matches!(
            events[1],
            AssemblyEvent::Damaged {
                record: 1,
                offset: 0,
                blockette_type: None,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_length_keeps_the_type() {
        let mut asm = BlocketteAssembler::new();
        let events = asm.push(&rec(1, false, b"05200x9abc0510008z"));
        assert!(matches!(
            events[0],
            AssemblyEvent::Damaged {
                blockette_type: Some(52),
                ..
            }
        ));
        assert_eq!(bodies(&events), vec![(51, "z".to_string())]);
    }

    #[test]
    fn test_bad_header_resyncs_in_continuation_record() {
        let mut asm = BlocketteAssembler::new();
        let events = asm.push(&rec(1, false, b"0500009ab#garbage"));
        assert_eq!(bodies(&events), vec![(50, "ab".to_string())]);
        assert!(matches!(
            events[1],
            AssemblyEvent::Damaged { record: 1, offset: 0, .. }
        ));
        // Leftover bytes of the damaged blockette are skipped.
        let events = asm.push(&rec(2, true, b"xyz0510008z   "));
        assert_eq!(bodies(&events), vec![(51, "z".to_string())]);
        let events = asm.push(&rec(3, false, b"0500008q"));
        assert_eq!(bodies(&events), vec![(50, "q".to_string())]);
    }

    #[test]
    fn test_continuation_without_header_is_skipped() {
        let mut asm = BlocketteAssembler::new();
        asm.interrupt();
        assert!(asm.push(&rec(2, true, b"tail of a lost blockette")).is_empty());
        let events = asm.push(&rec(3, false, b"0500008q"));
        assert_eq!(bodies(&events), vec![(50, "q".to_string())]);
    }

    #[test]
    fn test_plausible_start() {
        assert!(is_plausible_start(b"0510008z0590009xy", 0));
        assert!(is_plausible_start(b"0510008z   ", 0));
        assert!(is_plausible_start(b"0520100abc", 0));
        // Unknown type, short length or a garbage successor.
        assert!(!is_plausible_start(b"9990008z   ", 0));
        assert!(!is_plausible_start(b"0510003z   ", 0));
        assert!(!is_plausible_start(b"0510008zQQQQQQQQ", 0));
    }

    #[test]
    fn test_cut_short_blockette() {
        let mut asm = BlocketteAssembler::new();
        asm.push(&rec(1, false, b"0520050abc"));
        let events = asm.push(&rec(2, false, b"0500008q"));
        assert!(matches!(events[0], AssemblyEvent::Damaged { record: 1, .. }));
        assert_eq!(bodies(&events), vec![(50, "q".to_string())]);

        asm.push(&rec(3, false, b"0520050abc"));
        assert!(matches!(
            asm.finish(),
            Some(AssemblyEvent::Damaged { record: 3, .. })
        ));
    }
}
