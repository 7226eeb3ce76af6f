//! Original text of decoded nodes.
//!
//! A decoder records, for the document and for each network, station and
//! channel, where the node came from in the input. After decoding it seals
//! each record with a fingerprint of the node's canonical encoding. A
//! writer that finds a node's current canonical encoding still matching the
//! fingerprint writes the original text instead, so dates, number
//! formatting, indentation and SEED dictionary references of unchanged
//! nodes survive a load and save in the same format.

use std::hash::{DefaultHasher, Hasher};
use std::ops::Range;
use std::sync::Arc;

use crate::types::Format;

/// Hash of a canonical encoding.
pub(crate) fn fingerprint(canonical: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(canonical);
    hasher.finish()
}

#[derive(Debug, Clone)]
struct Origin {
    format: Format,
    data: Arc<[u8]>,
    /// The whole node, from the start of its first line.
    whole: Range<usize>,
    /// Own content before the first child node and after the last one,
    /// when the children are contiguous.
    head: Option<Range<usize>>,
    tail: Option<Range<usize>>,
    /// Fingerprints of the canonical encoding with and without children.
    whole_print: Option<u64>,
    own_print: Option<u64>,
}

/// Where a node was read from. Never takes part in equality.
#[derive(Debug, Clone, Default)]
pub(crate) struct SourceText(Option<Origin>);

impl PartialEq for SourceText {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl SourceText {
    pub(crate) fn new(format: Format, data: Arc<[u8]>, whole: Range<usize>) -> Self {
        Self(Some(Origin {
            format,
            data,
            whole,
            head: None,
            tail: None,
            whole_print: None,
            own_print: None,
        }))
    }

    pub(crate) fn with_children(mut self, head: Range<usize>, tail: Range<usize>) -> Self {
        if let Some(origin) = &mut self.0 {
            origin.head = Some(head);
            origin.tail = Some(tail);
        }
        self
    }

    pub(crate) fn is_from(&self, format: Format) -> bool {
        self.0.as_ref().is_some_and(|o| o.format == format)
    }

    /// Record the canonical encodings the original text stands for.
    pub(crate) fn seal(&mut self, whole: &[u8], own: Option<&[u8]>) {
        if let Some(origin) = &mut self.0 {
            origin.whole_print = Some(fingerprint(whole));
            origin.own_print = own.map(fingerprint);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.0 = None;
    }

    /// Original text of the whole node if `canonical` is what it decoded to.
    pub(crate) fn whole(&self, canonical: &[u8]) -> Option<&[u8]> {
        let origin = self.0.as_ref()?;
        if origin.whole_print? != fingerprint(canonical) {
            return None;
        }
        origin.data.get(origin.whole.clone())
    }

    /// Original head and tail around the children if the node's own
    /// canonical encoding is unchanged.
    pub(crate) fn around_children(&self, own: &[u8]) -> Option<(&[u8], &[u8])> {
        let origin = self.0.as_ref()?;
        if origin.own_print? != fingerprint(own) {
            return None;
        }
        let head = origin.data.get(origin.head.clone()?)?;
        let tail = origin.data.get(origin.tail.clone()?)?;
        Some((head, tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(text: &str) -> SourceText {
        let data: Arc<[u8]> = Arc::from(text.as_bytes());
        SourceText::new(Format::StationXml, data, 0..text.len())
    }

    #[test]
    fn test_whole_needs_matching_fingerprint() {
        let mut s = source("<A>1.000</A>");
        assert_eq!(s.whole(b"<A>1.0</A>"), None);
        s.seal(b"<A>1.0</A>", None);
        assert_eq!(s.whole(b"<A>1.0</A>"), Some(&b"<A>1.000</A>"[..]));
        assert_eq!(s.whole(b"<A>2.0</A>"), None);
        assert!(s.is_from(Format::StationXml));
        assert!(!s.is_from(Format::Seed));
    }

    #[test]
    fn test_around_children() {
        let text = "<A>\n  <B/>\n</A>";
        let mut s = source(text).with_children(0..4, 10..15);
        s.seal(b"whole", Some(b"own"));
        assert_eq!(s.around_children(b"changed"), None);
        let (head, tail) = s.around_children(b"own").unwrap();
        assert_eq!(head, b"<A>\n");
        assert_eq!(tail, b"</A>");
    }

    #[test]
    fn test_never_affects_equality() {
        let mut cleared = source("<A/>");
        cleared.clear();
        assert_eq!(source("<A/>"), SourceText::default());
        assert_eq!(cleared, source("<B/>"));
    }
}
