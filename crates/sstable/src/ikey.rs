//! Internal keys: a user key plus an eight-byte trailer packing the sequence
//! number and entry kind.
//!
//! ```text
//! [user key][(sequence << 8) | kind : u64 LE]
//! ```
//!
//! Internal keys order by user key ascending, then by trailer **descending**,
//! so the newest version of a key is encountered first when scanning forward.

use std::cmp::Ordering;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::cmp::KeyComparator;
use crate::error::{Error, Result};

pub type SequenceNumber = u64;

/// Sequence numbers occupy 56 bits; the low byte of the trailer is the kind.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

const TRAILER_LENGTH: usize = 8;

/// What an entry means for its user key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    /// A tombstone: the key was deleted at this sequence.
    Deletion = 0,
    /// A live value.
    Value = 1,
}

impl EntryKind {
    pub fn from_tag(tag: u8) -> Result<EntryKind> {
        match tag {
            0 => Ok(EntryKind::Deletion),
            1 => Ok(EntryKind::Value),
            _ => Err(Error::corruption(format!("unknown entry kind {tag}"))),
        }
    }
}

/// Packs a sequence number and kind into the trailer word.
#[must_use]
pub fn pack_trailer(seq: SequenceNumber, kind: EntryKind) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER);
    (seq << 8) | kind as u64
}

/// Appends the encoding of `(user_key, seq, kind)` to `dst`.
pub fn append_internal_key(dst: &mut Vec<u8>, user_key: &[u8], seq: SequenceNumber, kind: EntryKind) {
    dst.extend_from_slice(user_key);
    let mut trailer = [0u8; TRAILER_LENGTH];
    LittleEndian::write_u64(&mut trailer, pack_trailer(seq, kind));
    dst.extend_from_slice(&trailer);
}

/// Encodes `(user_key, seq, kind)` as a fresh internal key.
#[must_use]
pub fn encode_internal_key(user_key: &[u8], seq: SequenceNumber, kind: EntryKind) -> Vec<u8> {
    let mut dst = Vec::with_capacity(user_key.len() + TRAILER_LENGTH);
    append_internal_key(&mut dst, user_key, seq, kind);
    dst
}

/// The user-key portion of an encoded internal key.
#[must_use]
pub fn user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= TRAILER_LENGTH);
    &internal_key[..internal_key.len() - TRAILER_LENGTH]
}

/// The packed trailer of an encoded internal key.
#[must_use]
pub fn trailer(internal_key: &[u8]) -> u64 {
    debug_assert!(internal_key.len() >= TRAILER_LENGTH);
    LittleEndian::read_u64(&internal_key[internal_key.len() - TRAILER_LENGTH..])
}

/// Splits an encoded internal key into its parts.
pub fn decode_internal_key(internal_key: &[u8]) -> Result<(&[u8], SequenceNumber, EntryKind)> {
    if internal_key.len() < TRAILER_LENGTH {
        return Err(Error::corruption("internal key shorter than its trailer"));
    }
    let word = trailer(internal_key);
    let kind = EntryKind::from_tag((word & 0xff) as u8)?;
    Ok((user_key(internal_key), word >> 8, kind))
}

/// Orders encoded internal keys: user key ascending (per the wrapped user
/// comparator), then trailer descending so newer entries sort first.
pub struct InternalKeyComparator {
    user: Arc<dyn KeyComparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn KeyComparator>) -> Self {
        Self { user }
    }

    pub fn user_comparator(&self) -> &Arc<dyn KeyComparator> {
        &self.user
    }
}

impl KeyComparator for InternalKeyComparator {
    fn name(&self) -> &'static str {
        "shoal.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.user.compare(user_key(a), user_key(b)) {
            Ordering::Equal => trailer(b).cmp(&trailer(a)),
            ordering => ordering,
        }
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        let user_start = user_key(start);
        let user_limit = user_key(limit);
        let tmp = self.user.find_shortest_separator(user_start, user_limit);
        if tmp.len() < user_start.len()
            && self.user.compare(user_start, &tmp) == Ordering::Less
        {
            // The user key shrank: tack on the maximum trailer so the result
            // still sorts before every entry of the shortened key.
            let mut separator = tmp;
            let mut word = [0u8; TRAILER_LENGTH];
            LittleEndian::write_u64(
                &mut word,
                pack_trailer(MAX_SEQUENCE_NUMBER, EntryKind::Value),
            );
            separator.extend_from_slice(&word);
            debug_assert_eq!(self.compare(start, &separator), Ordering::Less);
            debug_assert_eq!(self.compare(&separator, limit), Ordering::Less);
            return separator;
        }
        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        let user = user_key(key);
        let tmp = self.user.find_short_successor(user);
        if tmp.len() < user.len() && self.user.compare(user, &tmp) == Ordering::Less {
            let mut successor = tmp;
            let mut word = [0u8; TRAILER_LENGTH];
            LittleEndian::write_u64(
                &mut word,
                pack_trailer(MAX_SEQUENCE_NUMBER, EntryKind::Value),
            );
            successor.extend_from_slice(&word);
            debug_assert_eq!(self.compare(key, &successor), Ordering::Less);
            return successor;
        }
        key.to_vec()
    }
}
