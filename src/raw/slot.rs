use std::sync::atomic::AtomicU64;

/// The key word reserved for an empty key cell.
pub const NO_KEY: u64 = 0;

/// The largest value that may be stored in the map.
///
/// Values occupy the low 63 bits of the value cell. The top bit is the migrating
/// tag and the two extreme payloads are reserved for the empty and tombstone states.
pub const MAX_VALUE: u64 = TOMBSTONE - 1;

/// The value cell does not contain a value.
pub const EMPTY: u64 = 0;

/// The value was deleted.
pub const TOMBSTONE: u64 = MIGRATING - 1;

/// The value is being relocated to the successor generation.
///
/// Writers that observe this bit must help finish the relocation and retry in
/// the successor. The bit is OR-ed over the current payload.
pub const MIGRATING: u64 = 1 << 63;

/// The value now lives in the successor generation, along with the key handle.
pub const RELOCATED: u64 = MIGRATING | EMPTY;

/// Nothing was copied, the value was deleted or the cell was still empty when
/// the migration reached it.
///
/// A key installed in a sealed cell must be inserted in the successor instead.
/// Either way, the key handle stays owned by this generation.
pub const RELOCATED_TOMBSTONE: u64 = MIGRATING | TOMBSTONE;

/// Returns `true` if `value` can be stored in the map.
#[inline]
pub const fn is_valid_value(value: u64) -> bool {
    value != EMPTY && value <= MAX_VALUE
}

// A key and value pair in a generation.
//
// The key cell moves from `NO_KEY` to a key exactly once and is never cleared,
// deletions are expressed through the value cell alone so that probe sequences
// passing through the slot stay intact.
#[repr(C)]
#[derive(Default)]
pub struct Slot {
    pub key: AtomicU64,
    pub value: AtomicU64,
}

/// The decoded state of a value cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value {
    /// No value was ever written.
    Empty,

    /// A live value.
    Present(u64),

    /// The value was deleted.
    Tombstone,

    /// The live value is being copied to the successor.
    Migrating(u64),

    /// The slot is no longer authoritative, look in the successor.
    Relocated,

    /// The slot was deleted when the migration reached it.
    RelocatedTombstone,
}

impl Value {
    /// Decode a raw value word.
    #[inline]
    pub fn decode(raw: u64) -> Value {
        match raw {
            EMPTY => Value::Empty,
            TOMBSTONE => Value::Tombstone,
            RELOCATED => Value::Relocated,
            RELOCATED_TOMBSTONE => Value::RelocatedTombstone,
            _ if raw & MIGRATING != 0 => Value::Migrating(raw & !MIGRATING),
            _ => Value::Present(raw),
        }
    }

    /// Returns `true` if no further writes can happen to this cell.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Value::Relocated | Value::RelocatedTombstone)
    }

    /// Returns `true` if the migrating tag is set, terminal or not.
    #[inline]
    pub fn is_tagged(self) -> bool {
        matches!(
            self,
            Value::Migrating(_) | Value::Relocated | Value::RelocatedTombstone
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode() {
        assert_eq!(Value::decode(0), Value::Empty);
        assert_eq!(Value::decode(7), Value::Present(7));
        assert_eq!(Value::decode(MAX_VALUE), Value::Present(MAX_VALUE));
        assert_eq!(Value::decode(TOMBSTONE), Value::Tombstone);
        assert_eq!(Value::decode(7 | MIGRATING), Value::Migrating(7));
        assert_eq!(Value::decode(RELOCATED), Value::Relocated);
        assert_eq!(Value::decode(TOMBSTONE | MIGRATING), Value::RelocatedTombstone);
    }

    #[test]
    fn tagging() {
        // Tagging a tombstone immediately yields a terminal state.
        assert!(Value::decode(TOMBSTONE | MIGRATING).is_terminal());
        assert!(!Value::decode(42 | MIGRATING).is_terminal());
        assert!(Value::decode(42 | MIGRATING).is_tagged());
        assert!(!Value::decode(42).is_tagged());
    }

    #[test]
    fn reserved_values() {
        assert!(!is_valid_value(EMPTY));
        assert!(!is_valid_value(TOMBSTONE));
        assert!(!is_valid_value(RELOCATED));
        assert!(!is_valid_value(u64::MAX));
        assert!(is_valid_value(1));
        assert!(is_valid_value(MAX_VALUE));
    }
}
