//! Bit-level operations on 16-bit register words
//!
//! The PLC packs every actuator command and sensor state into single bits of
//! its I/O words, so all higher layers manipulate registers through these
//! helpers. Callers that combine several edits (e.g. clearing one stroke
//! command while setting the opposite one) chain them on the same word before
//! writing it back, which keeps the update a single bus exchange.

/// Test single bit of a register word
#[inline]
pub fn test_bit_u16(word: u16, bit_index: u8) -> bool {
    debug_assert!(bit_index < 16, "Bit index out of range: {}", bit_index);
    (word & (1 << bit_index)) != 0
}

/// Return the word with the given bit set
#[inline]
pub fn set_bit_u16(word: u16, bit_index: u8) -> u16 {
    debug_assert!(bit_index < 16, "Bit index out of range: {}", bit_index);
    word | (1 << bit_index)
}

/// Return the word with the given bit cleared
#[inline]
pub fn clear_bit_u16(word: u16, bit_index: u8) -> u16 {
    debug_assert!(bit_index < 16, "Bit index out of range: {}", bit_index);
    word & !(1 << bit_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_bit_u16() {
        let word = 0b1010_1100u16;
        assert!(!test_bit_u16(word, 0));
        assert!(test_bit_u16(word, 2));
        assert!(test_bit_u16(word, 3));
        assert!(!test_bit_u16(word, 4));
        assert!(test_bit_u16(word, 7));
    }

    #[test]
    fn test_set_bit_u16() {
        assert_eq!(set_bit_u16(0, 0), 1);
        assert_eq!(set_bit_u16(0, 7), 0b1000_0000);
        // Setting an already-set bit is a no-op
        assert_eq!(set_bit_u16(0b1000_0000, 7), 0b1000_0000);
        assert_eq!(set_bit_u16(0xFFFF, 3), 0xFFFF);
    }

    #[test]
    fn test_clear_bit_u16() {
        assert_eq!(clear_bit_u16(1, 0), 0);
        assert_eq!(clear_bit_u16(0b1000_0001, 7), 1);
        // Clearing an already-clear bit is a no-op
        assert_eq!(clear_bit_u16(0, 5), 0);
        assert_eq!(clear_bit_u16(0xFFFF, 0), 0xFFFE);
    }

    #[test]
    fn test_chained_edits_single_word() {
        // Opposite stroke commands swap within one word
        let word = set_bit_u16(0, 2);
        let word = set_bit_u16(clear_bit_u16(word, 2), 3);
        assert!(!test_bit_u16(word, 2));
        assert!(test_bit_u16(word, 3));
    }
}
