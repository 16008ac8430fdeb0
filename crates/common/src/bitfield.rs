use crate::Word;

/// A contiguous range of bits inside a [`Word`], used to pack and unpack
/// instruction fields. Bit 0 is the low-order bit, bit 31 the high-order bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    from_bit: u32,
    to_bit: u32,
    width: u32,
    mask: Word,
    shifted_mask: Word,
}

impl BitField {
    /// Panics unless `from_bit <= to_bit <= 31`.
    pub const fn new(from_bit: u32, to_bit: u32) -> Self {
        assert!(from_bit <= to_bit, "bit field must not be reversed");
        assert!(to_bit < Word::BITS, "bit field must fit in a word");

        let width = to_bit - from_bit + 1;
        let mask = ((1u64 << width) - 1) as Word;

        Self {
            from_bit,
            to_bit,
            width,
            mask,
            shifted_mask: mask << from_bit,
        }
    }

    pub const fn from_bit(&self) -> u32 {
        self.from_bit
    }

    pub const fn to_bit(&self) -> u32 {
        self.to_bit
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    /// The right-justified mask, `width` one bits.
    pub const fn mask(&self) -> Word {
        self.mask
    }

    /// Returns `word` with this field replaced by the low `width` bits of
    /// `value`. Higher bits of `value` are dropped.
    pub const fn insert(&self, value: Word, word: Word) -> Word {
        ((value << self.from_bit) & self.shifted_mask) | (word & !self.shifted_mask)
    }

    pub const fn extract(&self, word: Word) -> Word {
        (word & self.shifted_mask) >> self.from_bit
    }

    /// Extracts the field as a two's complement number of `width` bits.
    /// Panics for fields narrower than two bits.
    pub fn extract_signed(&self, word: Word) -> i32 {
        sign_extend(self.extract(word), self.width)
    }
}

/// Interprets the low `width` bits of `field` as a two's complement number.
///
/// `width` must be in `2..=32` and `field` must fit in `width` bits; both
/// are contract violations and panic.
pub fn sign_extend(field: Word, width: u32) -> i32 {
    assert!(width > 1, "sign extension needs at least two bits");
    assert!(width <= Word::BITS, "sign extension wider than a word");
    assert!(
        u64::from(field) < 1u64 << width,
        "field {field:#x} does not fit in {width} bits"
    );

    let field = i64::from(field);
    let sign_bit = 1i64 << (width - 1);
    if field & sign_bit != 0 {
        (field - (1i64 << width)) as i32
    } else {
        field as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_masks() {
        let field = BitField::new(4, 7);
        assert_eq!(field.width(), 4);
        assert_eq!(field.mask(), 0b1111);
        assert_eq!(field.insert(0b1010, 0), 0b1010_0000);
        assert_eq!(field.extract(0xFFFF_FFAF), 0b1010);
    }

    #[test]
    fn test_full_word_field() {
        let field = BitField::new(0, 31);
        assert_eq!(field.mask(), Word::MAX);
        assert_eq!(field.insert(0xDEAD_BEEF, 0x1234_5678), 0xDEAD_BEEF);
        assert_eq!(field.extract_signed(Word::MAX), -1);
    }

    #[test]
    fn test_insert_truncates() {
        let field = BitField::new(8, 9);
        assert_eq!(field.insert(0b111, 0), 0b11 << 8);
        assert_eq!(field.insert(0b100, 0xFFFF_FFFF), 0xFFFF_FCFF);
    }

    #[test]
    fn test_extract_signed() {
        let offset = BitField::new(0, 9);
        assert_eq!(offset.extract_signed(offset.insert(5, 0)), 5);
        assert_eq!(offset.extract_signed(offset.insert((-1i32) as Word, 0)), -1);
        assert_eq!(offset.extract_signed(offset.insert((-512i32) as Word, 0)), -512);
        assert_eq!(offset.extract_signed(offset.insert(511, 0)), 511);
    }

    #[test]
    fn test_sign_extend_edges() {
        assert_eq!(sign_extend(0b01, 2), 1);
        assert_eq!(sign_extend(0b10, 2), -2);
        assert_eq!(sign_extend(0b11, 2), -1);
        assert_eq!(sign_extend(0x7FFF_FFFF, 32), i32::MAX);
        assert_eq!(sign_extend(0x8000_0000, 32), i32::MIN);
    }

    #[test]
    #[should_panic(expected = "at least two bits")]
    fn test_sign_extend_rejects_single_bit() {
        sign_extend(1, 1);
    }

    #[test]
    #[should_panic(expected = "at least two bits")]
    fn test_extract_signed_rejects_single_bit_field() {
        BitField::new(3, 3).extract_signed(0b1000);
    }

    #[test]
    #[should_panic(expected = "reversed")]
    fn test_reversed_field() {
        BitField::new(5, 4);
    }

    fn field_bounds() -> impl Strategy<Value = (u32, u32)> {
        (0u32..32).prop_flat_map(|from| (Just(from), from..32u32))
    }

    proptest! {
        #[test]
        fn insert_then_extract((from, to) in field_bounds(), word in any::<u32>(), value in any::<u32>()) {
            let field = BitField::new(from, to);
            let value = value & field.mask();
            let packed = field.insert(value, word);

            prop_assert_eq!(field.extract(packed), value);
            let outside = !(field.mask() << from);
            prop_assert_eq!(packed & outside, word & outside);
        }

        #[test]
        fn sign_extend_matches_top_bit(width in 2u32..=32, raw in any::<u32>()) {
            let field = if width == 32 { raw } else { raw & ((1 << width) - 1) };
            let extended = sign_extend(field, width);
            let top_bit_set = field >> (width - 1) & 1 == 1;

            prop_assert_eq!(extended < 0, top_bit_set);
            if top_bit_set {
                prop_assert_eq!(i64::from(extended), i64::from(field) - (1i64 << width));
            } else {
                prop_assert_eq!(i64::from(extended), i64::from(field));
            }
        }
    }
}
