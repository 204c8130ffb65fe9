/// odd parity bit for the 31 most significant bits of `word`
pub const fn parity(word: u32) -> bool {
    (word >> 1).count_ones() % 2 == 0
}

/// true if the whole word, parity bit included, has an odd number of set bits
pub const fn parity_ok(word: u32) -> bool {
    word.count_ones() % 2 == 1
}

/// replace bit 0 by the odd parity of the other bits
pub const fn with_parity(word: u32) -> u32 {
    (word & !1) | parity(word) as u32
}

/**
    implement [packbytes::ToBytes] and [packbytes::FromBytes] for a 32 bit bilge bitfield

    register values travel as big endian words, the bitfield conversion goes through `u32`
*/
#[macro_export]
macro_rules! pack_word {
    ($t:ty) => {

        impl packbytes::ToBytes for $t {
            type Bytes = [u8; 4];

            fn to_le_bytes(self) -> Self::Bytes {
                u32::from(self).to_le_bytes()
            }
            fn to_be_bytes(self) -> Self::Bytes {
                u32::from(self).to_be_bytes()
            }
        }
        impl packbytes::FromBytes for $t {
            type Bytes = [u8; 4];

            fn from_le_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(u32::from_le_bytes(bytes))
            }
            fn from_be_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(u32::from_be_bytes(bytes))
            }
        }
    };
}
