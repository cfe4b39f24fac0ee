//! Tag identifier codec.
//!
//! A tag carries 16 data bits: a 10-bit identifier followed by a 6-bit BCH
//! remainder, XOR-masked so that no valid pattern is all dark or all light.

/// Number of distinct tag identifiers.
pub const TAG_ID_COUNT: u32 = 1 << DATA_BITS;

/// Largest valid tag identifier.
pub const MAX_TAG_ID: u32 = TAG_ID_COUNT - 1;

const BLOCK_BITS: u32 = 16;
const DATA_BITS: u32 = 10;
const PARITY_BITS: u32 = BLOCK_BITS - DATA_BITS;
const GENERATOR: u32 = 0b110_0110;
const MASK: u16 = 0b1101_0100_0001_0010;

/// Remainder of the polynomial division of `data` by the generator.
fn bch_remainder(data: u32) -> u32 {
    let mut remainder = data;
    for i in 0..DATA_BITS {
        let shift = DATA_BITS - i - 1;
        if remainder & (1 << (shift + PARITY_BITS)) != 0 {
            remainder ^= GENERATOR << shift;
        }
    }
    remainder
}

/// Encoder/decoder between identifiers and 16-bit patterns.
///
/// Decoding is a brute-force nearest-codeword search over all 1024
/// codewords, precomputed at construction.
#[derive(Clone, Debug)]
pub struct TagCodec {
    codewords: Vec<u16>,
}

impl Default for TagCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TagCodec {
    pub fn new() -> Self {
        let codewords = (0..TAG_ID_COUNT)
            .map(|id| {
                let data = id << PARITY_BITS;
                (data ^ bch_remainder(data)) as u16
            })
            .collect();
        Self { codewords }
    }

    /// Masked 16-bit pattern of `id`, or `None` for ids above [`MAX_TAG_ID`].
    pub fn encode(&self, id: u32) -> Option<u16> {
        self.codewords.get(id as usize).map(|&c| c ^ MASK)
    }

    /// Identifier of the nearest codeword.
    ///
    /// Fails if the nearest codeword is two or more bits away or if the
    /// nearest distance is shared by several codewords.
    pub fn decode(&self, pattern: u16) -> Option<u32> {
        let unmasked = pattern ^ MASK;
        let mut best_id = 0u32;
        let mut best_distance = u32::MAX;
        let mut ties = 0usize;

        for (id, &codeword) in self.codewords.iter().enumerate() {
            let distance = (unmasked ^ codeword).count_ones();
            if distance < best_distance {
                best_distance = distance;
                best_id = id as u32;
                ties = 0;
            } else if distance == best_distance {
                ties += 1;
            }
        }

        (ties == 0 && best_distance < 2).then_some(best_id)
    }
}
