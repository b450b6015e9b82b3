/// Free-block tracker: one bit per device block, 1 = used, 0 = free.
///
/// Kept in memory as u64 groups so first-fit can skip full groups with a
/// single compare. Serialized as little-endian groups, which puts bit `i`
/// in byte `i / 8` at position `i % 8`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBitmap {
    bits: Vec<u64>,
    /// number of tracked blocks
    len: usize,
}

impl BlockBitmap {
    /// All `len` blocks free
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0u64; (len + 63) / 64],
            len,
        }
    }

    /// Rebuild from the persisted bitmap region
    pub fn from_bytes(bytes: &[u8], len: usize) -> Self {
        let mut bitmap = Self::new(len);
        for (bits64, chunk) in bitmap.bits.iter_mut().zip(bytes.chunks(8)) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            *bits64 = u64::from_le_bytes(word);
        }
        bitmap.clear_tail();
        bitmap
    }

    /// Serialized form, exactly `byte_len` bytes
    pub fn to_bytes(&self, byte_len: usize) -> Vec<u8> {
        let mut bytes: Vec<u8> = self.bits.iter().flat_map(|w| w.to_le_bytes()).collect();
        bytes.resize(byte_len, 0);
        bytes
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// bits past `len` never count as used
    fn clear_tail(&mut self) {
        let rem = self.len % 64;
        if rem != 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }

    fn decomposition(bit: usize) -> (usize, usize) {
        (bit / 64, bit % 64)
    }

    pub fn is_free(&self, bit: usize) -> bool {
        if bit >= self.len {
            return false;
        }
        let (bits64_pos, inner_pos) = Self::decomposition(bit);
        self.bits[bits64_pos] & (1u64 << inner_pos) == 0
    }

    /// Lowest free block at or above `from`, marked used before returning
    pub fn alloc(&mut self, from: usize) -> Option<usize> {
        let (mut bits64_pos, inner_from) = Self::decomposition(from);
        // bits below `from` in the first group are treated as taken
        let mut mask = if inner_from == 0 {
            0
        } else {
            (1u64 << inner_from) - 1
        };
        while bits64_pos < self.bits.len() {
            let bits64 = self.bits[bits64_pos] | mask;
            if bits64 != u64::MAX {
                let inner_pos = bits64.trailing_ones() as usize;
                let bit = bits64_pos * 64 + inner_pos;
                if bit >= self.len {
                    return None;
                }
                self.bits[bits64_pos] |= 1u64 << inner_pos;
                return Some(bit);
            }
            bits64_pos += 1;
            mask = 0;
        }
        None
    }

    /// Idempotent
    pub fn dealloc(&mut self, bit: usize) {
        if bit < self.len {
            let (bits64_pos, inner_pos) = Self::decomposition(bit);
            self.bits[bits64_pos] &= !(1u64 << inner_pos);
        }
    }

    pub fn mark_used(&mut self, bit: usize) {
        if bit < self.len {
            let (bits64_pos, inner_pos) = Self::decomposition(bit);
            self.bits[bits64_pos] |= 1u64 << inner_pos;
        }
    }

    pub fn free_count(&self) -> usize {
        let used: u32 = self.bits.iter().map(|w| w.count_ones()).sum();
        self.len - used as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_first_fit_from_start() {
        let mut bitmap = BlockBitmap::new(10);
        bitmap.mark_used(5);
        assert_eq!(bitmap.alloc(3), Some(3));
        assert_eq!(bitmap.alloc(3), Some(4));
        assert_eq!(bitmap.alloc(3), Some(6));
        bitmap.dealloc(4);
        assert_eq!(bitmap.alloc(3), Some(4));
        assert_eq!(bitmap.alloc(0), Some(0));
    }

    #[test]
    fn alloc_stops_at_len() {
        let mut bitmap = BlockBitmap::new(3);
        assert_eq!(bitmap.alloc(0), Some(0));
        assert_eq!(bitmap.alloc(0), Some(1));
        assert_eq!(bitmap.alloc(0), Some(2));
        assert_eq!(bitmap.alloc(0), None);
        assert_eq!(bitmap.free_count(), 0);
    }

    #[test]
    fn alloc_crosses_group_boundaries() {
        let mut bitmap = BlockBitmap::new(130);
        for bit in 0..70 {
            bitmap.mark_used(bit);
        }
        assert_eq!(bitmap.alloc(0), Some(70));
        assert_eq!(bitmap.alloc(128), Some(128));
        assert_eq!(bitmap.free_count(), 130 - 72);
    }

    #[test]
    fn dealloc_is_idempotent() {
        let mut bitmap = BlockBitmap::new(8);
        bitmap.mark_used(2);
        bitmap.dealloc(2);
        bitmap.dealloc(2);
        assert!(bitmap.is_free(2));
        assert_eq!(bitmap.free_count(), 8);
        assert!(!bitmap.is_free(8));
    }

    #[test]
    fn byte_form_puts_bit_i_in_byte_i_div_8() {
        let mut bitmap = BlockBitmap::new(20);
        bitmap.mark_used(0);
        bitmap.mark_used(9);
        bitmap.mark_used(19);
        let bytes = bitmap.to_bytes(4);
        assert_eq!(bytes, vec![0b0000_0001, 0b0000_0010, 0b0000_1000, 0]);
        assert_eq!(BlockBitmap::from_bytes(&bytes, 20), bitmap);
    }

    #[test]
    fn from_bytes_drops_bits_past_len() {
        let bitmap = BlockBitmap::from_bytes(&[0xff, 0xff], 10);
        assert_eq!(bitmap.free_count(), 0);
        assert_eq!(bitmap.to_bytes(2), vec![0xff, 0b0000_0011]);
    }
}
