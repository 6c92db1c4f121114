/// 16-bit Internet checksum (ones' complement sum with carry folding).
///
/// Odd-length input is padded with a trailing zero byte, as in RFC 1071.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for chunk in &mut chunks {
        let word = u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        sum = fold(sum.wrapping_add(word));
    }

    if let Some(&byte) = chunks.remainder().first() {
        sum = fold(sum.wrapping_add((byte as u32) << 8));
    }

    !(fold(sum) as u16)
}

#[inline]
fn fold(mut sum: u32) -> u32 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::internet_checksum;

    #[test]
    fn matches_rfc1071_example() {
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn empty_payload_is_all_ones() {
        assert_eq!(internet_checksum(&[]), 0xFFFF);
    }

    #[test]
    fn odd_length_pads_low_byte() {
        assert_eq!(internet_checksum(&[0xAB]), !0xAB00);
    }

    #[test]
    fn detects_every_single_bit_flip() {
        let payload: Vec<u8> = (0u8..=63).collect();
        let reference = internet_checksum(&payload);
        for byte in 0..payload.len() {
            for bit in 0..8 {
                let mut corrupted = payload.clone();
                corrupted[byte] ^= 1 << bit;
                assert_ne!(
                    internet_checksum(&corrupted),
                    reference,
                    "flip of bit {bit} in byte {byte} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn single_corrupted_bit_differs_from_empty() {
        assert_ne!(internet_checksum(&[]), internet_checksum(&[0x01]));
    }
}
