/// Signed distance from `from` to `to` in the wrapping 32-bit sequence space.
///
/// Valid as long as the two numbers are less than 2^31 segments apart.
#[inline]
pub fn seq_diff(to: u32, from: u32) -> i32 {
    to.wrapping_sub(from) as i32
}

#[cfg(test)]
mod tests {
    use super::seq_diff;

    #[test]
    fn ordinary_distances() {
        assert_eq!(seq_diff(5, 3), 2);
        assert_eq!(seq_diff(3, 5), -2);
        assert_eq!(seq_diff(9, 9), 0);
    }

    #[test]
    fn distances_across_wraparound() {
        assert_eq!(seq_diff(1, u32::MAX), 2);
        assert_eq!(seq_diff(u32::MAX, 1), -2);
    }
}
