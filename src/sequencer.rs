//! Token-stream windowing for training.

use crate::counts::TokenId;

/// Yields the window `tokens[start..start + order]` for every start
/// position, truncated at the end of the stream.
///
/// Counting these windows makes every n-gram of length `1..=order` that
/// starts at any position available through the trie.
pub fn forward(tokens: &[TokenId], order: usize) -> impl Iterator<Item = &[TokenId]> + '_ {
    let starts = if order == 0 { 0 } else { tokens.len() };
    (0..starts).map(move |start| &tokens[start..(start + order).min(tokens.len())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_windows_truncate_at_end() {
        let windows: Vec<&[TokenId]> = forward(&[1, 2, 3, 4], 3).collect();
        assert_eq!(
            windows,
            vec![&[1, 2, 3][..], &[2, 3, 4][..], &[3, 4][..], &[4][..]]
        );
    }

    #[test]
    fn test_forward_edge_cases() {
        assert_eq!(forward(&[1, 2], 0).count(), 0);
        assert_eq!(forward(&[], 4).count(), 0);
        let windows: Vec<&[TokenId]> = forward(&[5, 6], 10).collect();
        assert_eq!(windows, vec![&[5, 6][..], &[6][..]]);
    }
}
