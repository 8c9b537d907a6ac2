//! Reading time estimate

use super::post::ContentBlock;

/// Assumed reading speed
pub const WORDS_PER_MINUTE: usize = 200;

/// Count the words of all headings and bodies
pub fn word_count(blocks: &[ContentBlock]) -> usize {
    blocks
        .iter()
        .map(|block| {
            block.heading.split_whitespace().count()
                + block.body.as_text().split_whitespace().count()
        })
        .sum()
}

/// Minutes needed to read `blocks`, rounded up. Empty content reads in 0 minutes.
pub fn estimate(blocks: &[ContentBlock]) -> usize {
    word_count(blocks).div_ceil(WORDS_PER_MINUTE)
}
