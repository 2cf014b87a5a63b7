// The nine keycap glyphs used to pick a live-vote candidate by position.

/// Keycap digits one through nine, in candidate order.
pub const NUMBER_GLYPHS: [&str; 9] = [
    "1\u{fe0f}\u{20e3}",
    "2\u{fe0f}\u{20e3}",
    "3\u{fe0f}\u{20e3}",
    "4\u{fe0f}\u{20e3}",
    "5\u{fe0f}\u{20e3}",
    "6\u{fe0f}\u{20e3}",
    "7\u{fe0f}\u{20e3}",
    "8\u{fe0f}\u{20e3}",
    "9\u{fe0f}\u{20e3}",
];

/// Most candidates a single live vote can offer.
pub const MAX_CANDIDATES: usize = NUMBER_GLYPHS.len();

const VARIATION_SELECTOR: char = '\u{fe0f}';

/// Glyph for a 1-based candidate position.
pub fn for_position(position: usize) -> Option<&'static str> {
    position
        .checked_sub(1)
        .and_then(|idx| NUMBER_GLYPHS.get(idx))
        .copied()
}

/// 1-based position of `glyph`, or `None` for anything that is not one of
/// the nine keycaps. Some clients drop the variation selector, so it is
/// ignored when matching.
pub fn position_of(glyph: &str) -> Option<usize> {
    let bare: String = glyph.chars().filter(|c| *c != VARIATION_SELECTOR).collect();
    NUMBER_GLYPHS
        .iter()
        .position(|g| g.chars().filter(|c| *c != VARIATION_SELECTOR).eq(bare.chars()))
        .map(|idx| idx + 1)
}
