//! Anchor selection.

/// Index of the image every other image is aligned against: the middle of
/// the stack, `floor(n / 2)`.
pub fn select_anchor(len: usize) -> Option<usize> {
    (len > 0).then_some(len / 2)
}
