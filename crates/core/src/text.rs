//! Lossless text segmentation.
//!
//! Splits long text into pieces of at most `max_chars` characters. Cuts
//! prefer a paragraph break, then a sentence end, then any whitespace, and
//! only then fall back to a hard cut. The separator stays attached to the
//! preceding piece, so concatenating the output reproduces the input exactly.

/// Split `text` into segments of at most `max_chars` characters.
///
/// Text that already fits is returned as a single segment (including the
/// empty string). A `max_chars` of zero is treated as one.
pub fn split_segments(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        let window_end = byte_offset(rest, max_chars);
        let window = &rest[..window_end];
        let cut = find_cut(window).unwrap_or(window_end);
        segments.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    if !rest.is_empty() || segments.is_empty() {
        segments.push(rest.to_string());
    }

    segments
}

/// Byte index just past the first `chars` characters of `s`.
fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}

/// Best cut position (exclusive byte index) inside `window`, if any.
fn find_cut(window: &str) -> Option<usize> {
    if let Some(pos) = window.rfind("\n\n") {
        return Some(pos + 2);
    }

    let sentence_end = [". ", "! ", "? ", ".\n", "!\n", "?\n"]
        .iter()
        .filter_map(|pat| window.rfind(pat))
        .max();
    if let Some(pos) = sentence_end {
        return Some(pos + 2);
    }

    window
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
}
