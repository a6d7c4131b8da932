/// Escapes the handful of characters that are meaningful in Telegram's HTML
/// parse mode. Truncation must happen *before* escaping (see
/// [`truncate_runes`]) so an entity like `&amp;` is never split in half.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Truncates `input` to at most `max_runes` unicode scalar values, without
/// ever splitting a multi-byte character.
pub fn truncate_runes(input: &str, max_runes: usize) -> &str {
    match input.char_indices().nth(max_runes) {
        Some((byte_idx, _)) => &input[..byte_idx],
        None => input,
    }
}
