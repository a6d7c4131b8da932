/// Splits `s` at the largest byte index `<= limit` that begins a valid UTF-8
/// code point, walking back from `limit` while the byte at that index is a
/// UTF-8 continuation byte. If no such index greater than zero exists, splits
/// at exactly `limit` (accepting a broken rune rather than looping forever —
/// unreachable in practice once `limit` is `CHUNK_LIMIT`-sized).
pub fn safe_split(s: &str, limit: usize) -> (&str, &str) {
    if s.len() <= limit {
        return (s, "");
    }

    let mut idx = limit;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    if idx == 0 {
        idx = limit;
    }

    s.split_at(idx)
}

/// Greedily packs `text` into chunks of at most `limit` bytes, preferring to
/// break on newlines. A single line longer than `limit` is itself split with
/// [`safe_split`].
pub fn chunk_message(text: &str, limit: usize) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split('\n') {
        if line.len() > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }

            let mut rest = line;
            while rest.len() > limit {
                let (prefix, remainder) = safe_split(rest, limit);
                chunks.push(prefix.to_string());
                rest = remainder;
            }
            current = rest.to_string();
            continue;
        }

        let candidate_len = if current.is_empty() {
            line.len()
        } else {
            current.len() + 1 + line.len()
        };

        if candidate_len <= limit {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(line);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_message("hello world", 3900);
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    // S7
    #[test]
    fn chunking_boundaries() {
        let text = format!("{}\n{}", "A".repeat(4000), "B".repeat(1000));
        let chunks = chunk_message(&text, 3900);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "A".repeat(3900));
        assert_eq!(chunks[1], format!("{}\n{}", "A".repeat(100), "B".repeat(1000)));
    }

    #[test]
    fn every_chunk_respects_the_limit() {
        let limit = 37;
        let text = "the quick brown fox jumps over the lazy dog\nagain and again and again and again\nshort";
        for chunk in chunk_message(text, limit) {
            assert!(chunk.len() <= limit, "chunk exceeded limit: {chunk:?}");
        }
    }

    #[test]
    fn safe_split_never_breaks_a_codepoint() {
        let s = "한글테스트문자열입니다";
        let mut rest = s;
        let mut rebuilt = String::new();
        while !rest.is_empty() {
            let (prefix, remainder) = safe_split(rest, 4);
            assert!(std::str::from_utf8(prefix.as_bytes()).is_ok());
            rebuilt.push_str(prefix);
            if remainder.len() == rest.len() {
                // limit below first rune's byte length: safe_split can't make progress
                break;
            }
            rest = remainder;
        }
        assert!(s.starts_with(&rebuilt));
    }

    // P2
    #[test]
    fn safe_split_reconstructs_the_original_string() {
        for s in ["hello", "héllo wörld", "日本語のテスト", "mixed 한 text"] {
            for limit in 3..s.len().max(4) {
                let mut rest = s;
                let mut rebuilt = String::new();
                loop {
                    let (prefix, remainder) = safe_split(rest, limit);
                    assert!(std::str::from_utf8(prefix.as_bytes()).is_ok());
                    rebuilt.push_str(prefix);
                    if remainder.is_empty() {
                        break;
                    }
                    rest = remainder;
                }
                assert_eq!(rebuilt, s, "limit={limit}");
            }
        }
    }
}
