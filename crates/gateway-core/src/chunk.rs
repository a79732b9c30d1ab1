//! Splitting long replies into message-sized chunks.

/// Telegram's per-message text limit.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Delay between consecutive chunks of one reply.
pub const CHUNK_DELAY_MS: u64 = 500;

/// Split `text` into chunks of at most `max_len` characters.
///
/// Chunks break on line boundaries. A single line longer than `max_len` is
/// cut into `max_len`-sized pieces. Text that already fits is returned as a
/// single chunk.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        for piece in split_long_line(line, max_len) {
            let piece_len = piece.chars().count();
            let sep = usize::from(!current.is_empty());

            if current_len + sep + piece_len <= max_len {
                if sep == 1 {
                    current.push('\n');
                }
                current.push_str(piece);
                current_len += sep + piece_len;
            } else {
                flush_chunk(&mut chunks, &mut current);
                current.push_str(piece);
                current_len = piece_len;
            }
        }
    }

    flush_chunk(&mut chunks, &mut current);
    chunks
}

/// Move `current` into `chunks` unless it is blank; Telegram rejects empty
/// messages.
fn flush_chunk(chunks: &mut Vec<String>, current: &mut String) {
    if current.trim().is_empty() {
        current.clear();
    } else {
        chunks.push(std::mem::take(current));
    }
}

fn split_long_line(line: &str, max_len: usize) -> Vec<&str> {
    if line.chars().count() <= max_len {
        return vec![line];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in line.char_indices() {
        if count == max_len {
            pieces.push(&line[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    pieces.push(&line[start..]);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(split_message("hello\nworld", 100), vec!["hello\nworld"]);
        assert_eq!(split_message("", 10), vec![""]);
    }

    #[test]
    fn test_splits_on_line_boundaries() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn test_chunks_never_exceed_limit() {
        let text = (0..200)
            .map(|i| format!("line number {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_message(&text, 64);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 64));
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn test_no_blank_chunks() {
        assert_eq!(split_message("aaaa\n", 4), vec!["aaaa"]);
        assert_eq!(split_message("aaaa\n\nbbbb", 4), vec!["aaaa", "bbbb"]);
        assert_eq!(split_message("aaaa\n\n\n\n\n\nbb", 4), vec!["aaaa", "bb"]);
    }

    #[test]
    fn test_blank_lines_inside_a_chunk_are_kept() {
        assert_eq!(split_message("a\n\nb\ncccccc", 6), vec!["a\n\nb", "cccccc"]);
    }

    #[test]
    fn test_overlong_line_is_cut() {
        let line = "x".repeat(25);
        let chunks = split_message(&line, 10);
        assert_eq!(chunks, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn test_multibyte_characters_count_as_one() {
        let text = "é".repeat(12);
        let chunks = split_message(&text, 5);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
    }
}
