//! Outbound text segmentation.

/// Splits `text` into chunks no longer than `max_len`, the way a channel
/// with a hard per-message length limit (SMS's 160-char segments, and
/// similar caps on other channels) needs its outbound text cut up.
///
/// Within each window, a break is preferred at whitespace found in the last
/// 20% of the window, so words aren't cut right at the limit when a nearby
/// space would do; `channel` is taken for callers that will eventually want
/// per-channel segmentation quirks, though every channel shares this rule
/// today. A stretch of text with no whitespace in that trailing 20% is
/// hard-cut at `max_len`, same as a single word longer than the limit.
pub fn split_by_channel(_channel: &str, text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    let tail_window = ((max_len as f64) * 0.2).floor() as usize;
    let mut parts = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= max_len {
            parts.push(chars[start..].iter().collect());
            break;
        }

        let window_end = start + max_len;
        let tail_start = window_end.saturating_sub(tail_window).max(start);

        let break_at = (tail_start..window_end).rev().find(|&i| chars[i].is_whitespace());

        match break_at {
            Some(ws_index) => {
                parts.push(chars[start..ws_index].iter().collect());
                start = ws_index + 1;
            }
            None => {
                parts.push(chars[start..window_end].iter().collect());
                start = window_end;
            }
        }
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_unsplit() {
        assert_eq!(split_by_channel("dk", "hello world", 160), vec!["hello world"]);
    }

    #[test]
    fn breaks_at_whitespace_found_in_the_trailing_window() {
        let text = format!("{} {}", "A".repeat(17), "B".repeat(17));
        let parts = split_by_channel("dk", &text, 20);
        assert_eq!(parts, vec!["A".repeat(17), "B".repeat(17)]);
    }

    #[test]
    fn whitespace_outside_the_trailing_window_is_not_used() {
        // The only space sits at index 10, well before the last-20% window
        // of a 20-char cut (indices 16..20), so the cut lands at the limit
        // instead of walking back to that space.
        let text = format!("{} {}", "A".repeat(10), "A".repeat(30));
        let parts = split_by_channel("dk", &text, 20);
        for p in &parts {
            assert!(p.chars().count() <= 20);
        }
        assert_eq!(parts.concat().replace(' ', ""), "A".repeat(40));
    }

    #[test]
    fn hard_cuts_a_word_longer_than_limit() {
        let parts = split_by_channel("dk", "abcdefghij", 4);
        assert_eq!(parts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn every_segment_respects_the_limit() {
        let text = "the quick brown fox jumps over the lazy dog";
        let parts = split_by_channel("dk", text, 12);
        assert!(!parts.is_empty());
        for p in &parts {
            assert!(p.chars().count() <= 12);
        }
    }
}
