//! Utility functions for the type-duel service

use chrono::{DateTime, Utc};
use rand::Rng;

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Deterministic room id for a matchmade pair.
///
/// Symmetric in its arguments: `pair_room_id(a, b) == pair_room_id(b, a)`,
/// so a retried search never creates a second room for the same pair.
pub fn pair_room_id(first: &str, second: &str) -> String {
    let (lo, hi) = if first <= second {
        (first, second)
    } else {
        (second, first)
    };
    format!("duel-{}-{}", lo, hi)
}

/// Generate a random 4-character upper-case join code for manual rooms
pub fn generate_join_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..4)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Validate a caller-supplied manual room code
pub fn is_valid_join_code(code: &str) -> bool {
    (4..=16).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Count words in a typed input, splitting on whitespace runs
pub fn word_count(input: &str) -> usize {
    input.split_whitespace().count()
}

/// Typing speed in words per minute, rounded to the nearest integer.
///
/// Returns 0 for non-positive elapsed times rather than dividing by zero.
pub fn speed_wpm(input: &str, elapsed_seconds: f64) -> u32 {
    if elapsed_seconds <= 0.0 {
        return 0;
    }
    let words = word_count(input) as f64;
    (words / (elapsed_seconds / 60.0)).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_room_id_symmetry() {
        assert_eq!(pair_room_id("alice", "bob"), pair_room_id("bob", "alice"));
        assert_eq!(pair_room_id("alice", "bob"), "duel-alice-bob");
    }

    #[test]
    fn test_pair_room_id_distinct_pairs() {
        assert_ne!(pair_room_id("a", "b"), pair_room_id("a", "c"));
    }

    #[test]
    fn test_join_code_shape() {
        for _ in 0..32 {
            let code = generate_join_code();
            assert_eq!(code.len(), 4);
            assert!(is_valid_join_code(&code));
        }
    }

    #[test]
    fn test_join_code_validation() {
        assert!(is_valid_join_code("ABCD"));
        assert!(is_valid_join_code("room42"));
        assert!(!is_valid_join_code("abc"));
        assert!(!is_valid_join_code("has space"));
        assert!(!is_valid_join_code("toolongtoolongtoolong"));
    }

    #[test]
    fn test_word_count_whitespace_runs() {
        assert_eq!(word_count("the quick  brown\tfox"), 4);
        assert_eq!(word_count("   "), 0);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn test_speed_wpm() {
        // 20 words in 20 seconds is 60 WPM
        let input = (0..20).map(|_| "word").collect::<Vec<_>>().join(" ");
        assert_eq!(speed_wpm(&input, 20.0), 60);

        // Rounded, not truncated
        assert_eq!(speed_wpm("one two three", 29.0), 6);

        // Degenerate elapsed times never divide by zero
        assert_eq!(speed_wpm("one two", 0.0), 0);
        assert_eq!(speed_wpm("one two", -1.0), 0);
    }
}
