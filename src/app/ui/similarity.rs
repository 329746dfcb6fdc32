use std::collections::HashMap;

fn is_emoji(ch: char) -> bool {
    matches!(ch as u32,
        0x1F000..=0x1FAFF
        | 0x2600..=0x27BF
        | 0x2B00..=0x2BFF
        | 0x2300..=0x23FF
        | 0xFE00..=0xFE0F
        | 0x200D
        | 0x20E3
        | 0x3030
        | 0x303D
        | 0x3297
        | 0x3299
        | 0xE0020..=0xE007F)
}

/// Lowercases, drops emoji, and collapses whitespace.
pub fn normalize_caption(text: &str) -> String {
    let stripped: String = text.chars().filter(|ch| !is_emoji(*ch)).collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    let mut run: HashMap<usize, usize> = HashMap::new();
    for (i, ch) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(ch) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = if j > 0 { run.get(&(j - 1)).copied().unwrap_or(0) } else { 0 } + 1;
                next.insert(j, k);
                if k > best_size {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_size = k;
                }
            }
        }
        run = next;
    }
    (best_i, best_j, best_size)
}

fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, ch) in b.iter().enumerate() {
        b2j.entry(*ch).or_default().push(j);
    }
    let mut total = 0;
    let mut queue = vec![((0, a.len()), (0, b.len()))];
    while let Some(((alo, ahi), (blo, bhi))) = queue.pop() {
        let (i, j, size) = longest_match(a, &b2j, (alo, ahi), (blo, bhi));
        if size == 0 {
            continue;
        }
        total += size;
        if alo < i && blo < j {
            queue.push(((alo, i), (blo, j)));
        }
        if i + size < ahi && j + size < bhi {
            queue.push(((i + size, ahi), (j + size, bhi)));
        }
    }
    total
}

/// Gestalt pattern-matching ratio `2*M / T`, in `[0, 1]`.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(&a, &b) as f64 / total as f64
}

/// Ratio between two captions after normalization.
pub fn caption_similarity(expected: &str, actual: &str) -> f64 {
    sequence_ratio(&normalize_caption(expected), &normalize_caption(actual))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_difflib_reference_values() {
        assert!((sequence_ratio("abcd", "bcde") - 0.75).abs() < 1e-9);
        assert!((sequence_ratio("tide", "diet") - 0.25).abs() < 1e-9);
        assert_eq!(sequence_ratio("", ""), 1.0);
        assert_eq!(sequence_ratio("abc", ""), 0.0);
        assert_eq!(sequence_ratio("same", "same"), 1.0);
    }

    #[test]
    fn strips_emoji_and_case() {
        assert_eq!(normalize_caption("Sunset Vibes 🌅✨  #Beach"), "sunset vibes #beach");
        assert_eq!(caption_similarity("Hello 👋 World", "hello world"), 1.0);
    }

    #[test]
    fn dropped_characters_lower_the_ratio() {
        let expected = "Golden hour never disappoints 🌇 #sunset #travel";
        let truncated = "Golden hour never disap";
        assert!(caption_similarity(expected, truncated) < 0.9);
        let one_typo = "Golden hour never disapoints #sunset #travel";
        assert!(caption_similarity(expected, one_typo) >= 0.9);
    }
}
