//! Text normalization, edit distance and phonetic codes for fuzzy matching.

/// Lowercases, replaces non-alphanumerics with spaces and collapses runs of
/// whitespace. Index and query sides must normalize identically.
pub fn normalize_text(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() {
                ch.to_lowercase().next().unwrap_or(ch)
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Levenshtein distance over Unicode scalar values.
pub fn levenshtein(left: &str, right: &str) -> usize {
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();
    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0; right.len() + 1];
    for (i, left_ch) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, right_ch) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(left_ch != right_ch);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[right.len()]
}

/// `1 - distance / longer_length`, in `[0, 1]`.
pub fn similarity(left: &str, right: &str) -> f64 {
    let longest = left.chars().count().max(right.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(left, right) as f64 / longest as f64
}

/// Edit budget for `AUTO` fuzziness: exact for very short terms.
pub fn auto_edits(term_len: usize) -> u32 {
    match term_len {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

/// American Soundex code of one word (`R163` for "Robert").
///
/// Returns `None` when the word has no ASCII letters.
pub fn soundex(word: &str) -> Option<String> {
    let mut letters = word
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|ch| ch.to_ascii_uppercase());
    let first = letters.next()?;

    let mut code = String::with_capacity(4);
    code.push(first);
    let mut last_digit = soundex_digit(first);
    for ch in letters {
        let digit = soundex_digit(ch);
        match digit {
            Some(value) if digit != last_digit => {
                code.push(value);
                if code.len() == 4 {
                    break;
                }
                last_digit = digit;
            }
            Some(_) => {}
            // H and W do not separate equal codes; vowels do.
            None if matches!(ch, 'H' | 'W') => {}
            None => last_digit = None,
        }
    }
    while code.len() < 4 {
        code.push('0');
    }
    Some(code)
}

fn soundex_digit(ch: char) -> Option<char> {
    match ch {
        'B' | 'F' | 'P' | 'V' => Some('1'),
        'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => Some('2'),
        'D' | 'T' => Some('3'),
        'L' => Some('4'),
        'M' | 'N' => Some('5'),
        'R' => Some('6'),
        _ => None,
    }
}

/// Token-wise Soundex equality of two normalized strings.
pub fn sounds_alike(left: &str, right: &str) -> bool {
    let left_tokens: Vec<&str> = left.split_whitespace().collect();
    let right_tokens: Vec<&str> = right.split_whitespace().collect();
    if left_tokens.is_empty() || left_tokens.len() != right_tokens.len() {
        return false;
    }
    left_tokens
        .iter()
        .zip(&right_tokens)
        .all(|(left, right)| match (soundex(left), soundex(right)) {
            (Some(left), Some(right)) => left == right,
            _ => left == right,
        })
}
