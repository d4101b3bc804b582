//! Helper functions for text cleanup and ASCII folding.

/// Normalize line endings and trim trailing whitespace.
pub fn clean_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim_end()
        .to_string()
}

/// Replace every non-ASCII character with `?`.
pub fn ascii_replace(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect()
}

/// Keep only the ASCII bytes of `bytes`, dropping everything else.
///
/// Never fails, whatever the encoding of the input.
pub fn ascii_ignore(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect()
}

/// Drop every non-ASCII character from `text`.
pub fn strip_non_ascii(text: &str) -> String {
    text.chars().filter(char::is_ascii).collect()
}

/// Arithmetic mean of `values`, `0.0` when empty.
pub fn mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = usize>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0usize, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("fix bug\r\n\r\nlonger body\r\n"), "fix bug\n\nlonger body");
        assert_eq!(clean_text("test  \n  "), "test");
    }

    #[test]
    fn test_ascii_folding() {
        assert_eq!(ascii_replace("naïve = 1"), "na?ve = 1");
        assert_eq!(ascii_ignore("naïve".as_bytes()), "nave");
        assert_eq!(ascii_ignore(&[b'a', 0xff, b'b']), "ab");
        assert_eq!(strip_non_ascii("résumé"), "rsum");
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(vec![1, 2, 3]), 2.0);
        assert_eq!(mean(Vec::<usize>::new()), 0.0);
    }
}
