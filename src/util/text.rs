use std::borrow::Cow;

/// Collapses every run of whitespace into a single space and trims the ends.
///
/// Returns `Cow::Borrowed` when the input is already normalized.
///
/// # Examples
///
/// ```
/// use kitsune::util::normalize_whitespace;
///
/// assert_eq!(normalize_whitespace("  Hello \n\t world "), "Hello world");
/// assert_eq!(normalize_whitespace("clean text"), "clean text");
/// ```
pub fn normalize_whitespace(s: &str) -> Cow<'_, str> {
    let mut prev_space = true;
    let already_clean = s.chars().all(|c| {
        let ok = if c.is_whitespace() {
            c == ' ' && !prev_space
        } else {
            true
        };
        prev_space = c.is_whitespace();
        ok
    }) && !s.ends_with(char::is_whitespace);

    if already_clean {
        return Cow::Borrowed(s);
    }

    Cow::Owned(s.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Counts whitespace-delimited tokens.
pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Estimated reading time in seconds for `words` at `words_per_minute`,
/// rounded to the nearest second and never below `min_seconds`.
pub fn reading_time_seconds(words: usize, words_per_minute: u32, min_seconds: u32) -> u32 {
    let wpm = f64::from(words_per_minute.max(1));
    let seconds = (words as f64 / wpm * 60.0).round();
    let seconds = if seconds >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        seconds as u32
    };
    seconds.max(min_seconds)
}

/// Strips ASCII control characters from feed-provided text.
///
/// Preserves tab, newline and carriage return. Returns `Cow::Borrowed` when
/// nothing needs removing (the common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s
        .bytes()
        .any(|b| b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r'));

    if !needs_strip {
        return Cow::Borrowed(s);
    }

    Cow::Owned(
        s.chars()
            .filter(|&c| !c.is_ascii_control() || matches!(c, '\t' | '\n' | '\r'))
            .collect(),
    )
}
