// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Partial redaction of identifiers before they reach any log line.

const MASK_CHAR: char = '*';
const MIN_VISIBLE: usize = 2;

/// Hides roughly 80% of `text` behind asterisks, keeping a head and a tail.
///
/// Strings of up to two characters are returned unchanged. Longer strings
/// always keep at least one leading and one trailing character; the output
/// has exactly as many characters as the input.
pub fn mask(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len <= MIN_VISIBLE {
        return text.to_string();
    }

    // floor(len * 0.8) without going through floats
    let mut hidden = len * 4 / 5;
    let mut visible = len - hidden;
    if visible < MIN_VISIBLE {
        visible = MIN_VISIBLE;
        hidden = len - MIN_VISIBLE;
    }
    let head = visible / 2;
    let tail = visible - head;

    let mut out = String::with_capacity(text.len());
    out.extend(&chars[..head]);
    out.extend(std::iter::repeat_n(MASK_CHAR, hidden));
    out.extend(&chars[len - tail..]);
    out
}

/// Operator-facing label for an account: masked username, plus the masked tip
/// in parentheses when one is set.
pub fn display_name(username: &str, tip: &str) -> String {
    let user = mask(username);
    if tip.is_empty() {
        user
    } else {
        format!("{} ({})", user, mask(tip))
    }
}
