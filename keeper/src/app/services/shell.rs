// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Wraps `s` in single quotes so a POSIX shell passes it through untouched.
pub fn sh_escape(s: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&s.replace('\'', r"'\''"));
    out.push('\'');
    out
}
