//! Glob matching for pattern invalidation
//!
//! Mirrors the subset of Redis `MATCH` syntax that invalidation uses so the
//! in-process store selects exactly the keys a `SCAN MATCH` would:
//! `*` (any run), `?` (one char), `[abc]` / `[a-z]` / `[^x]` classes and
//! `\` escapes.

/// Check whether `key` matches the glob `pattern`
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0usize, 0usize);
    // (pattern index after the last `*`, key index it was tried against)
    let mut backtrack: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    backtrack = Some((pi + 1, ki));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ki += 1;
                    continue;
                }
                '[' => match match_class(&p, pi, k[ki]) {
                    Some((true, next)) => {
                        pi = next;
                        ki += 1;
                        continue;
                    }
                    Some((false, _)) => {}
                    None => {
                        // Unterminated class is a literal '['
                        if k[ki] == '[' {
                            pi += 1;
                            ki += 1;
                            continue;
                        }
                    }
                },
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == k[ki] {
                        pi += 2;
                        ki += 1;
                        continue;
                    }
                }
                c => {
                    if c == k[ki] {
                        pi += 1;
                        ki += 1;
                        continue;
                    }
                }
            }
        }

        match backtrack {
            Some((star_next, star_key)) => {
                pi = star_next;
                ki = star_key + 1;
                backtrack = Some((star_next, star_key + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Escape glob metacharacters so `literal` only matches itself
pub fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Match `c` against the class starting at `p[start] == '['`.
///
/// Returns whether it matched and the index just past the closing `]`, or
/// `None` when the class is unterminated.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = p.get(i) == Some(&'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < p.len() && p[i] != ']' {
        let mut lo = p[i];
        if lo == '\\' && i + 1 < p.len() {
            i += 1;
            lo = p[i];
        }
        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let (a, b) = if lo <= p[i + 2] { (lo, p[i + 2]) } else { (p[i + 2], lo) };
            if a <= c && c <= b {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }

    if i >= p.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}
