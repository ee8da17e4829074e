use std::borrow::Cow;

/// Ellipsis appended by [`truncate_chars`]
const ELLIPSIS: &str = "...";

/// Strip terminal control characters and ANSI escape sequences from text.
///
/// Feed titles and descriptions come from arbitrary servers and are echoed to
/// the terminal by `browse` and `feeds`, so escape sequences must not survive.
///
/// Strips:
/// - ASCII control chars other than tab, newline and carriage return, plus DEL
/// - ANSI CSI sequences: `ESC [` ... final byte in `0x40..=0x7E`
/// - ANSI OSC sequences: `ESC ]` ... until BEL or `ESC \`
/// - Bare ESC
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_stripped(c) {
            out.push(c);
        }
    }

    Cow::Owned(out)
}

fn is_stripped(c: char) -> bool {
    c == '\x1b' || c == '\x7f' || (c.is_ascii_control() && !matches!(c, '\t' | '\n' | '\r'))
}

/// Clean a user-supplied name (user or feed).
///
/// Strips control characters and trims whitespace. Returns `None` when
/// nothing is left.
pub fn sanitize_name(name: &str) -> Option<String> {
    let stripped = strip_control_chars(name);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// Shorten `s` to at most `max_chars` characters, appending "..." when cut.
///
/// A cap too small to hold the ellipsis gets a plain prefix.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some((end, _)) if max_chars <= ELLIPSIS.len() => Cow::Borrowed(&s[..end]),
        Some(_) => {
            let keep = max_chars.saturating_sub(ELLIPSIS.len());
            let end = s.char_indices().nth(keep).map(|(i, _)| i).unwrap_or(s.len());
            Cow::Owned(format!("{}{}", &s[..end], ELLIPSIS))
        }
    }
}
