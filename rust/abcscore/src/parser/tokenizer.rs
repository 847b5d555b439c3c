//! Measure tokenizer: splits the text of one measure into element tokens.
//!
//! The scanner walks the characters once with explicit states rather than
//! regular expressions. A note token carries its decoration prefix,
//! accidentals, head letter, octave marks, duration and dots; a tuplet token
//! carries its marker and exactly N inner note tokens.

/// Single-character decoration prefixes.
pub(crate) const SHORT_DECORATIONS: &[char] = &['.', '~', 'H', 'L', 'M', 'O', 'P', 'S', 'T', 'u', 'v'];

pub(crate) fn is_note_letter(c: char) -> bool {
    matches!(c, 'A'..='G' | 'a'..='g')
}

pub(crate) fn is_rest_letter(c: char) -> bool {
    matches!(c, 'z' | 'x')
}

pub(crate) fn is_accidental(c: char) -> bool {
    matches!(c, '^' | '_' | '=')
}

/// Characters that end a generic symbol.
fn is_note_start(c: char) -> bool {
    is_note_letter(c) || is_rest_letter(c) || is_accidental(c) || matches!(c, '[' | '"' | '-' | '!' | '+')
}

/// `[` opening an inline field such as `[K:G]` rather than a chord.
pub(crate) fn is_inline_field(chars: &[char], i: usize) -> bool {
    chars.get(i) == Some(&'[')
        && chars.get(i + 1).is_some_and(|c| c.is_ascii_alphabetic())
        && chars.get(i + 2) == Some(&':')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SkipWhitespace,
    Tie,
    TupletOpen,
    Note,
    Bracket,
    Quoted,
    Symbol,
}

/// Split measure text into tokens. Never yields an empty token.
pub fn tokenize(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let state = classify(&chars, i);
        let end = match state {
            State::SkipWhitespace => {
                i += 1;
                continue;
            }
            State::Tie => i + 1,
            State::TupletOpen => {
                let (token, end) = scan_tuplet(&chars, i);
                tokens.push(token);
                i = end;
                continue;
            }
            State::Note => scan_note(&chars, i).unwrap_or(i + 1),
            State::Bracket => scan_bracket(&chars, i),
            State::Quoted => scan_quoted(&chars, i),
            State::Symbol => scan_symbol(&chars, i),
        };
        tokens.push(chars[i..end].iter().collect());
        i = end;
    }

    tokens
}

fn classify(chars: &[char], i: usize) -> State {
    let c = chars[i];
    if c.is_whitespace() {
        return State::SkipWhitespace;
    }
    if c == '-' {
        return State::Tie;
    }
    if c == '(' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) {
        return State::TupletOpen;
    }
    if scan_note(chars, i).is_some() {
        return State::Note;
    }
    match c {
        '[' => State::Bracket,
        '"' => State::Quoted,
        _ => State::Symbol,
    }
}

/// Scan one note, rest or chord starting at `start`, returning the index one
/// past its end, or `None` if no note begins here.
pub(crate) fn scan_note(chars: &[char], start: usize) -> Option<usize> {
    let mut i = skip_decorations(chars, start);

    let mut accidentals = 0;
    while accidentals < 2 && chars.get(i).copied().is_some_and(is_accidental) {
        i += 1;
        accidentals += 1;
    }

    match chars.get(i).copied() {
        Some(c) if is_note_letter(c) => i += 1,
        Some(c) if is_rest_letter(c) && accidentals == 0 => i += 1,
        Some('[') if accidentals == 0 && !is_inline_field(chars, i) => {
            let close = chars[i..].iter().position(|&c| c == ']')? + i;
            let inner = &chars[i + 1..close];
            if inner.is_empty() || !inner.iter().any(|&c| is_note_letter(c)) {
                return None;
            }
            i = close + 1;
        }
        _ => return None,
    }

    while matches!(chars.get(i), Some(',') | Some('\'')) {
        i += 1;
    }
    while chars.get(i).is_some_and(|c| c.is_ascii_digit() || *c == '/') {
        i += 1;
    }
    while chars.get(i) == Some(&'.') {
        i += 1;
    }
    Some(i)
}

/// Skip `!name!`, `+name+` and single-character decorations.
pub(crate) fn skip_decorations(chars: &[char], start: usize) -> usize {
    let mut i = start;
    loop {
        match chars.get(i).copied() {
            Some(delim @ ('!' | '+')) => {
                match chars[i + 1..].iter().position(|&c| c == delim) {
                    Some(offset) if offset > 0 => i += offset + 2,
                    _ => return i,
                }
            }
            Some(c) if SHORT_DECORATIONS.contains(&c) => i += 1,
            _ => return i,
        }
    }
}

/// Tuplet: `(N` followed by exactly N notes and an optional `)`.
fn scan_tuplet(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start + 1;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit() || *c == ':') {
        i += 1;
    }
    let marker: String = chars[start..i].iter().collect();
    let count: usize = marker[1..]
        .split(':')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);

    let mut token = marker;
    for _ in 0..count {
        let mut j = i;
        while chars.get(j).is_some_and(|c| c.is_whitespace()) {
            j += 1;
        }
        match scan_note(chars, j) {
            Some(end) => {
                token.extend(&chars[j..end]);
                i = end;
            }
            None => break,
        }
    }

    let mut j = i;
    while chars.get(j).is_some_and(|c| c.is_whitespace()) {
        j += 1;
    }
    if chars.get(j) == Some(&')') {
        token.push(')');
        i = j + 1;
    }
    (token, i)
}

fn scan_bracket(chars: &[char], start: usize) -> usize {
    match chars[start..].iter().position(|&c| c == ']') {
        Some(offset) => start + offset + 1,
        None => scan_symbol(chars, start),
    }
}

fn scan_quoted(chars: &[char], start: usize) -> usize {
    match chars[start + 1..].iter().position(|&c| c == '"') {
        Some(offset) => start + offset + 2,
        None => chars.len(),
    }
}

fn scan_symbol(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    while i < chars.len() && !chars[i].is_whitespace() && !is_note_start(chars[i]) && chars[i] != '(' {
        i += 1;
    }
    i
}
