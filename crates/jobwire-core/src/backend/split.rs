/// Splits a multi-statement script on top-level `;`.
///
/// Semicolons inside single-quoted strings, double-quoted identifiers, `--`
/// line comments and `/* */` block comments do not split. Segments holding only
/// whitespace or comments are dropped.
pub fn split_statements(script: &str) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        Single,
        Double,
        Line,
        Block,
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut state = State::Code;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                ';' => {
                    if has_code {
                        out.push(current.trim().to_string());
                    }
                    current.clear();
                    has_code = false;
                    continue;
                }
                '\'' => {
                    state = State::Single;
                    has_code = true;
                }
                '"' => {
                    state = State::Double;
                    has_code = true;
                }
                '-' if chars.peek() == Some(&'-') => state = State::Line,
                '/' if chars.peek() == Some(&'*') => {
                    current.push(c);
                    if let Some(star) = chars.next() {
                        current.push(star);
                    }
                    state = State::Block;
                    continue;
                }
                c if !c.is_whitespace() => has_code = true,
                _ => {}
            },
            // '' inside a literal re-enters the literal on the next quote
            State::Single if c == '\'' => state = State::Code,
            State::Double if c == '"' => state = State::Code,
            State::Line if c == '\n' => state = State::Code,
            State::Block if c == '*' && chars.peek() == Some(&'/') => {
                current.push(c);
                if let Some(slash) = chars.next() {
                    current.push(slash);
                }
                state = State::Code;
                continue;
            }
            _ => {}
        }
        current.push(c);
    }

    if has_code {
        out.push(current.trim().to_string());
    }
    out
}
