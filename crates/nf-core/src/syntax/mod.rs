//! Lightweight syntax check for sandbox code.
//!
//! The sandbox runs Python-like scripts. Node construction only needs to catch
//! the mistakes that guarantee a sandbox round-trip is wasted: unbalanced
//! brackets and unterminated string literals. Anything subtler is reported by
//! the sandbox itself as a code execution error.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Single(char),
    Triple(char),
}

/// Scan `code` and return every structural error found, with 1-based line numbers.
pub fn check(code: &str) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut quote: Option<(Quote, usize)> = None;
    let mut line = 1usize;

    let chars: Vec<char> = code.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some((q, opened_at)) = quote {
            match (q, c) {
                (_, '\\') => {
                    // Escaped newline continues the literal on the next line.
                    if chars.get(i + 1) == Some(&'\n') {
                        line += 1;
                    }
                    i += 1;
                }
                (Quote::Single(_), '\n') => {
                    errors.push(format!("line {opened_at}: unterminated string literal"));
                    quote = None;
                }
                (Quote::Single(open), c) if c == open => quote = None,
                (Quote::Triple(open), c) if c == open && is_triple(&chars, i, open) => {
                    quote = None;
                    i += 2;
                }
                _ => {}
            }
            if c == '\n' {
                line += 1;
            }
            i += 1;
            continue;
        }

        match c {
            '\n' => line += 1,
            '#' => {
                while i + 1 < chars.len() && chars[i + 1] != '\n' {
                    i += 1;
                }
            }
            '\'' | '"' => {
                if is_triple(&chars, i, c) {
                    quote = Some((Quote::Triple(c), line));
                    i += 2;
                } else {
                    quote = Some((Quote::Single(c), line));
                }
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, opened_at)) => errors.push(format!(
                        "line {line}: '{c}' does not match '{open}' opened on line {opened_at}"
                    )),
                    None => errors.push(format!("line {line}: unmatched '{c}'")),
                }
            }
            _ => {}
        }
        i += 1;
    }

    if let Some((_, opened_at)) = quote {
        errors.push(format!("line {opened_at}: unterminated string literal"));
    }
    for (open, opened_at) in stack {
        errors.push(format!("line {opened_at}: unclosed '{open}'"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_triple(chars: &[char], i: usize, q: char) -> bool {
    chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_balanced_code() {
        let code = "result = {'total': sum([1, 2, (3)])}\nbranch_decision = context['amount'] > 1000\n";
        assert!(check(code).is_ok());
    }

    #[test]
    fn brackets_inside_strings_and_comments_are_ignored() {
        assert!(check("s = ')]}'  # ([{\nt = \"\\\"(\"").is_ok());
        assert!(check("doc = \"\"\"\nmulti ( line\n\"\"\"\n").is_ok());
    }

    #[test]
    fn reports_unclosed_and_mismatched() {
        let errs = check("x = (1,\ny = [2)").unwrap_err();
        assert_eq!(errs, vec!["line 2: ')' does not match '[' opened on line 2", "line 1: unclosed '('"]);

        assert_eq!(check("}").unwrap_err(), vec!["line 1: unmatched '}'"]);
    }

    #[test]
    fn escaped_newline_keeps_line_numbers() {
        let code = "s = 'first \\\nsecond'\nx = )";
        assert_eq!(check(code).unwrap_err(), vec!["line 3: unmatched ')'"]);
    }

    #[test]
    fn reports_unterminated_strings() {
        assert_eq!(
            check("a = 'open\nb = 1").unwrap_err(),
            vec!["line 1: unterminated string literal"]
        );
        assert_eq!(
            check("a = \"\"\"never closed").unwrap_err(),
            vec!["line 1: unterminated string literal"]
        );
    }
}
