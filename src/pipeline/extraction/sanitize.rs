/// Sanitize OCR and PDF text before field extraction.
/// Strips control characters and stray glyphs, trims lines, drops blank
/// lines. Keeps the punctuation lab reports use for values, units, ranges
/// and table borders.
pub fn sanitize_extracted_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| {
            c.is_alphanumeric()
                || *c == '\n'
                || *c == '\t'
                || (c.is_whitespace() && !c.is_control())
                || matches!(
                    c,
                    '.' | ','
                        | ';'
                        | ':'
                        | '-'
                        | '/'
                        | '('
                        | ')'
                        | '['
                        | ']'
                        | '+'
                        | '='
                        | '%'
                        | '#'
                        | '&'
                        | '\''
                        | '"'
                        | '<'
                        | '>'
                        | '*'
                        | '_'
                        | '|'
                        | '^'
                        | '~'
                        | '°'
                        | '²'
                        | '³'
                        | 'µ'
                        | '≤'
                        | '≥'
                        | '\u{2013}' // En-dash
                        | '\u{2014}' // Em-dash
                )
        })
        .collect::<String>()
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
