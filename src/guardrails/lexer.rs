//! Regex tokenizer for statement text.
//!
//! This is not a SQL parser. It only splits text into words, quoted
//! identifiers, literals and punctuation so the validator can find the leading
//! keyword, stacked statements and relations in table position. Comments are
//! dropped and string literals collapse to a single opaque token, so neither
//! can smuggle a lookalike reference past the extractor.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(concat!(
        r"(?P<comment>--[^\n]*|(?s:/\*.*?\*/))",
        r#"|(?P<string>'(?:[^'\\]|(?s:\\.))*'|"(?:[^"\\]|(?s:\\.))*")"#,
        r"|(?P<quoted>`(?:[^`]|``)*`)",
        // Digit-leading names such as `2024_orders` are identifiers, not numbers.
        r"|(?P<word>[0-9]*[A-Za-z_][A-Za-z0-9_]*)",
        r"|(?P<number>[0-9]+(?:\.[0-9]+)?(?:[eE][+-]?[0-9]+)?)",
        r"|(?P<punct>[.,();])",
        r"|(?P<other>\S)",
    ))
    .unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Word(&'a str),
    /// Backtick-quoted identifier, unescaped.
    Quoted(String),
    /// String or numeric literal, with its source text.
    Literal(&'a str),
    Dot,
    Comma,
    LParen,
    RParen,
    Semicolon,
    Other(&'a str),
}

impl<'a> Token<'a> {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    /// Identifier text for words and quoted identifiers.
    pub fn ident(&self) -> Option<String> {
        match self {
            Token::Word(w) => Some((*w).to_string()),
            Token::Quoted(q) => Some(q.clone()),
            _ => None,
        }
    }

    pub fn upper_word(&self) -> Option<String> {
        match self {
            Token::Word(w) => Some(w.to_ascii_uppercase()),
            _ => None,
        }
    }

    /// Source text of the token; words are upper-cased and quoted identifiers unescaped.
    pub fn text(&self) -> String {
        match self {
            Token::Word(w) => w.to_ascii_uppercase(),
            Token::Quoted(q) => q.clone(),
            Token::Literal(l) | Token::Other(l) => (*l).to_string(),
            Token::Dot => ".".to_string(),
            Token::Comma => ",".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Semicolon => ";".to_string(),
        }
    }
}

pub fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    for caps in TOKEN_RE.captures_iter(sql) {
        if caps.name("comment").is_some() {
            continue;
        }
        if let Some(l) = caps.name("string").or_else(|| caps.name("number")) {
            tokens.push(Token::Literal(l.as_str()));
        } else if let Some(q) = caps.name("quoted") {
            let inner = &q.as_str()[1..q.as_str().len() - 1];
            tokens.push(Token::Quoted(inner.replace("``", "`")));
        } else if let Some(w) = caps.name("word") {
            tokens.push(Token::Word(w.as_str()));
        } else if let Some(p) = caps.name("punct") {
            tokens.push(match p.as_str() {
                "." => Token::Dot,
                "," => Token::Comma,
                "(" => Token::LParen,
                ")" => Token::RParen,
                _ => Token::Semicolon,
            });
        } else if let Some(o) = caps.name("other") {
            tokens.push(Token::Other(o.as_str()));
        }
    }
    tokens
}

/// First token after whitespace and comments, upper-cased.
///
/// Returns `None` for an empty statement.
pub fn leading_keyword(tokens: &[Token<'_>]) -> Option<String> {
    tokens.first().map(Token::text)
}

/// True when a `;` is followed by anything but more `;`.
pub fn has_stacked_statements(tokens: &[Token<'_>]) -> bool {
    match tokens.iter().position(|t| *t == Token::Semicolon) {
        Some(idx) => tokens[idx..].iter().any(|t| *t != Token::Semicolon),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_keyword_skips_whitespace_and_comments() {
        let tokens = tokenize("  -- note\n /* block\n comment */ select * from t");
        assert_eq!(leading_keyword(&tokens), Some("SELECT".to_string()));
    }

    #[test]
    fn test_empty_statement_has_no_keyword() {
        assert_eq!(leading_keyword(&tokenize("   ")), None);
        assert_eq!(leading_keyword(&tokenize("-- only a comment")), None);
    }

    #[test]
    fn test_backtick_identifiers_unescaped() {
        let tokens = tokenize("`main`.`we``ird`");
        assert_eq!(
            tokens,
            vec![
                Token::Quoted("main".to_string()),
                Token::Dot,
                Token::Quoted("we`ird".to_string())
            ]
        );
    }

    #[test]
    fn test_strings_are_opaque() {
        let tokens = tokenize("SELECT 'a.b.c; FROM x.y' FROM t");
        assert_eq!(
            tokens,
            vec![
                Token::Word("SELECT"),
                Token::Literal("'a.b.c; FROM x.y'"),
                Token::Word("FROM"),
                Token::Word("t")
            ]
        );
    }

    #[test]
    fn test_digit_leading_names_are_words() {
        let tokens = tokenize("SELECT 10, 1.5 FROM 1secret.hr.2024_salaries");
        assert_eq!(
            tokens,
            vec![
                Token::Word("SELECT"),
                Token::Literal("10"),
                Token::Comma,
                Token::Literal("1.5"),
                Token::Word("FROM"),
                Token::Word("1secret"),
                Token::Dot,
                Token::Word("hr"),
                Token::Dot,
                Token::Word("2024_salaries"),
            ]
        );
    }

    #[test]
    fn test_stacked_statements() {
        assert!(!has_stacked_statements(&tokenize("SELECT 1;")));
        assert!(!has_stacked_statements(&tokenize("SELECT 1;;  -- trailing")));
        assert!(!has_stacked_statements(&tokenize("SELECT ';' AS sep")));
        assert!(has_stacked_statements(&tokenize("SELECT 1; DROP TABLE x")));
    }
}
