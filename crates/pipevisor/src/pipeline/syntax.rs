//! Syntax checker for pipeline configurations.
//!
//! Accepts the `input { } filter { } output { }` language without compiling
//! it: plugin blocks with `key => value` attributes, conditionals with field
//! references, and `#` comments.

use std::fmt;

/// A configuration that does not parse
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Expected {expected} but found {found} at line {line}, column {column}")]
pub struct ConfigSyntaxError {
    pub expected: String,
    pub found: String,
    pub line: usize,
    pub column: usize,
}

pub type Result<T> = std::result::Result<T, ConfigSyntaxError>;

/// Plugin counts per section of a valid configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigSummary {
    pub inputs: usize,
    pub filters: usize,
    pub outputs: usize,
}

impl fmt::Display for ConfigSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} input(s), {} filter(s), {} output(s)",
            self.inputs, self.filters, self.outputs
        )
    }
}

/// Check `source` for syntax errors.
pub fn check_config(source: &str) -> Result<ConfigSummary> {
    Parser::new(source).config()
}

#[derive(Debug, Clone, Copy)]
enum Section {
    Input,
    Filter,
    Output,
}

const BOOLEAN_OPERATORS: &[&str] = &["and", "or", "xor", "nand"];
const COMPARISON_OPERATORS: &[&str] = &["==", "!=", "<=", ">=", "<", ">"];
const REGEX_OPERATORS: &[&str] = &["=~", "!~"];

struct Parser {
    chars: Vec<char>,
    pos: usize,
    summary: ConfigSummary,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            summary: ConfigSummary::default(),
        }
    }

    fn config(mut self) -> Result<ConfigSummary> {
        self.ws();
        while !self.at_end() {
            let section = self.section_name()?;
            self.ws();
            self.expect('{')?;
            self.block_body(section)?;
            self.ws();
        }
        Ok(self.summary)
    }

    fn section_name(&mut self) -> Result<Section> {
        let start = self.pos;
        let section = match self.bareword().as_deref() {
            Some("input") => Section::Input,
            Some("filter") => Section::Filter,
            Some("output") => Section::Output,
            _ => {
                self.pos = start;
                return Err(self.error("one of input, filter, output"));
            }
        };
        Ok(section)
    }

    /// Plugins and conditionals up to and including the closing brace.
    fn block_body(&mut self, section: Section) -> Result<()> {
        loop {
            self.ws();
            if self.eat('}') {
                return Ok(());
            }
            if self.at_end() {
                return Err(self.error("'}'"));
            }
            if self.eat_keyword("if") {
                self.branch(section)?;
            } else {
                self.plugin()?;
                self.count(section);
            }
        }
    }

    fn branch(&mut self, section: Section) -> Result<()> {
        self.guarded_block(section)?;
        loop {
            let save = self.pos;
            self.ws();
            if !self.eat_keyword("else") {
                self.pos = save;
                return Ok(());
            }
            self.ws();
            if self.eat_keyword("if") {
                self.guarded_block(section)?;
            } else {
                self.expect('{')?;
                return self.block_body(section);
            }
        }
    }

    fn guarded_block(&mut self, section: Section) -> Result<()> {
        self.ws();
        self.condition()?;
        self.ws();
        self.expect('{')?;
        self.block_body(section)
    }

    fn plugin(&mut self) -> Result<()> {
        self.name("a plugin name, 'if' or '}'")?;
        self.ws();
        self.expect('{')?;
        self.attributes()
    }

    fn attributes(&mut self) -> Result<()> {
        loop {
            self.ws();
            if self.eat('}') {
                return Ok(());
            }
            self.name("an attribute name or '}'")?;
            self.ws();
            self.expect_str("=>")?;
            self.ws();
            self.value()?;
        }
    }

    fn name(&mut self, expected: &str) -> Result<()> {
        match self.peek() {
            Some('"' | '\'') => self.string(),
            _ if self.bareword().is_some() => Ok(()),
            _ => Err(self.error(expected)),
        }
    }

    fn value(&mut self) -> Result<()> {
        match self.peek() {
            Some('"' | '\'') => self.string(),
            Some('[') => self.array(),
            Some('{') => self.hash(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if is_word_start(c) => {
                self.bareword();
                // `codec => json { charset => "UTF-8" }`
                let save = self.pos;
                self.ws();
                if self.eat('{') {
                    self.attributes()
                } else {
                    self.pos = save;
                    Ok(())
                }
            }
            _ => Err(self.error("a value")),
        }
    }

    fn array(&mut self) -> Result<()> {
        self.expect('[')?;
        self.ws();
        if self.eat(']') {
            return Ok(());
        }
        loop {
            self.value()?;
            self.ws();
            if self.eat(',') {
                self.ws();
                continue;
            }
            if self.eat(']') {
                return Ok(());
            }
            return Err(self.error("',' or ']'"));
        }
    }

    fn hash(&mut self) -> Result<()> {
        self.expect('{')?;
        loop {
            self.ws();
            if self.eat('}') {
                return Ok(());
            }
            match self.peek() {
                Some('"' | '\'') => self.string()?,
                Some(c) if c == '-' || c.is_ascii_digit() => self.number()?,
                Some(c) if is_word_start(c) => {
                    self.bareword();
                }
                _ => return Err(self.error("a hash key or '}'")),
            }
            self.ws();
            self.expect_str("=>")?;
            self.ws();
            self.value()?;
        }
    }

    fn condition(&mut self) -> Result<()> {
        self.expression()?;
        loop {
            let save = self.pos;
            self.ws();
            if BOOLEAN_OPERATORS.iter().any(|op| self.eat_keyword(op)) {
                self.ws();
                self.expression()?;
            } else {
                self.pos = save;
                return Ok(());
            }
        }
    }

    fn expression(&mut self) -> Result<()> {
        if self.eat('(') {
            return self.parenthesized();
        }

        if self.peek() == Some('!') && !matches!(self.peek_at(1), Some('=' | '~')) {
            self.pos += 1;
            self.ws();
            if self.eat('(') {
                return self.parenthesized();
            }
            if self.selector() {
                return Ok(());
            }
            return Err(self.error("a field reference or '(' after '!'"));
        }

        self.rvalue()?;

        let save = self.pos;
        self.ws();
        if REGEX_OPERATORS.iter().any(|op| self.eat_str(op)) {
            self.ws();
            return match self.peek() {
                Some('/') => self.regex(),
                Some('"' | '\'') => self.string(),
                _ => Err(self.error("a regular expression or string")),
            };
        }
        if COMPARISON_OPERATORS.iter().any(|op| self.eat_str(op)) || self.eat_keyword("in") {
            self.ws();
            return self.rvalue();
        }
        if self.eat_keyword("not") {
            self.ws();
            if !self.eat_keyword("in") {
                return Err(self.error("'in' after 'not'"));
            }
            self.ws();
            return self.rvalue();
        }

        self.pos = save;
        Ok(())
    }

    fn parenthesized(&mut self) -> Result<()> {
        self.ws();
        self.condition()?;
        self.ws();
        self.expect(')')
    }

    fn rvalue(&mut self) -> Result<()> {
        match self.peek() {
            Some('"' | '\'') => self.string(),
            Some('/') => self.regex(),
            Some('[') => {
                if self.selector() {
                    Ok(())
                } else {
                    self.array()
                }
            }
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if is_word_start(c) => {
                self.bareword();
                self.ws();
                if !self.eat('(') {
                    return Err(self.error("'(' for a method call"));
                }
                self.method_arguments()
            }
            _ => Err(self.error("a value, field reference or regular expression")),
        }
    }

    fn method_arguments(&mut self) -> Result<()> {
        self.ws();
        if self.eat(')') {
            return Ok(());
        }
        loop {
            self.rvalue()?;
            self.ws();
            if self.eat(',') {
                self.ws();
                continue;
            }
            return self.expect(')');
        }
    }

    /// `[a][b]...`; restores the position and returns false if not a selector.
    fn selector(&mut self) -> bool {
        let start = self.pos;
        let mut segments = 0;
        while self.peek() == Some('[') {
            self.pos += 1;
            let mut len = 0;
            while let Some(c) = self.peek() {
                if matches!(c, '[' | ']' | ',') {
                    break;
                }
                self.pos += 1;
                len += 1;
            }
            if len == 0 || !self.eat(']') {
                self.pos = start;
                return false;
            }
            segments += 1;
        }
        segments > 0
    }

    fn string(&mut self) -> Result<()> {
        let Some(quote) = self.next() else {
            return Err(self.error("a string"));
        };
        loop {
            match self.next() {
                None => return Err(self.error(&format!("closing {quote}"))),
                Some('\\') => {
                    self.next();
                }
                Some(c) if c == quote => return Ok(()),
                Some(_) => {}
            }
        }
    }

    fn regex(&mut self) -> Result<()> {
        self.expect('/')?;
        loop {
            match self.next() {
                None => return Err(self.error("closing '/'")),
                Some('\\') => {
                    self.next();
                }
                Some('/') => return Ok(()),
                Some(_) => {}
            }
        }
    }

    fn number(&mut self) -> Result<()> {
        self.eat('-');
        let digits = self.skip_while(|c| c.is_ascii_digit());
        if digits == 0 {
            return Err(self.error("a number"));
        }
        if self.eat('.') {
            self.skip_while(|c| c.is_ascii_digit());
        }
        Ok(())
    }

    fn bareword(&mut self) -> Option<String> {
        match self.peek() {
            Some(c) if is_word_start(c) => {
                let start = self.pos;
                self.skip_while(is_word_char);
                Some(self.chars[start..self.pos].iter().collect())
            }
            _ => None,
        }
    }

    fn count(&mut self, section: Section) {
        match section {
            Section::Input => self.summary.inputs += 1,
            Section::Filter => self.summary.filters += 1,
            Section::Output => self.summary.outputs += 1,
        }
    }

    // Lexical helpers

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        let matches = s
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c));
        if matches {
            self.pos += s.chars().count();
        }
        matches
    }

    /// Like `eat_str`, but the keyword must not run into a longer word.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let len = keyword.chars().count();
        let followed_by_word = self.peek_at(len).is_some_and(is_word_char);
        if followed_by_word {
            return false;
        }
        self.eat_str(keyword)
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(&format!("'{c}'")))
        }
    }

    fn expect_str(&mut self, s: &str) -> Result<()> {
        if self.eat_str(s) {
            Ok(())
        } else {
            Err(self.error(&format!("'{s}'")))
        }
    }

    fn skip_while(&mut self, pred: impl Fn(char) -> bool) -> usize {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        self.pos - start
    }

    /// Skip whitespace and `#` comments.
    fn ws(&mut self) {
        loop {
            self.skip_while(char::is_whitespace);
            if self.peek() == Some('#') {
                self.skip_while(|c| c != '\n');
            } else {
                return;
            }
        }
    }

    fn error(&self, expected: &str) -> ConfigSyntaxError {
        let consumed = &self.chars[..self.pos.min(self.chars.len())];
        let line = consumed.iter().filter(|&&c| c == '\n').count() + 1;
        let column = consumed.iter().rev().take_while(|&&c| c != '\n').count() + 1;
        let found = match self.peek() {
            Some(c) => format!("'{c}'"),
            None => "end of input".to_string(),
        };
        ConfigSyntaxError {
            expected: expected.to_string(),
            found,
            line,
            column,
        }
    }
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
