//! Parser for the text description format.

use super::TextProgram;
use crate::core::{PhvWidth, SourceLoc, Target, Ternary};
use crate::graph::{
    ChecksumKind, ChecksumOp, CounterOp, Direction, KeyField, MatchDecl, Next, ParserGraph, StateBody,
};
use thiserror::Error;

/// A syntax or declaration error in a description file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct TextError {
    pub line: u32,
    pub message: String,
}

pub fn parse_program(text: &str) -> Result<TextProgram, TextError> {
    let parser = Parser::new(text);
    parser.parse()
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    line: u32,
    program: TextProgram,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            line: 1,
            program: TextProgram::default(),
        }
    }

    fn parse(mut self) -> Result<TextProgram, TextError> {
        self.skip_whitespace(true);
        while !self.is_eof() {
            let keyword = self.read_identifier()?;
            match keyword {
                "target" => {
                    let name = self.read_name()?;
                    let target: Target = name.parse().map_err(|e: String| self.error(e))?;
                    self.program.target = Some(target);
                }
                "phv" => {
                    let name = self.read_name()?;
                    let bits = self.read_number()?;
                    let width = PhvWidth::from_bits(bits)
                        .ok_or_else(|| self.error(format!("register width must be 8, 16 or 32, not {}", bits)))?;
                    self.program
                        .registry
                        .define_container(name, width)
                        .map_err(|e| self.error(e.to_string()))?;
                }
                "stack" => {
                    let name = self.read_name()?;
                    self.expect_keyword("depth")?;
                    let depth = self.read_number()?;
                    self.expect_keyword("valid")?;
                    let valid = self.read_name()?;
                    self.program
                        .registry
                        .define_stack(name, depth, valid)
                        .map_err(|e| self.error(e.to_string()))?;
                }
                "parser" => {
                    let graph = self.parse_parser()?;
                    self.program.parsers.push(graph);
                }
                other => return Err(self.error(format!("unknown statement '{}'", other))),
            }
            self.skip_whitespace(true);
        }
        Ok(self.program)
    }

    fn error(&self, message: impl Into<String>) -> TextError {
        TextError {
            line: self.line,
            message: message.into(),
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            if ch == '\n' {
                self.line += 1;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self, skip_newlines: bool) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                // comment runs to the end of the line
                while let Some(ch) = self.current_char() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else if ch.is_whitespace() {
                if ch == '\n' && !skip_newlines {
                    break;
                }
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace(true);
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), TextError> {
        if !self.try_read(ch) {
            return Err(self.error(format!("expected '{}' but found {:?}", ch, self.current_char())));
        }
        Ok(())
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if pred(ch) {
                self.advance();
            } else {
                break;
            }
        }
        &self.text[start..self.pos]
    }

    fn read_identifier(&mut self) -> Result<&'a str, TextError> {
        self.skip_whitespace(true);
        match self.current_char() {
            Some(ch) if ch.is_alphabetic() => {}
            Some(ch) => return Err(self.error(format!("expected identifier but found '{}'", ch))),
            None => return Err(self.error("expected identifier but found end of input")),
        }
        Ok(self.read_while(|c| c.is_alphanumeric() || c == '_'))
    }

    /// State or register name; may contain dots.
    fn read_name(&mut self) -> Result<&'a str, TextError> {
        self.skip_whitespace(true);
        let name = self.read_while(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '$');
        if name.is_empty() {
            return Err(self.error(format!("expected name but found {:?}", self.current_char())));
        }
        Ok(name)
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), TextError> {
        let found = self.read_identifier()?;
        if found != keyword {
            return Err(self.error(format!("expected '{}' but found '{}'", keyword, found)));
        }
        Ok(())
    }

    /// Next identifier on the current line without consuming it.
    fn peek_identifier(&mut self) -> Option<&'a str> {
        let (pos, line) = (self.pos, self.line);
        self.skip_whitespace(false);
        let word = match self.current_char() {
            Some(ch) if ch.is_alphabetic() => Some(self.read_while(|c| c.is_alphanumeric() || c == '_')),
            _ => None,
        };
        self.pos = pos;
        self.line = line;
        word
    }

    fn read_number(&mut self) -> Result<u32, TextError> {
        self.skip_whitespace(true);
        let token = self.read_while(|c| c.is_ascii_hexdigit() || c == 'x' || c == 'X' || c == '_');
        let digits: String = token.chars().filter(|c| *c != '_').collect();
        let parsed = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => digits.parse::<u32>(),
        };
        parsed.map_err(|_| self.error(format!("invalid number '{}'", token)))
    }

    fn read_byte(&mut self) -> Result<u8, TextError> {
        let n = self.read_number()?;
        u8::try_from(n).map_err(|_| self.error(format!("{} does not fit in a byte", n)))
    }

    fn read_signed(&mut self) -> Result<i16, TextError> {
        let negative = self.try_read('-');
        let n = self.read_number()?;
        let n = i32::try_from(n).map_err(|_| self.error(format!("{} is out of range", n)))?;
        let v = if negative { -n } else { n };
        i16::try_from(v).map_err(|_| self.error(format!("{} is out of range", v)))
    }

    fn read_ternary(&mut self, default_width: u8) -> Result<Ternary, TextError> {
        self.skip_whitespace(true);
        let token = self.read_while(|c| c.is_ascii_alphanumeric() || c == '*' || c == '_');
        Ternary::parse(token, default_width).map_err(|e| self.error(format!("'{}': {}", token, e)))
    }

    /// `a..b` byte range.
    fn read_range(&mut self) -> Result<(u8, u8), TextError> {
        let start = self.read_byte()?;
        self.expect('.')?;
        self.expect('.')?;
        let end = self.read_byte()?;
        if end <= start {
            return Err(self.error(format!("empty byte range {}..{}", start, end)));
        }
        Ok((start, end))
    }

    fn parse_parser(&mut self) -> Result<ParserGraph, TextError> {
        let name = self.read_name()?;
        let direction = match self.peek_identifier() {
            Some("ingress") => {
                self.read_identifier()?;
                Direction::Ingress
            }
            Some("egress") => {
                self.read_identifier()?;
                Direction::Egress
            }
            _ if name == "egress" => Direction::Egress,
            _ => Direction::Ingress,
        };
        let mut graph = ParserGraph::new(name, direction);
        self.expect('{')?;

        loop {
            if self.try_read('}') {
                break;
            }
            if self.is_eof() {
                return Err(self.error(format!("unterminated parser '{}'", name)));
            }
            match self.read_identifier()? {
                "start" => {
                    let start = self.read_name()?;
                    graph.set_start(start);
                }
                "state" => self.parse_state(&mut graph)?,
                other => return Err(self.error(format!("unknown parser statement '{}'", other))),
            }
        }
        Ok(graph)
    }

    fn parse_state(&mut self, graph: &mut ParserGraph) -> Result<(), TextError> {
        let line = self.line;
        let name = self.read_name()?;
        let mut body = StateBody::new().at(SourceLoc::line(line));

        loop {
            if self.try_read('{') {
                break;
            }
            match self.read_identifier()? {
                "code" => body = body.code(self.read_ternary(8)?),
                "ignore_max_depth" => body = body.ignore_max_depth(),
                "key" => {
                    while let Some(kind @ ("byte" | "half")) = self.peek_identifier() {
                        self.read_identifier()?;
                        self.expect('@')?;
                        let offset = self.read_byte()?;
                        body = body.key(if kind == "byte" {
                            KeyField::byte(offset)
                        } else {
                            KeyField::half(offset)
                        });
                    }
                }
                other => return Err(self.error(format!("unknown state option '{}'", other))),
            }
        }

        let key_bits: u32 = body.key.iter().map(|k| u32::from(k.bytes()) * 8).sum();
        let value_width = if key_bits == 0 { 8 } else { key_bits.min(64) as u8 };

        loop {
            if self.try_read('}') {
                break;
            }
            if self.is_eof() {
                return Err(self.error(format!("unterminated state '{}'", name)));
            }
            let line = self.line;
            let decl = match self.read_identifier()? {
                "match" => MatchDecl::exact(self.read_ternary(value_width)?),
                "valueset" => {
                    let set = self.read_name()?;
                    let size = self.read_number()?;
                    let size = u16::try_from(size).map_err(|_| self.error("value set too large"))?;
                    if size == 0 {
                        return Err(self.error(format!("value set '{}' needs at least one entry", set)));
                    }
                    MatchDecl::value_set(set, size)
                }
                "default" => {
                    if body.default.is_some() {
                        return Err(self.error(format!("state '{}' has two default matches", name)));
                    }
                    let decl = self.parse_match_tail(MatchDecl::default_match())?;
                    body = body.with_default(decl.at(SourceLoc::line(line)));
                    continue;
                }
                other => return Err(self.error(format!("unknown match kind '{}'", other))),
            };
            let decl = self.parse_match_tail(decl)?;
            body = body.with_match(decl.at(SourceLoc::line(line)));
        }

        graph
            .define_state(name, body)
            .map_err(|e| TextError {
                line,
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Options after a match header, and its optional `{ ... }` body.
    fn parse_match_tail(&mut self, mut decl: MatchDecl) -> Result<MatchDecl, TextError> {
        loop {
            self.skip_whitespace(false);
            match self.current_char() {
                None | Some('\n') | Some('}') => break,
                Some('{') => {
                    self.advance();
                    decl = self.parse_match_body(decl)?;
                    break;
                }
                Some('-') => {
                    self.advance();
                    if self.current_char() != Some('>') {
                        return Err(self.error("expected '->'"));
                    }
                    self.advance();
                    self.skip_whitespace(false);
                    let next = match self.current_char() {
                        Some(c) if c.is_ascii_digit() => Next::Pattern(self.read_ternary(8)?),
                        _ => match self.read_name()? {
                            "done" => Next::Done,
                            state => Next::name(state),
                        },
                    };
                    decl = decl.next(next);
                }
                Some(_) => match self.read_identifier()? {
                    "shift" => decl = decl.shift(self.read_byte()?),
                    "buf" => decl = decl.buf_req(self.read_byte()?),
                    "loop" => decl = decl.offset_inc(),
                    other => return Err(self.error(format!("unknown match option '{}'", other))),
                },
            }
        }
        Ok(decl)
    }

    fn parse_match_body(&mut self, mut decl: MatchDecl) -> Result<MatchDecl, TextError> {
        loop {
            if self.try_read('}') {
                break;
            }
            if self.is_eof() {
                return Err(self.error("unterminated match body"));
            }
            match self.read_identifier()? {
                "save" => {
                    let dest = self.read_name()?;
                    let (start, end) = self.read_range()?;
                    decl = decl.save(dest, start, end - start);
                }
                "set" => {
                    let dest = self.read_name()?;
                    let value = self.read_number()?;
                    decl = decl.set(dest, value);
                }
                "csum" => {
                    let kind = match self.read_identifier()? {
                        "verify" => ChecksumKind::Verify,
                        "residual" => ChecksumKind::Residual,
                        "clot" => ChecksumKind::Clot,
                        other => return Err(self.error(format!("unknown checksum kind '{}'", other))),
                    };
                    let unit = self.read_byte()?;
                    let (start, end) = self.read_range()?;
                    let dest = if self.try_read('-') {
                        self.expect('>')?;
                        Some(self.read_name()?.to_string())
                    } else {
                        None
                    };
                    decl = decl.checksum(ChecksumOp {
                        unit,
                        kind,
                        start,
                        end,
                        dest,
                        container: None,
                    });
                }
                "ctr" => {
                    let op = match self.read_identifier()? {
                        "load" => CounterOp::LoadImm(self.read_signed()?),
                        "loadbuf" => {
                            let offset = self.read_byte()?;
                            let mask = if self.peek_identifier() == Some("mask") {
                                self.read_identifier()?;
                                self.read_byte()?
                            } else {
                                0xff
                            };
                            CounterOp::LoadBuffer { offset, mask }
                        }
                        "add" => CounterOp::Add(self.read_signed()?),
                        "push" => {
                            let hdr_len_inc = self.peek_identifier() == Some("hdrlen");
                            if hdr_len_inc {
                                self.read_identifier()?;
                            }
                            CounterOp::Push { hdr_len_inc }
                        }
                        "pop" => CounterOp::Pop,
                        other => return Err(self.error(format!("unknown counter operation '{}'", other))),
                    };
                    decl = decl.counter(op);
                }
                other => return Err(self.error(format!("unknown match statement '{}'", other))),
            }
        }
        Ok(decl)
    }
}
