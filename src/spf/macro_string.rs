//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of spfcheck.
//
// spfcheck is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// spfcheck is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// spfcheck. If not, see <http://www.gnu.org/licenses/>.

//! The macro language used by domain-specs and explanation strings.
//! RFC 7208 § 7
//!
//! ```text
//!   macro-string     = *( macro-expand / macro-literal )
//!   macro-expand     = ( "%{" macro-letter transformers *delimiter "}" )
//!                      / "%%" / "%_" / "%-"
//!   macro-literal    = %x21-24 / %x26-7E
//!   macro-letter     = "s" / "l" / "o" / "d" / "i" / "p" / "h" /
//!                      "c" / "r" / "t" / "v"
//!   transformers     = *DIGIT [ "r" ]
//!   delimiter        = "." / "-" / "+" / "," / "/" / "_" / "="
//! ```
//!
//! Explanation strings additionally allow spaces between macro strings and
//! the `c`, `r` and `t` letters.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use thiserror::Error;

use crate::support::error::Error;

const DELIMITERS: &str = ".-+,/_=";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MacroLetter {
    /// `s`
    Sender,
    /// `l`
    SenderLocalPart,
    /// `o`
    SenderDomain,
    /// `d`
    Domain,
    /// `i`
    Ip,
    /// `p`
    ValidatedDomain,
    /// `v`
    IpVersion,
    /// `h`
    HeloDomain,
    // Below this point: `exp` only
    /// `c`
    SmtpClientIp,
    /// `r`
    CheckerDomain,
    /// `t`
    CurrentTimestamp,
}

impl MacroLetter {
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            's' => Self::Sender,
            'l' => Self::SenderLocalPart,
            'o' => Self::SenderDomain,
            'd' => Self::Domain,
            'i' => Self::Ip,
            'p' => Self::ValidatedDomain,
            'v' => Self::IpVersion,
            'h' => Self::HeloDomain,
            'c' => Self::SmtpClientIp,
            'r' => Self::CheckerDomain,
            't' => Self::CurrentTimestamp,
            _ => return None,
        })
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Sender => 's',
            Self::SenderLocalPart => 'l',
            Self::SenderDomain => 'o',
            Self::Domain => 'd',
            Self::Ip => 'i',
            Self::ValidatedDomain => 'p',
            Self::IpVersion => 'v',
            Self::HeloDomain => 'h',
            Self::SmtpClientIp => 'c',
            Self::CheckerDomain => 'r',
            Self::CurrentTimestamp => 't',
        }
    }

    pub fn is_exp_only(self) -> bool {
        self >= Self::SmtpClientIp
    }
}

/// A `%{...}` macro expansion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placeholder {
    pub letter: MacroLetter,
    /// Keep only this many right-most parts.
    pub keep_parts: Option<usize>,
    pub reverse: bool,
    /// The characters to split on. Empty means `.`.
    pub delimiters: String,
}

impl Placeholder {
    pub fn new(letter: MacroLetter) -> Self {
        Self {
            letter,
            keep_parts: None,
            reverse: false,
            delimiters: String::new(),
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{{{}", self.letter.as_char())?;
        if let Some(keep_parts) = self.keep_parts {
            write!(f, "{}", keep_parts)?;
        }
        if self.reverse {
            f.write_str("r")?;
        }
        write!(f, "{}}}", self.delimiters)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    /// Literal text, with `%%`, `%_` and `%-` kept escaped.
    Literal(String),
    Placeholder(Placeholder),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("empty macro string")]
    Empty,
    #[error("unknown character: {0:?}")]
    UnknownCharacter(char),
    #[error("isolated percent sign")]
    IsolatedPercent,
    #[error("unterminated macro expand")]
    UnterminatedMacroExpand,
    #[error("unknown macro: {0:?}")]
    UnknownMacro(char),
    #[error("macro {0:?} is only allowed in explanation strings")]
    ExplanationOnlyMacro(char),
    #[error("invalid number of parts")]
    InvalidInteger,
    #[error("unknown macro transformer: {0:?}")]
    UnknownMacroTransformer(char),
}

/// A decoded macro string.
///
/// `Display` reproduces the text it was parsed from, except that an
/// upper-case `R` transformer is written in lower case.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MacroString {
    chunks: Vec<Chunk>,
}

impl MacroString {
    /// Parse `s` as a `macro-string`, or as an `explain-string` if `in_exp`
    /// is set.
    pub fn parse(s: &str, in_exp: bool) -> Result<Self, Error> {
        lex(s, in_exp).map_err(|reason| Error::InvalidMacroString {
            text: s.to_owned(),
            reason,
        })
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn contains_placeholders(&self) -> bool {
        self.chunks
            .iter()
            .any(|c| matches!(*c, Chunk::Placeholder(..)))
    }
}

impl fmt::Display for MacroString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in &self.chunks {
            match *chunk {
                Chunk::Literal(ref s) => f.write_str(s)?,
                Chunk::Placeholder(ref p) => write!(f, "{}", p)?,
            }
        }
        Ok(())
    }
}

pub(super) fn lex(s: &str, in_exp: bool) -> Result<MacroString, LexError> {
    if s.is_empty() {
        return Err(LexError::Empty);
    }

    let mut chunks = Vec::<Chunk>::new();
    let mut literal = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '%' => match chars.next() {
                Some(e @ ('%' | '_' | '-')) => {
                    literal.push('%');
                    literal.push(e);
                }
                Some('{') => {
                    if !literal.is_empty() {
                        chunks.push(Chunk::Literal(std::mem::take(
                            &mut literal,
                        )));
                    }
                    chunks.push(Chunk::Placeholder(lex_placeholder(
                        &mut chars, in_exp,
                    )?));
                }
                _ => return Err(LexError::IsolatedPercent),
            },
            ' ' if in_exp => literal.push(c),
            '!'..='~' => literal.push(c),
            c => return Err(LexError::UnknownCharacter(c)),
        }
    }

    if !literal.is_empty() {
        chunks.push(Chunk::Literal(literal));
    }

    Ok(MacroString { chunks })
}

/// Lex the part of a placeholder after the `%{`.
fn lex_placeholder(
    chars: &mut Peekable<Chars<'_>>,
    in_exp: bool,
) -> Result<Placeholder, LexError> {
    let letter_char = chars.next().ok_or(LexError::UnterminatedMacroExpand)?;
    let letter = MacroLetter::from_char(letter_char)
        .ok_or(LexError::UnknownMacro(letter_char))?;
    if letter.is_exp_only() && !in_exp {
        return Err(LexError::ExplanationOnlyMacro(letter_char));
    }

    let mut placeholder = Placeholder::new(letter);

    let mut digits = String::new();
    while let Some(&d) = chars.peek() {
        if !d.is_ascii_digit() {
            break;
        }
        digits.push(d);
        chars.next();
    }

    if !digits.is_empty() {
        if digits.starts_with('0') {
            return Err(LexError::InvalidInteger);
        }
        placeholder.keep_parts =
            Some(digits.parse().map_err(|_| LexError::InvalidInteger)?);
    }

    if matches!(chars.peek(), Some('r' | 'R')) {
        placeholder.reverse = true;
        chars.next();
    }

    loop {
        match chars.next() {
            None => return Err(LexError::UnterminatedMacroExpand),
            Some('}') => break,
            Some(d) if DELIMITERS.contains(d) => placeholder.delimiters.push(d),
            Some(c) => return Err(LexError::UnknownMacroTransformer(c)),
        }
    }

    Ok(placeholder)
}
