//! Typed argument binding.
//!
//! Commands bind their arguments by walking an [`ArgCursor`]: required
//! positionals (`expect_*`), optional tokens (`match_token`), one-of groups,
//! and trailing repeats (`rest`). A grammar mismatch surfaces as the generic
//! syntax error, mirroring how the wire protocol reports it.

use bytes::Bytes;

use crate::commands::command_error::CommandError;

pub struct ArgCursor<'a> {
    args: &'a [Bytes],
    position: usize,
}

impl<'a> ArgCursor<'a> {
    /// Positions past the command name: `args[0]` is skipped.
    pub fn new(args: &'a [Bytes]) -> Self {
        ArgCursor { args, position: 1 }
    }

    pub fn remaining(&self) -> usize {
        self.args.len() - self.position
    }

    pub fn done(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek(&self) -> Option<&'a Bytes> {
        self.args.get(self.position)
    }

    pub fn next(&mut self) -> Option<&'a Bytes> {
        let arg = self.args.get(self.position)?;
        self.position += 1;
        Some(arg)
    }

    pub fn expect_bytes(&mut self) -> Result<Bytes, CommandError> {
        self.next().cloned().ok_or(CommandError::Syntax)
    }

    pub fn expect_string(&mut self) -> Result<String, CommandError> {
        let raw = self.next().ok_or(CommandError::Syntax)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CommandError::Syntax)
    }

    pub fn expect_int(&mut self) -> Result<i64, CommandError> {
        let raw = self.next().ok_or(CommandError::Syntax)?;
        parse_int(raw)
    }

    pub fn expect_usize(&mut self) -> Result<usize, CommandError> {
        let value = self.expect_int()?;
        usize::try_from(value).map_err(|_| CommandError::NotAnInteger)
    }

    pub fn expect_float(&mut self) -> Result<f64, CommandError> {
        let raw = self.next().ok_or(CommandError::Syntax)?;
        parse_float(raw)
    }

    /// Consumes the next argument if it equals `token` case-insensitively.
    pub fn match_token(&mut self, token: &str) -> bool {
        let matched = self
            .peek()
            .is_some_and(|arg| arg.eq_ignore_ascii_case(token.as_bytes()));
        if matched {
            self.position += 1;
        }
        matched
    }

    /// The next argument must equal `token`.
    pub fn expect_token(&mut self, token: &str) -> Result<(), CommandError> {
        if self.match_token(token) {
            Ok(())
        } else {
            Err(CommandError::Syntax)
        }
    }

    /// Uppercased view of the next argument, for one-of dispatch on
    /// subcommands and option tokens.
    pub fn next_token(&mut self) -> Result<String, CommandError> {
        let raw = self.next().ok_or(CommandError::Syntax)?;
        std::str::from_utf8(raw)
            .map(|token| token.to_uppercase())
            .map_err(|_| CommandError::Syntax)
    }

    /// Everything left, consumed.
    pub fn rest(&mut self) -> Vec<Bytes> {
        let remaining = self.args[self.position..].to_vec();
        self.position = self.args.len();
        remaining
    }

    /// Trailing arguments must all be consumed by now.
    pub fn finish(&self) -> Result<(), CommandError> {
        if self.done() {
            Ok(())
        } else {
            Err(CommandError::Syntax)
        }
    }
}

pub fn parse_int(raw: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or(CommandError::NotAnInteger)
}

pub fn parse_float(raw: &[u8]) -> Result<f64, CommandError> {
    let text = std::str::from_utf8(raw).map_err(|_| CommandError::NotAFloat)?;
    match text.to_lowercase().as_str() {
        "inf" | "+inf" | "infinity" | "+infinity" => return Ok(f64::INFINITY),
        "-inf" | "-infinity" => return Ok(f64::NEG_INFINITY),
        _ => {}
    }
    text.parse::<f64>()
        .ok()
        .filter(|value| !value.is_nan())
        .ok_or(CommandError::NotAFloat)
}
