//! Condition DSL parser.
//!
//! Recursive descent over a small grammar:
//!
//! ```text
//! condition := ALL '(' condition (',' condition)* ')'
//!            | ANY '(' condition (',' condition)* ')'
//!            | LOW_FOR_PERIOD '(' int ',' number ')'
//!            | HIGH_FOR_PERIOD '(' int ',' number ')'
//!            | DOWN_PCT '(' number ')' | UP_PCT '(' number ')'
//!            | NEGA_END_UP_PCT '(' number ')' | POSA_END_BOOMING '(' number ')'
//!            | SOLD_TO_OPEN | MORE_BUY_TO_OPEN
//! ```
//!
//! Percent arguments are fractions: `DOWN_PCT(0.1)` is down ten percent.

use crate::domain::condition::Condition;
use crate::domain::error::ParseError;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(ParseError {
                message: format!("expected '{}', found '{}'", expected, ch),
                position: self.pos,
            }),
            None => Err(ParseError {
                message: format!("expected '{}', found end of input", expected),
                position: self.pos,
            }),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            Ok(())
        } else {
            Err(ParseError {
                message: format!("expected '{}', found '{}'", keyword, self.peek_word()),
                position: self.pos,
            })
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.advance();
        }

        let num_str = &self.input[start..self.pos];
        if num_str.is_empty() {
            return Err(ParseError {
                message: "expected integer".to_string(),
                position: start,
            });
        }
        num_str.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid integer: {}", num_str),
            position: start,
        })
    }

    /// `KEYWORD(int, number)`
    fn parse_window(&mut self, keyword: &str) -> Result<(usize, f64), ParseError> {
        self.expect_keyword(keyword)?;
        self.expect_char('(')?;
        let start = self.pos;
        let week_length = self.parse_integer()?;
        if week_length < 2 {
            return Err(ParseError {
                message: format!("{} needs a period of at least 2", keyword),
                position: start,
            });
        }
        self.expect_char(',')?;
        let sd = self.parse_number()?;
        self.expect_char(')')?;
        Ok((week_length, sd))
    }

    /// `KEYWORD(fraction)`
    fn parse_fraction(&mut self, keyword: &str) -> Result<f64, ParseError> {
        self.expect_keyword(keyword)?;
        self.expect_char('(')?;
        let start = self.pos;
        let fraction = self.parse_number()?;
        if fraction < 0.0 {
            return Err(ParseError {
                message: format!("{} takes a non-negative fraction", keyword),
                position: start,
            });
        }
        self.expect_char(')')?;
        Ok(fraction)
    }

    fn parse_list(&mut self, keyword: &str) -> Result<Vec<Condition>, ParseError> {
        self.expect_keyword(keyword)?;
        self.expect_char('(')?;
        self.skip_whitespace();
        if self.peek() == Some(')') {
            return Err(ParseError {
                message: format!("{} requires at least 1 condition", keyword),
                position: self.pos,
            });
        }

        let mut conditions = vec![self.parse_condition()?];
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.advance();
                break;
            }
            self.expect_char(',')?;
            conditions.push(self.parse_condition()?);
        }
        Ok(conditions)
    }

    fn parse_condition(&mut self) -> Result<Condition, ParseError> {
        self.skip_whitespace();

        if self.peek_keyword("ALL") {
            return Ok(Condition::All(self.parse_list("ALL")?));
        }
        if self.peek_keyword("ANY") {
            return Ok(Condition::Any(self.parse_list("ANY")?));
        }
        if self.peek_keyword("LOW_FOR_PERIOD") {
            let (n, sd) = self.parse_window("LOW_FOR_PERIOD")?;
            return Ok(Condition::low_for_period(n, sd));
        }
        if self.peek_keyword("HIGH_FOR_PERIOD") {
            let (n, sd) = self.parse_window("HIGH_FOR_PERIOD")?;
            return Ok(Condition::high_for_period(n, sd));
        }
        if self.peek_keyword("DOWN_PCT") {
            return Ok(Condition::down_n_percent(self.parse_fraction("DOWN_PCT")?));
        }
        if self.peek_keyword("UP_PCT") {
            return Ok(Condition::up_n_percent(self.parse_fraction("UP_PCT")?));
        }
        if self.peek_keyword("NEGA_END_UP_PCT") {
            let fraction = self.parse_fraction("NEGA_END_UP_PCT")?;
            return Ok(Condition::nega_end_up_n_percent(fraction));
        }
        if self.peek_keyword("POSA_END_BOOMING") {
            let fraction = self.parse_fraction("POSA_END_BOOMING")?;
            return Ok(Condition::posa_end_booming(fraction));
        }
        if self.peek_keyword("SOLD_TO_OPEN") {
            self.expect_keyword("SOLD_TO_OPEN")?;
            return Ok(Condition::sold_to_open());
        }
        if self.peek_keyword("MORE_BUY_TO_OPEN") {
            self.expect_keyword("MORE_BUY_TO_OPEN")?;
            return Ok(Condition::more_buy_to_open());
        }

        Err(ParseError {
            message: format!("expected condition, found '{}'", self.peek_word()),
            position: self.pos,
        })
    }

    fn parse(&mut self) -> Result<Condition, ParseError> {
        let condition = self.parse_condition()?;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(ParseError {
                message: format!("unexpected input after condition: '{}'", self.remaining()),
                position: self.pos,
            });
        }
        Ok(condition)
    }
}

pub fn parse(input: &str) -> Result<Condition, ParseError> {
    Parser::new(input).parse()
}
