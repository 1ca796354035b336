// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: analyzer :: cond  —  #if expression evaluator (§4.2.2)
//
//  A small recursive-descent / precedence-climbing parser over the
//  restricted preprocessor-expression grammar: defined(), identifiers,
//  integer literals, comparisons, !, &&, ||, parens.
// ─────────────────────────────────────────────────────────────────────────────

use crate::macros::Env;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(i64),
    Defined,
    Bang,
    AndAnd,
    OrOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
}

fn lex(expr: &str) -> Option<Vec<Tok>> {
    let bytes: Vec<char> = expr.chars().collect();
    let mut i = 0;
    let mut toks = Vec::new();
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => { toks.push(Tok::LParen); i += 1; }
            ')' => { toks.push(Tok::RParen); i += 1; }
            '!' => {
                if bytes.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Ne);
                    i += 2;
                } else {
                    toks.push(Tok::Bang);
                    i += 1;
                }
            }
            '&' if bytes.get(i + 1) == Some(&'&') => { toks.push(Tok::AndAnd); i += 2; }
            '|' if bytes.get(i + 1) == Some(&'|') => { toks.push(Tok::OrOr); i += 2; }
            '=' if bytes.get(i + 1) == Some(&'=') => { toks.push(Tok::Eq); i += 2; }
            '<' => {
                if bytes.get(i + 1) == Some(&'=') { toks.push(Tok::Le); i += 2; }
                else { toks.push(Tok::Lt); i += 1; }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&'=') { toks.push(Tok::Ge); i += 2; }
                else { toks.push(Tok::Gt); i += 1; }
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == 'x' || bytes[i] == 'X') {
                    i += 1;
                }
                let text: String = bytes[start..i].iter().collect();
                let n = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    i64::from_str_radix(hex, 16).ok()?
                } else {
                    text.trim_end_matches(|c: char| c == 'L' || c == 'U' || c == 'l' || c == 'u').parse().ok()?
                };
                toks.push(Tok::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == '_') {
                    i += 1;
                }
                let text: String = bytes[start..i].iter().collect();
                if text == "defined" {
                    toks.push(Tok::Defined);
                } else {
                    toks.push(Tok::Ident(text));
                }
            }
            _ => return None,
        }
    }
    Some(toks)
}

struct Parser<'a> {
    toks: &'a [Tok],
    pos: usize,
    env: &'a Env,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Tok> {
        let t = self.toks.get(self.pos);
        self.pos += 1;
        t
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Option<bool> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Tok::OrOr) {
            let rhs = self.parse_and()?;
            lhs = lhs || rhs;
        }
        Some(lhs)
    }

    fn parse_and(&mut self) -> Option<bool> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Tok::AndAnd) {
            let rhs = self.parse_equality()?;
            lhs = lhs && rhs;
        }
        Some(lhs)
    }

    fn parse_equality(&mut self) -> Option<bool> {
        let lhs = self.parse_relational()?;
        if self.eat(&Tok::Eq) {
            let rhs = self.parse_relational()?;
            return Some((lhs as i64) == (rhs as i64));
        }
        if self.eat(&Tok::Ne) {
            let rhs = self.parse_relational()?;
            return Some((lhs as i64) != (rhs as i64));
        }
        Some(lhs != 0)
    }

    // `parse_relational` and below operate on numeric values so comparisons
    // compose; booleans are just 0/1 at this level.
    fn parse_relational(&mut self) -> Option<i64> {
        let lhs = self.parse_unary()?;
        if self.eat(&Tok::Lt) {
            return Some((lhs < self.parse_unary()?) as i64);
        }
        if self.eat(&Tok::Le) {
            return Some((lhs <= self.parse_unary()?) as i64);
        }
        if self.eat(&Tok::Gt) {
            return Some((lhs > self.parse_unary()?) as i64);
        }
        if self.eat(&Tok::Ge) {
            return Some((lhs >= self.parse_unary()?) as i64);
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<i64> {
        if self.eat(&Tok::Bang) {
            let v = self.parse_unary()?;
            return Some((v == 0) as i64);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Option<i64> {
        match self.advance()?.clone() {
            Tok::Defined => {
                let parenthesized = self.eat(&Tok::LParen);
                let name = match self.advance()? {
                    Tok::Ident(n) => n.clone(),
                    _ => return None,
                };
                if parenthesized && !self.eat(&Tok::RParen) {
                    return None;
                }
                Some(self.env.is_defined(&name) as i64)
            }
            Tok::Number(n) => Some(n),
            Tok::Ident(name) => Some(
                self.env
                    .value_of(&name)
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    .unwrap_or(0),
            ),
            Tok::LParen => {
                let v = self.parse_or_as_int()?;
                if !self.eat(&Tok::RParen) {
                    return None;
                }
                Some(v)
            }
            _ => None,
        }
    }

    fn parse_or_as_int(&mut self) -> Option<i64> {
        self.parse_or().map(|b| b as i64)
    }
}

/// Evaluates a `#if`/`#elif` expression against `env`. Any syntactically
/// invalid sub-expression evaluates to `false` (§4.2.2).
pub fn eval(expr: &str, env: &Env) -> bool {
    let Some(toks) = lex(expr) else { return false };
    let mut parser = Parser { toks: &toks, pos: 0, env };
    match parser.parse_or() {
        Some(result) if parser.pos == parser.toks.len() => result,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defined_forms() {
        let env = Env::seed([("ESP32".to_string(), None)]);
        assert!(eval("defined(ESP32)", &env));
        assert!(eval("defined ESP32", &env));
        assert!(!eval("defined(AVR)", &env));
        assert!(eval("!defined(AVR)", &env));
    }

    #[test]
    fn comparisons_and_logic() {
        let env = Env::seed([("ARDUINO".to_string(), Some("100".to_string()))]);
        assert!(eval("ARDUINO >= 100", &env));
        assert!(eval("ARDUINO == 100 && defined(ARDUINO)", &env));
        assert!(!eval("ARDUINO < 100 || defined(NOPE)", &env));
        assert!(eval("(ARDUINO >= 100) && !defined(NOPE)", &env));
    }

    #[test]
    fn invalid_expression_is_false() {
        let env = Env::default();
        assert!(!eval("&& )(", &env));
    }

    #[test]
    fn undefined_identifier_is_zero() {
        let env = Env::default();
        assert!(!eval("UNDEFINED_MACRO", &env));
        assert!(eval("UNDEFINED_MACRO == 0", &env));
    }
}
