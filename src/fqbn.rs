// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: fqbn
// ─────────────────────────────────────────────────────────────────────────────

use crate::error::{BuilderError, Result};

/// A Fully-Qualified Board Name: `package:platform:boardId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fqbn {
    pub package: String,
    pub platform: String,
    pub board_id: String,
}

impl Fqbn {
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts.iter().any(|p| !is_token(p)) {
            return Err(BuilderError::InvalidFqbn(s.to_string()));
        }
        Ok(Fqbn {
            package: parts[0].to_string(),
            platform: parts[1].to_string(),
            board_id: parts[2].to_string(),
        })
    }

    pub fn is_stm32(&self) -> bool {
        self.package.eq_ignore_ascii_case("stm32duino") || self.platform.eq_ignore_ascii_case("stm32")
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_triple() {
        let fqbn = Fqbn::parse("arduino:avr:uno").unwrap();
        assert_eq!(fqbn.package, "arduino");
        assert_eq!(fqbn.platform, "avr");
        assert_eq!(fqbn.board_id, "uno");
    }

    #[test]
    fn rejects_malformed_triple() {
        assert!(Fqbn::parse("arduino:avr").is_err());
        assert!(Fqbn::parse("arduino:av r:uno").is_err());
        assert!(Fqbn::parse("arduino::uno").is_err());
    }
}
