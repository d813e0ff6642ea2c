//! Emulated switcher state and the operator command language.

use anyhow::{anyhow, bail, Result};

/// Program/preview state shared by the fake servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub inputs: u8,
    pub program: u8,
    pub preview: u8,
}

impl Board {
    pub fn new(inputs: u8) -> Self {
        Self {
            inputs,
            program: 1,
            preview: 2.min(inputs),
        }
    }

    /// Tally flags per input: bit 0 program, bit 1 preview.
    pub fn flags(&self) -> Vec<u8> {
        (1..=self.inputs)
            .map(|input| {
                let mut flags = 0;
                if input == self.program {
                    flags |= 0x01;
                }
                if input == self.preview {
                    flags |= 0x02;
                }
                flags
            })
            .collect()
    }

    /// vMix digit string: 0 off, 1 program, 2 preview.
    pub fn digits(&self) -> String {
        self.flags()
            .iter()
            .map(|&flags| match flags {
                0 => '0',
                f if f & 0x01 != 0 => '1',
                _ => '2',
            })
            .collect()
    }

    pub fn cut(&mut self) {
        std::mem::swap(&mut self.program, &mut self.preview);
    }

    pub fn set_program(&mut self, input: u8) -> Result<()> {
        self.program = self.check(input)?;
        Ok(())
    }

    pub fn set_preview(&mut self, input: u8) -> Result<()> {
        self.preview = self.check(input)?;
        Ok(())
    }

    fn check(&self, input: u8) -> Result<u8> {
        if input == 0 || input > self.inputs {
            bail!("input {} outside 1..={}", input, self.inputs);
        }
        Ok(input)
    }
}

/// One operator command from the script or stdin.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Program(u8),
    Preview(u8),
    Cut,
    Sleep(f32),
    Show,
    Report,
    Quit,
}

impl Step {
    pub fn parse(text: &str) -> Result<Self> {
        let mut words = text.split_whitespace();
        let verb = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let arg = words.next();
        let step = match (verb.to_ascii_lowercase().as_str(), arg) {
            ("pgm" | "program", Some(n)) => Step::Program(n.parse()?),
            ("pvw" | "preview", Some(n)) => Step::Preview(n.parse()?),
            ("cut" | "auto", None) => Step::Cut,
            ("sleep", Some(secs)) => Step::Sleep(secs.parse()?),
            ("show", None) => Step::Show,
            ("report", None) => Step::Report,
            ("quit" | "exit", None) => Step::Quit,
            _ => bail!("unknown command '{}'", text.trim()),
        };
        Ok(step)
    }

    /// Split a `;` separated script.
    pub fn parse_script(script: &str) -> Result<Vec<Self>> {
        script
            .split(';')
            .filter(|part| !part.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_and_digits() {
        let mut board = Board::new(4);
        assert_eq!(board.flags(), vec![1, 2, 0, 0]);
        assert_eq!(board.digits(), "1200");

        board.set_preview(1).unwrap();
        assert_eq!(board.flags(), vec![3, 0, 0, 0]);
        assert_eq!(board.digits(), "1000");
    }

    #[test]
    fn test_cut_swaps_buses() {
        let mut board = Board::new(8);
        board.set_program(3).unwrap();
        board.set_preview(5).unwrap();
        board.cut();
        assert_eq!((board.program, board.preview), (5, 3));
    }

    #[test]
    fn test_out_of_range_input() {
        let mut board = Board::new(4);
        assert!(board.set_program(0).is_err());
        assert!(board.set_preview(5).is_err());
        assert_eq!(board, Board::new(4));
    }

    #[test]
    fn test_script() {
        let steps = Step::parse_script("pgm 3; pvw 1;sleep 0.5; cut; report;").unwrap();
        assert_eq!(
            steps,
            vec![Step::Program(3), Step::Preview(1), Step::Sleep(0.5), Step::Cut, Step::Report]
        );
        assert!(Step::parse("pgm").is_err());
        assert!(Step::parse("jump 3").is_err());
    }
}
