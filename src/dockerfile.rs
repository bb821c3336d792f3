//! A minimal Dockerfile model: just enough parsing to expose the ordered
//! instruction stream, the `FROM` target, and `ADD`/`COPY` source patterns.
//!
//! This is intentionally not a full Dockerfile grammar. Only `FROM`, `ADD`,
//! and `COPY` are interpreted semantically; every other instruction still
//! contributes its original source line to the fingerprint, verbatim.

use color_eyre::{Result, eyre::bail};

/// One parsed Dockerfile instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    /// The lowercased opcode, e.g. `from`, `copy`, `run`.
    pub opcode: String,

    /// The original source line (after continuation joining, before
    /// tokenizing), used verbatim as a fingerprint input.
    pub original: String,

    /// The tokenized arguments following the opcode.
    pub args: Vec<String>,
}

impl Instruction {
    /// For `ADD`/`COPY` instructions, the source operands (every argument
    /// except the last, which is the destination), with flag arguments
    /// (`--chown=...`, `--from=...`, etc.) excluded. Returns `None` for any
    /// other opcode, or if there are too few arguments to have both a source
    /// and a destination.
    pub fn copy_like_sources(&self) -> Option<Vec<&str>> {
        if self.opcode != "add" && self.opcode != "copy" {
            return None;
        }
        let positional: Vec<&str> = self
            .args
            .iter()
            .map(String::as_str)
            .filter(|a| !a.starts_with("--"))
            .collect();
        if positional.len() < 2 {
            return None;
        }
        Some(positional[..positional.len() - 1].to_vec())
    }
}

/// An ordered, parsed sequence of Dockerfile instructions.
#[derive(Clone, Debug, Default)]
pub struct Dockerfile {
    instructions: Vec<Instruction>,
}

impl Dockerfile {
    /// Parse Dockerfile source text.
    ///
    /// Handles line continuations (a trailing unescaped `\`) and skips blank
    /// lines and `#`-prefixed comments. Tokenization is whitespace-based,
    /// which is sufficient for `FROM`/`ADD`/`COPY` arguments.
    pub fn parse(source: &str) -> Result<Self> {
        let mut instructions = Vec::new();
        let mut pending: Option<String> = None;

        for line in source.lines() {
            let joined = match pending.take() {
                Some(prefix) => format!("{prefix}\n{line}"),
                None => line.to_string(),
            };

            let trimmed = joined.trim_end();
            if let Some(stripped) = trimmed.strip_suffix('\\') {
                pending = Some(stripped.trim_end().to_string());
                continue;
            }

            let trimmed_start = joined.trim_start();
            if trimmed_start.is_empty() || trimmed_start.starts_with('#') {
                continue;
            }

            let mut parts = trimmed_start.split_whitespace();
            let Some(opcode) = parts.next() else { continue };
            let args: Vec<String> = parts.map(str::to_string).collect();

            instructions.push(Instruction {
                opcode: opcode.to_lowercase(),
                original: joined.clone(),
                args,
            });
        }

        if pending.is_some() {
            bail!("dockerfile ends mid-line-continuation");
        }

        Ok(Self { instructions })
    }

    /// The argument of the single `FROM` instruction, with an `AS <name>`
    /// build-stage alias and any leading `--platform=...` flag stripped.
    ///
    /// Returns `None` if there is no `FROM` instruction.
    pub fn from_target(&self) -> Option<&str> {
        let from = self.instructions.iter().find(|i| i.opcode == "from")?;
        from.args.iter().find(|a| !a.starts_with("--")).map(String::as_str)
    }

    /// Consume this model, returning its instructions in file order.
    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    /// View the instructions in file order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}
