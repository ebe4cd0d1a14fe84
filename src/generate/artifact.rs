use crate::diagnostics::SourcePosition;
use crate::helpers;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// One emitted source file plus a mapping from generated lines back to
/// positions in the original program description. Owned by the build pipeline
/// for the duration of one build; dropped after compilation or cancellation.
#[derive(Debug, Clone)]
pub struct CodeMap {
    /// Path relative to the unit's output directory.
    pub file_name: PathBuf,
    pub text: String,
    /// (generated line, original position), 1-based, sorted by line.
    positions: Vec<(u32, SourcePosition)>,
}

impl CodeMap {
    /// The original position responsible for `line` (1-based): the mapping at
    /// or nearest above it. Used to translate toolchain diagnostics.
    pub fn translate(&self, line: u32) -> Option<&SourcePosition> {
        self.positions
            .iter()
            .take_while(|(l, _)| *l <= line)
            .last()
            .map(|(_, p)| p)
    }

    pub fn digest(&self) -> blake3::Hash {
        blake3::hash(self.text.as_bytes())
    }

    /// Write into `dir`, skipping the write when contents are unchanged.
    /// Returns true when the file was (re)written.
    pub fn write_to(&self, dir: &Path) -> Result<bool> {
        helpers::write_if_changed(&dir.join(&self.file_name), &self.text)
    }
}

/// Line-oriented builder for generated code, tracking which original position
/// each emitted block came from.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    lines: Vec<String>,
    positions: Vec<(u32, SourcePosition)>,
    indent: usize,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a (possibly multi-line) block at the current indentation.
    pub fn pr(&mut self, text: impl AsRef<str>) {
        let prefix = "    ".repeat(self.indent);
        for line in text.as_ref().lines() {
            if line.is_empty() {
                self.lines.push(String::new());
            } else {
                self.lines.push(format!("{prefix}{line}"));
            }
        }
    }

    /// Like `pr`, recording that the block originates at `position`.
    pub fn pr_at(&mut self, text: impl AsRef<str>, position: &SourcePosition) {
        self.positions
            .push((self.lines.len() as u32 + 1, position.clone()));
        self.pr(text);
    }

    pub fn blank(&mut self) {
        self.lines.push(String::new());
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn unindent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    pub fn build(self, file_name: impl Into<PathBuf>) -> CodeMap {
        let mut text = self.lines.join("\n");
        text.push('\n');
        CodeMap {
            file_name: file_name.into(),
            text,
            positions: self.positions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn pos(line: u32) -> SourcePosition {
        SourcePosition {
            file: PathBuf::from("Main.rhea"),
            line,
        }
    }

    #[test]
    fn builder_tracks_indentation() {
        let mut builder = CodeBuilder::new();
        builder.pr("void f() {");
        builder.indent();
        builder.pr("return;");
        builder.unindent();
        builder.pr("}");
        let map = builder.build("f.c");
        assert_eq!(map.text, "void f() {\n    return;\n}\n");
    }

    #[test]
    fn translate_finds_nearest_mapping_above() {
        let mut builder = CodeBuilder::new();
        builder.pr("// header");
        builder.pr_at("int x = 1;", &pos(10));
        builder.pr("int y = 2;");
        builder.pr_at("int z = 3;", &pos(20));
        let map = builder.build("f.c");

        assert!(map.translate(1).is_none());
        assert_eq!(map.translate(2).unwrap().line, 10);
        assert_eq!(map.translate(3).unwrap().line, 10);
        assert_eq!(map.translate(4).unwrap().line, 20);
    }

    #[test]
    fn write_to_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = CodeBuilder::new();
        builder.pr("contents");
        let map = builder.build("out.c");

        assert!(map.write_to(dir.path()).unwrap());
        assert!(!map.write_to(dir.path()).unwrap());
    }
}
