use std::fmt;
use std::sync::Arc;

/// A location in script source. Lines and columns are 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pos {
    pub path: Arc<str>,
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(path: impl Into<Arc<str>>, line: u32, col: u32) -> Self {
        Self {
            path: path.into(),
            line,
            col,
        }
    }

    /// Start of an anonymous source, used for inline expressions and tests.
    pub fn inline() -> Self {
        Self::new("<inline>", 1, 1)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Default for Pos {
    fn default() -> Self {
        Self::inline()
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}:{}", self.line, self.col)
        } else {
            write!(f, "{}:{}:{}", self.path, self.line, self.col)
        }
    }
}
