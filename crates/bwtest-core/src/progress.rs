//! Live progress tokens written during the iteration loop.

use std::io::Write;

/// One progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressToken {
    Iteration,
    /// Spinning on the forward copy.
    ForwardSpin,
    /// Spinning on the reverse copy.
    ReverseSpin,
    /// Blocked on the forward copy.
    ForwardBlock,
    /// Blocked on the reverse copy.
    ReverseBlock,
    Validate,
}

impl ProgressToken {
    pub fn as_char(self) -> char {
        match self {
            Self::Iteration => '.',
            Self::ForwardSpin => 'F',
            Self::ReverseSpin => 'R',
            Self::ForwardBlock => 'f',
            Self::ReverseBlock => 'r',
            Self::Validate => 'V',
        }
    }
}

/// Destination for progress tokens. Write failures are ignored: progress is
/// cosmetic and must never fail a measurement.
#[derive(Default)]
pub struct Progress {
    out: Option<Box<dyn Write + Send>>,
}

impl Progress {
    pub fn stdout() -> Self {
        Self { out: Some(Box::new(std::io::stdout())) }
    }

    pub fn disabled() -> Self {
        Self { out: None }
    }

    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self { out: Some(Box::new(writer)) }
    }

    pub fn token(&mut self, token: ProgressToken) {
        if let Some(out) = self.out.as_mut() {
            let _ = write!(out, "{}", token.as_char());
            let _ = out.flush();
        }
    }

    /// Start a new progress line.
    pub fn line(&mut self, text: &str) {
        if let Some(out) = self.out.as_mut() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{text}");
            let _ = out.flush();
        }
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").field("enabled", &self.out.is_some()).finish()
    }
}
