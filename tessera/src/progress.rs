use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stage boundaries of a reconstruction, in execution order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Features,
    Matching,
    StructureFromMotion,
    DenseStereo,
    Surface,
    Texture,
    Decimation,
    Complete,
}

impl Stage {
    /// Fraction of the whole reconstruction done once this stage has finished.
    pub fn fraction(self) -> f64 {
        match self {
            Self::Features => 0.1,
            Self::Matching => 0.2,
            Self::StructureFromMotion => 0.3,
            Self::DenseStereo => 0.5,
            Self::Surface => 0.7,
            Self::Texture => 0.8,
            Self::Decimation => 0.9,
            Self::Complete => 1.0,
        }
    }
}

/// Reported after every finished stage. Fractions strictly increase within one run.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Progress {
    pub stage: Stage,
    pub fraction: f64,
}

impl From<Stage> for Progress {
    fn from(stage: Stage) -> Self {
        Self {
            stage,
            fraction: stage.fraction(),
        }
    }
}

/// Shared flag asking a running pipeline to stop at its next stage boundary.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
