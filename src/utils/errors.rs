use thiserror::Error;

use crate::tape::TraceLevel;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GradError {
    #[error("derivative trace level {0:?} is not available in this build")]
    UnimplementedTraceLevel(TraceLevel),
    #[error("unknown derivative trace level: {0}")]
    InvalidTraceLevel(u8),
    #[error("tape entry {0} was recorded without the partials this sweep needs")]
    MissingPartials(usize),
}

pub type Result<T> = std::result::Result<T, GradError>;

impl From<GradError> for String {
    fn from(e: GradError) -> Self {
        e.to_string()
    }
}
