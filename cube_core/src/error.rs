//! Error taxonomy for the estimator core.
//!
//! "No data at a node" is deliberately not an error: extraction reports the
//! configured no-data value in-band. Likewise a failed guide search falls back
//! to the prior selector internally and is never surfaced.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CubeError {
    #[error("invalid configuration: {0}")]
    BadConfig(String),
    #[error("node ({col}, {row}) is outside the grid")]
    OutOfBounds { col: i64, row: i64 },
    #[error("no hypothesis within {tolerance} m of {depth} m")]
    NotFound { depth: f32, tolerance: f32 },
    #[error("more than one hypothesis within {tolerance} m of {depth} m")]
    AmbiguousMatch { depth: f32, tolerance: f32 },
    #[error("predicted depth is frozen at node ({col}, {row})")]
    FrozenPrior { col: u32, row: u32 },
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CubeError>;

#[cfg(test)]
mod tests {
    use super::CubeError;

    #[test]
    fn display_strings_are_stable() {
        let e = CubeError::OutOfBounds { col: 7, row: -1 };
        assert_eq!(e.to_string(), "node (7, -1) is outside the grid");
        let e = CubeError::NotFound {
            depth: 10.0,
            tolerance: 0.01,
        };
        assert_eq!(e.to_string(), "no hypothesis within 0.01 m of 10 m");
    }
}
