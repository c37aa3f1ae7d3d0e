use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::vm::verifier::VerifyError;
use crate::vm::{ImageError, RuntimeError};

/// Every way loading, checking or running an image can fail.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),

    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Failure category, as named in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Image(_) => "MalformedImage",
            Error::Runtime(RuntimeError::Trap { .. }) => "TrapFault",
            Error::Runtime(RuntimeError::Arithmetic { .. }) => "ArithmeticFault",
            Error::Runtime(RuntimeError::StepLimit { .. }) => "StepLimit",
            Error::Verify(_) => "VerifyFailed",
            Error::Config(_) => "Config",
            Error::Io { .. } | Error::Output(_) | Error::Json(_) => "Io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Opcode, Trap};

    #[test]
    fn test_kind() {
        let err: Error = ImageError::PartialWord { len: 3 }.into();
        assert_eq!(err.kind(), "MalformedImage");

        let err: Error = RuntimeError::Arithmetic {
            pc: 4,
            op: Opcode::Div,
        }
        .into();
        assert_eq!(err.kind(), "ArithmeticFault");
        assert_eq!(err.to_string(), "arithmetic fault at pc 4: DIV by zero");

        let err: Error = RuntimeError::Trap {
            pc: 2,
            trap: Trap::UnknownOpcode(31),
        }
        .into();
        assert_eq!(err.kind(), "TrapFault");
        assert_eq!(err.to_string(), "trap fault at pc 2: unknown opcode 31");
    }

    #[test]
    fn test_verify_message() {
        let err: Error = VerifyError::UnknownOpcode { index: 1, code: 50 }.into();
        assert_eq!(err.kind(), "VerifyFailed");
        assert_eq!(
            err.to_string(),
            "verification failed: instruction 1: unknown opcode 50"
        );
    }
}
