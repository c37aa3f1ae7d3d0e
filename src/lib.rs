//! vmagick - a stack bytecode virtual machine
//!
//! This library provides the image loader, the execution engine and the
//! reference-counted string values it operates on.

use std::io::{self, Write};

use serde::ser::{Serialize, SerializeStruct, Serializer};

pub mod config;
pub mod error;
pub mod vm;

// Re-export commonly used types
pub use config::{OutputFormat, RuntimeConfig};
pub use error::{Error, Result};
pub use vm::{Image, ImageBuilder, Opcode, OpcodeProfile, Operand, VM, Value, Verifier};

/// Final accumulator of a finished run, detached from the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accumulator {
    Int(i64),
    String(Vec<u8>),
}

impl Accumulator {
    /// Write the `ACCUM:` line. String bytes go out unmodified.
    pub fn write_human<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(b"ACCUM: ")?;
        match self {
            Accumulator::Int(n) => write!(w, "{}", n)?,
            Accumulator::String(bytes) => w.write_all(bytes)?,
        }
        w.write_all(b"\n")
    }
}

impl From<&Value<'_>> for Accumulator {
    fn from(value: &Value<'_>) -> Self {
        match value {
            Value::Int(n) => Accumulator::Int(*n),
            Value::Str(s) => Accumulator::String(s.as_bytes().to_vec()),
        }
    }
}

impl Serialize for Accumulator {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Accumulator", 2)?;
        match self {
            Accumulator::Int(n) => {
                state.serialize_field("type", "int")?;
                state.serialize_field("value", n)?;
            }
            Accumulator::String(bytes) => {
                state.serialize_field("type", "string")?;
                state.serialize_field("value", &String::from_utf8_lossy(bytes))?;
            }
        }
        state.end()
    }
}

/// Result of running an image to completion.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Outcome {
    pub accumulator: Accumulator,
    pub steps: u64,
    #[serde(skip)]
    pub profile: Option<OpcodeProfile>,
}

impl Outcome {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Verify (when configured) and run a loaded image.
pub fn execute(image: &Image, config: &RuntimeConfig) -> Result<Outcome> {
    if config.verify {
        Verifier::new().verify(image)?;
    }

    let mut vm = VM::with_config(image, config);
    let accumulator = Accumulator::from(vm.run()?);
    Ok(Outcome {
        accumulator,
        steps: vm.steps(),
        profile: vm.profile().cloned(),
    })
}

/// Decode and run an image held in memory.
pub fn run_image(bytes: Vec<u8>, config: &RuntimeConfig) -> Result<Outcome> {
    let image = Image::from_bytes(bytes)?;
    execute(&image, config)
}
