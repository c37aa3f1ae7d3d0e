use std::cmp::Ordering;

use thiserror::Error;
use tracing::{debug, info, trace};

use crate::config::RuntimeConfig;
use crate::vm::dynstr::{DynString, Str};
use crate::vm::image::{Image, Instruction, MAX_OPERANDS, Operand};
use crate::vm::profile::OpcodeProfile;
use crate::vm::{Opcode, Value};

/// Number of value slots, the accumulator included.
pub const STACK_SIZE: usize = 65_535;

/// A fatal condition raised by a malformed instruction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Trap {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u64),

    #[error("reserved opcode {0} has no execution semantics")]
    ReservedOpcode(Opcode),

    #[error("{op} takes {expected} operands, instruction has {actual}")]
    OperandCount {
        op: Opcode,
        expected: usize,
        actual: usize,
    },

    #[error("register r{0} is outside the stack")]
    RegisterOutOfBounds(u64),

    #[error("stack slot {0} is outside the stack")]
    SlotOutOfBounds(i64),

    #[error("literal index {0} is outside the literal table")]
    LiteralOutOfBounds(u64),

    #[error("jump target {0} is outside the instruction table")]
    JumpOutOfBounds(i64),
}

/// Error that halts execution. `pc` is the one-based index of the
/// offending instruction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("trap fault at pc {pc}: {trap}")]
    Trap { pc: usize, trap: Trap },

    #[error("arithmetic fault at pc {pc}: {op} by zero")]
    Arithmetic { pc: usize, op: Opcode },

    #[error("step limit of {limit} exceeded at pc {pc}")]
    StepLimit { pc: usize, limit: u64 },
}

impl RuntimeError {
    pub fn pc(&self) -> usize {
        match self {
            RuntimeError::Trap { pc, .. }
            | RuntimeError::Arithmetic { pc, .. }
            | RuntimeError::StepLimit { pc, .. } => *pc,
        }
    }
}

/// Failure inside a handler, before the pc is attached.
enum Fault {
    Trap(Trap),
    DivideByZero(Opcode),
}

impl From<Trap> for Fault {
    fn from(trap: Trap) -> Self {
        Fault::Trap(trap)
    }
}

impl Fault {
    fn at(self, pc: usize) -> RuntimeError {
        match self {
            Fault::Trap(trap) => RuntimeError::Trap { pc, trap },
            Fault::DivideByZero(op) => RuntimeError::Arithmetic { pc, op },
        }
    }
}

enum ControlFlow {
    Next,
    Jump(usize),
}

/// Resolved operands of the current instruction, handed out in order.
#[derive(Default)]
struct Args<'img> {
    values: [Value<'img>; MAX_OPERANDS],
    len: usize,
    next: usize,
}

impl<'img> Args<'img> {
    fn push(&mut self, value: Value<'img>) {
        if let Some(slot) = self.values.get_mut(self.len) {
            *slot = value;
            self.len += 1;
        }
    }

    /// The arity check runs before any handler, so this never runs dry.
    fn next(&mut self) -> Value<'img> {
        if self.next >= self.len {
            return Value::default();
        }
        self.next += 1;
        std::mem::take(&mut self.values[self.next - 1])
    }
}

/// The vmagick virtual machine.
///
/// Slot 0 of the stack is the accumulator. Every slot owns its value, so
/// assigning to a slot drops the previous occupant and with it one
/// reference to any string it held.
pub struct VM<'img> {
    image: &'img Image,
    stack: Vec<Value<'img>>,
    /// One-based index of the next instruction.
    pc: usize,
    steps: u64,
    max_steps: Option<u64>,
    profile: Option<OpcodeProfile>,
}

impl<'img> VM<'img> {
    pub fn new(image: &'img Image) -> Self {
        Self::with_config(image, &RuntimeConfig::default())
    }

    pub fn with_config(image: &'img Image, config: &RuntimeConfig) -> Self {
        Self {
            image,
            stack: vec![Value::Int(0); STACK_SIZE],
            pc: 1,
            steps: 0,
            max_steps: config.max_steps,
            profile: config.profile_opcodes.then(OpcodeProfile::new),
        }
    }

    pub fn accumulator(&self) -> &Value<'img> {
        &self.stack[0]
    }

    pub fn stack(&self) -> &[Value<'img>] {
        &self.stack
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Number of instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_halted(&self) -> bool {
        self.pc - 1 >= self.image.instruction_count()
    }

    pub fn profile(&self) -> Option<&OpcodeProfile> {
        self.profile.as_ref()
    }

    /// Run until the pc leaves the instruction table.
    pub fn run(&mut self) -> Result<&Value<'img>, RuntimeError> {
        while self.step()? {}
        info!(steps = self.steps, "execution halted");
        Ok(self.accumulator())
    }

    /// Execute one instruction. Returns `false` without doing anything once
    /// the program has halted.
    pub fn step(&mut self) -> Result<bool, RuntimeError> {
        let image: &'img Image = self.image;
        let pc = self.pc;
        let Some(instr) = image.instructions().get(pc - 1) else {
            return Ok(false);
        };

        if let Some(limit) = self.max_steps {
            if self.steps >= limit {
                return Err(RuntimeError::StepLimit { pc, limit });
            }
        }

        let flow = self.execute(instr).map_err(|fault| fault.at(pc))?;
        self.steps += 1;
        if let (Some(profile), Some(op)) = (self.profile.as_mut(), instr.op) {
            profile.record(op);
        }
        match flow {
            ControlFlow::Next => self.pc += 1,
            ControlFlow::Jump(target) => self.pc = target,
        }
        Ok(true)
    }

    fn execute(&mut self, instr: &'img Instruction) -> Result<ControlFlow, Fault> {
        let op = instr.op.ok_or(Trap::UnknownOpcode(instr.code))?;
        let arity = op.arity();
        if !arity.accepts(instr.operands.len()) {
            return Err(Trap::OperandCount {
                op,
                expected: arity.expected(),
                actual: instr.operands.len(),
            }
            .into());
        }

        trace!(pc = self.pc, op = op.name(), "step");

        let mut args = Args::default();
        for &operand in &instr.operands {
            args.push(self.resolve(operand)?);
        }

        match op {
            // ========================================
            // Memory
            // ========================================
            Opcode::Put => {
                let x = args.next();
                self.stack[0] = x;
            }
            Opcode::Cls => {
                let x = args.next();
                if self.stack[0].is_sentinel() {
                    self.stack[0] = x;
                }
            }
            Opcode::St => {
                let slot = slot_index(&args.next(), &args.next())?;
                self.stack[slot] = self.stack[0].clone();
            }
            Opcode::Mst => {
                let slot = slot_index(&args.next(), &args.next())?;
                self.stack[slot] = self.stack[0].clone();
                self.stack[0] = self.sentinel();
            }
            Opcode::Ld => {
                let slot = slot_index(&args.next(), &args.next())?;
                self.stack[0] = self.stack[slot].clone();
            }
            Opcode::Mld => {
                let slot = slot_index(&args.next(), &args.next())?;
                self.stack[0] = self.stack[slot].clone();
                self.stack[slot] = self.sentinel();
            }
            Opcode::Swp => {
                let slot = slot_index(&args.next(), &args.next())?;
                self.stack.swap(0, slot);
            }

            // ========================================
            // Arithmetic
            // ========================================
            Opcode::Add => {
                let b = args.next().intcast();
                self.stack[0] = Value::Int(self.stack[0].intcast().wrapping_add(b));
            }
            Opcode::Sub => {
                let b = args.next().intcast();
                self.stack[0] = Value::Int(self.stack[0].intcast().wrapping_sub(b));
            }
            Opcode::Mul => {
                let b = args.next().intcast();
                self.stack[0] = Value::Int(self.stack[0].intcast().wrapping_mul(b));
            }
            Opcode::Div => {
                let b = args.next().intcast();
                if b == 0 {
                    return Err(Fault::DivideByZero(op));
                }
                self.stack[0] = Value::Int(self.stack[0].intcast().wrapping_div(b));
            }
            Opcode::Mod => {
                let b = args.next().intcast();
                if b == 0 {
                    return Err(Fault::DivideByZero(op));
                }
                self.stack[0] = Value::Int(self.stack[0].intcast().wrapping_rem(b));
            }
            Opcode::Neg => {
                self.stack[0] = Value::Int(self.stack[0].intcast().wrapping_neg());
            }

            // ========================================
            // Strings
            // ========================================
            Opcode::Len => {
                let a = self.stack[0].strcast();
                self.stack[0] = Value::Int(a.len() as i64);
            }
            Opcode::Ins => {
                let at = args.next().intcast();
                let s = args.next().strcast();
                let a = self.stack[0].strcast();
                self.stack[0] = match usize::try_from(at) {
                    Ok(at) if at < a.len() => {
                        let (head, tail) = a.as_bytes().split_at(at);
                        let mut bytes = Vec::with_capacity(a.len() + s.len());
                        bytes.extend_from_slice(head);
                        bytes.extend_from_slice(s.as_bytes());
                        bytes.extend_from_slice(tail);
                        Value::Str(Str::new(bytes))
                    }
                    _ => self.recover(op, "insertion offset out of range"),
                };
            }
            Opcode::Cat => {
                let s = args.next().strcast();
                let a = self.stack[0].strcast();
                let mut bytes = Vec::with_capacity(a.len() + s.len());
                bytes.extend_from_slice(a.as_bytes());
                bytes.extend_from_slice(s.as_bytes());
                self.stack[0] = Value::Str(Str::new(bytes));
            }
            Opcode::Sbs => {
                let off = args.next().intcast();
                let len = args.next().intcast();
                let a = self.stack[0].strcast();
                self.stack[0] = match (usize::try_from(off), usize::try_from(len)) {
                    (Ok(off), Ok(len)) if off <= a.len() => {
                        let end = off + len.min(a.len() - off);
                        Value::Str(Str::new(a.as_bytes()[off..end].to_vec()))
                    }
                    _ => self.recover(op, "substring bounds out of range"),
                };
            }
            Opcode::Cmp => {
                let s = args.next().strcast();
                let a = self.stack[0].strcast();
                let ordering = a.as_bytes().cmp(s.as_bytes());
                self.stack[0] = Value::Int(match ordering {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                });
            }
            Opcode::Casi => {
                let at = args.next().intcast();
                let a = self.stack[0].strcast();
                let byte = usize::try_from(at)
                    .ok()
                    .and_then(|at| a.as_bytes().get(at).copied());
                self.stack[0] = match byte {
                    Some(b) => Value::Int(i64::from(b)),
                    None => self.recover(op, "character offset out of range"),
                };
            }
            Opcode::Iasc => {
                let n = self.stack[0].intcast();
                let mut s = DynString::make(1);
                s.payload_mut()[0] = n.rem_euclid(128) as u8;
                self.stack[0] = Value::Str(Str::from_dyn(s));
            }
            Opcode::Stoi => {
                let radix = args.next().intcast();
                let a = self.stack[0].strcast();
                self.stack[0] = match parse_radix(a.as_bytes(), radix) {
                    Some(n) => Value::Int(n),
                    None => self.recover(op, "invalid radix or no digits"),
                };
            }
            Opcode::Itos => {
                let radix = args.next().intcast();
                let n = self.stack[0].intcast();
                self.stack[0] = match format_radix(n, radix) {
                    Some(bytes) => Value::Str(Str::new(bytes)),
                    None => self.recover(op, "invalid radix"),
                };
            }

            // ========================================
            // Control Flow
            // ========================================
            Opcode::Jmp => {
                let target = self.jump_target(&args.next())?;
                return Ok(ControlFlow::Jump(target));
            }
            Opcode::Jb => {
                let target = args.next();
                if self.stack[0].intcast() < 0 {
                    return Ok(ControlFlow::Jump(self.jump_target(&target)?));
                }
            }
            Opcode::Je => {
                let target = args.next();
                let cond = args.next();
                if cond.intcast() == 0 {
                    return Ok(ControlFlow::Jump(self.jump_target(&target)?));
                }
            }
            Opcode::Ja => {
                let target = args.next();
                if self.stack[0].intcast() > 0 {
                    return Ok(ControlFlow::Jump(self.jump_target(&target)?));
                }
            }

            // ========================================
            // Misc
            // ========================================
            Opcode::Nop => {}
            Opcode::Type => {
                let code = if instr.operands.is_empty() {
                    self.stack[0].type_code()
                } else {
                    args.next().type_code()
                };
                self.stack[0] = Value::Int(code);
            }
            Opcode::Run => return Err(Trap::ReservedOpcode(op).into()),
        }

        Ok(ControlFlow::Next)
    }

    fn resolve(&self, operand: Operand) -> Result<Value<'img>, Trap> {
        match operand {
            Operand::Int(n) => Ok(Value::Int(n)),
            Operand::Literal(index) => {
                let image: &'img Image = self.image;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| image.literal(i).map(|bytes| Str::literal(i, bytes)))
                    .map(Value::Str)
                    .ok_or(Trap::LiteralOutOfBounds(index))
            }
            Operand::Register(reg) => usize::try_from(reg)
                .ok()
                .and_then(|slot| self.stack.get(slot))
                .cloned()
                .ok_or(Trap::RegisterOutOfBounds(reg)),
        }
    }

    /// Literal 0. An image without literals gets an empty stand-in.
    fn sentinel(&self) -> Value<'img> {
        let image: &'img Image = self.image;
        Value::Str(Str::literal(0, image.literal(0).unwrap_or(&[])))
    }

    /// In-band error signal: the sentinel replaces the result.
    fn recover(&self, op: Opcode, reason: &'static str) -> Value<'img> {
        debug!(pc = self.pc, op = op.name(), reason, "sentinel result");
        self.sentinel()
    }

    fn jump_target(&self, target: &Value<'img>) -> Result<usize, Trap> {
        let t = target.intcast();
        usize::try_from(t)
            .ok()
            .filter(|&t| (1..=self.image.instruction_count()).contains(&t))
            .ok_or(Trap::JumpOutOfBounds(t))
    }
}

fn slot_index(base: &Value<'_>, offset: &Value<'_>) -> Result<usize, Trap> {
    let slot = base.intcast().wrapping_add(offset.intcast());
    usize::try_from(slot)
        .ok()
        .filter(|&s| s < STACK_SIZE)
        .ok_or(Trap::SlotOutOfBounds(slot))
}

/// Parse an optionally negative numeral, stopping at the first byte that is
/// not a digit of `radix`. `None` for a bad radix or when no digit was read.
fn parse_radix(bytes: &[u8], radix: i64) -> Option<i64> {
    if !(2..=36).contains(&radix) {
        return None;
    }
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };

    let mut value: i64 = 0;
    let mut consumed = 0;
    for &b in digits {
        let Some(d) = char::from(b).to_digit(radix as u32) else {
            break;
        };
        value = value.wrapping_mul(radix).wrapping_add(i64::from(d));
        consumed += 1;
    }

    if consumed == 0 {
        return None;
    }
    Some(if negative { value.wrapping_neg() } else { value })
}

/// Render `n` in `radix` with lower-case digits. `None` for a bad radix.
fn format_radix(n: i64, radix: i64) -> Option<Vec<u8>> {
    if !(2..=36).contains(&radix) {
        return None;
    }
    let radix = radix as u32;
    let mut magnitude = n.unsigned_abs();
    let mut out = Vec::new();
    loop {
        let digit = (magnitude % u64::from(radix)) as u32;
        out.push(char::from_digit(digit, radix)? as u8);
        magnitude /= u64::from(radix);
        if magnitude == 0 {
            break;
        }
    }
    if n < 0 {
        out.push(b'-');
    }
    out.reverse();
    Some(out)
}
