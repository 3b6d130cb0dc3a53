//! Interprets verified IR functions, standing in for a native JIT.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;

use tracing::trace;

use crate::ir::{Block, FloatOp, FunctionValue, InstructionKind, Module, Value};

/// Host implementation of a bodiless `extern` declaration.
pub type HostFunction = fn(&[f64]) -> f64;

/// Default bound on live frames; deeper calls fail with `StackOverflow`.
pub const MAX_CALL_DEPTH: usize = 1024;

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("no function named {0} in module")]
    UnknownFunction(String),
    #[error("unresolved external symbol {0}")]
    UnresolvedSymbol(String),
    #[error("function {name} expects {expected} args, got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("call depth exceeded {0} frames")]
    StackOverflow(usize),
    #[error("function {0} is malformed: {1}")]
    Malformed(String, String),
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Double(f64),
    Bool(bool),
}

#[derive(Clone)]
pub struct ExecutionEngine {
    externals: HashMap<String, (usize, HostFunction)>,
    max_depth: usize,
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut externals: Vec<_> = self.externals.keys().collect();
        externals.sort();
        f.debug_struct("ExecutionEngine")
            .field("externals", &externals)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

fn putchard(args: &[f64]) -> f64 {
    let mut stdout = std::io::stdout();
    // output failures are not observable from the language
    let _ = write!(stdout, "{}", char::from(args[0] as u8));
    let _ = stdout.flush();
    0.0
}

fn printd(args: &[f64]) -> f64 {
    println!("{}", args[0]);
    0.0
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        let mut engine = Self::empty();
        engine.add_global_mapping("sin", 1, |a| a[0].sin());
        engine.add_global_mapping("cos", 1, |a| a[0].cos());
        engine.add_global_mapping("tan", 1, |a| a[0].tan());
        engine.add_global_mapping("atan", 1, |a| a[0].atan());
        engine.add_global_mapping("sqrt", 1, |a| a[0].sqrt());
        engine.add_global_mapping("exp", 1, |a| a[0].exp());
        engine.add_global_mapping("log", 1, |a| a[0].ln());
        engine.add_global_mapping("fabs", 1, |a| a[0].abs());
        engine.add_global_mapping("floor", 1, |a| a[0].floor());
        engine.add_global_mapping("ceil", 1, |a| a[0].ceil());
        engine.add_global_mapping("pow", 2, |a| a[0].powf(a[1]));
        engine.add_global_mapping("atan2", 2, |a| a[0].atan2(a[1]));
        engine.add_global_mapping("fmod", 2, |a| a[0] % a[1]);
        engine.add_global_mapping("putchard", 1, putchard);
        engine.add_global_mapping("printd", 1, printd);
        engine
    }
}

impl ExecutionEngine {
    /// An engine with no host functions registered.
    pub fn empty() -> Self {
        ExecutionEngine {
            externals: HashMap::new(),
            max_depth: MAX_CALL_DEPTH,
        }
    }

    pub fn add_global_mapping(&mut self, name: &str, arity: usize, function: HostFunction) {
        self.externals.insert(name.to_string(), (arity, function));
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn run_function(
        &self,
        module: &Module,
        name: &str,
        args: &[f64],
    ) -> Result<f64, ExecutionError> {
        let function = module
            .get_function(name)
            .ok_or_else(|| ExecutionError::UnknownFunction(name.to_string()))?;

        let mut stack = match self.enter(module, function, args.to_vec())? {
            Entered::Host(value) => return Ok(value),
            Entered::Frame(frame) => vec![frame],
        };

        loop {
            let depth = stack.len();
            let frame = match stack.last_mut() {
                Some(frame) => frame,
                None => return Err(ExecutionError::UnknownFunction(name.to_string())),
            };
            let entry = frame.entry;
            let inst = entry
                .instructions
                .get(frame.pc)
                .ok_or_else(|| frame.malformed("entry block has no return"))?;
            frame.pc += 1;

            let slot = match &inst.kind {
                InstructionKind::Float { op, lhs, rhs } => {
                    let (lhs, rhs) = (frame.double(*lhs)?, frame.double(*rhs)?);
                    Slot::Double(match op {
                        FloatOp::Add => lhs + rhs,
                        FloatOp::Sub => lhs - rhs,
                        FloatOp::Mul => lhs * rhs,
                        FloatOp::Div => lhs / rhs,
                    })
                }
                InstructionKind::Compare { predicate, lhs, rhs } => {
                    let (lhs, rhs) = (frame.double(*lhs)?, frame.double(*rhs)?);
                    Slot::Bool(predicate.evaluate(lhs, rhs))
                }
                InstructionKind::UIToFP(value) => Slot::Double(frame.flag(*value)?),
                InstructionKind::Call { callee, args } => {
                    let values = args
                        .iter()
                        .map(|arg| frame.double(*arg))
                        .collect::<Result<Vec<_>, _>>()?;
                    if depth >= self.max_depth {
                        return Err(ExecutionError::StackOverflow(self.max_depth));
                    }
                    match self.enter(module, *callee, values)? {
                        Entered::Host(value) => Slot::Double(value),
                        Entered::Frame(next) => {
                            stack.push(next);
                            continue;
                        }
                    }
                }
                InstructionKind::Return(value) => {
                    let value = frame.double(*value)?;
                    stack.pop();
                    match stack.last_mut() {
                        Some(caller) => caller.resume(value),
                        None => return Ok(value),
                    }
                    continue;
                }
            };

            if let Some(register) = inst.result {
                frame.registers.insert(register, slot);
            }
        }
    }

    /// Runs host functions straight away; defined functions get a new frame.
    fn enter<'m>(
        &self,
        module: &'m Module,
        handle: FunctionValue,
        args: Vec<f64>,
    ) -> Result<Entered<'m>, ExecutionError> {
        let function = module.function(handle).map_err(|err| {
            ExecutionError::Malformed("<deleted>".to_string(), err.to_string())
        })?;

        if function.count_params() != args.len() {
            return Err(ExecutionError::ArityMismatch {
                name: function.name.clone(),
                expected: function.count_params(),
                found: args.len(),
            });
        }

        if function.is_declaration() {
            let (_, host) = self
                .externals
                .get(&function.name)
                .filter(|(arity, _)| *arity == args.len())
                .ok_or_else(|| ExecutionError::UnresolvedSymbol(function.name.clone()))?;
            trace!(name = %function.name, ?args, "calling host function");
            return Ok(Entered::Host(host(&args)));
        }

        // no branches in the language, so only the entry block ever runs
        let entry = function.blocks.first().ok_or_else(|| {
            ExecutionError::Malformed(function.name.clone(), "no entry block".to_string())
        })?;
        Ok(Entered::Frame(Frame {
            name: &function.name,
            entry,
            args,
            registers: HashMap::new(),
            pc: 0,
        }))
    }
}

enum Entered<'m> {
    Host(f64),
    Frame(Frame<'m>),
}

/// One activation of a defined function, kept on the heap so deep recursion
/// only costs memory.
struct Frame<'m> {
    name: &'m str,
    entry: &'m Block,
    args: Vec<f64>,
    registers: HashMap<usize, Slot>,
    pc: usize,
}

impl<'m> Frame<'m> {
    fn malformed(&self, reason: &str) -> ExecutionError {
        ExecutionError::Malformed(self.name.to_string(), reason.to_string())
    }

    fn double(&self, value: Value) -> Result<f64, ExecutionError> {
        match value {
            Value::Const(constant) => Ok(constant),
            Value::Param(index) => self
                .args
                .get(index)
                .copied()
                .ok_or_else(|| self.malformed("parameter out of range")),
            Value::Register(register) => match self.registers.get(&register) {
                Some(Slot::Double(value)) => Ok(*value),
                _ => Err(self.malformed("expected a double register")),
            },
        }
    }

    fn flag(&self, value: Value) -> Result<f64, ExecutionError> {
        match value {
            Value::Register(register) => match self.registers.get(&register) {
                Some(Slot::Bool(flag)) => Ok(if *flag { 1.0 } else { 0.0 }),
                _ => Err(self.malformed("expected an i1 register")),
            },
            _ => Err(self.malformed("expected an i1 register")),
        }
    }

    /// Stores a callee's return value in the register of the pending call.
    fn resume(&mut self, value: f64) {
        let result = self
            .pc
            .checked_sub(1)
            .and_then(|pc| self.entry.instructions.get(pc))
            .and_then(|inst| inst.result);
        if let Some(register) = result {
            self.registers.insert(register, Slot::Double(value));
        }
    }
}
