//! A small SSA-style IR: a module of functions, each made of basic blocks of
//! instructions over `double` and `i1` values.
//!
//! `Module` owns every function and hands out copyable `FunctionValue`
//! handles. A `Builder` remembers an insertion block and appends
//! instructions to it. `Module::verify` checks the structural rules the
//! execution engine relies on.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum IrError {
    #[error("function {0} already exists in the module")]
    DuplicateFunction(String),
    #[error("function handle does not refer to a live function")]
    InvalidFunction,
    #[error("block handle does not refer to a live block")]
    InvalidBlock,
    #[error("builder is not positioned at a block")]
    NoInsertionBlock,
    #[error("function {function} expects {expected} parameter names, got {found}")]
    ParameterCount {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("function {function} failed verification: {reason}")]
    Verification { function: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Double,
    Bool,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Double => write!(f, "double"),
            Type::Bool => write!(f, "i1"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionValue(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BasicBlock {
    function: FunctionValue,
    index: usize,
}

/// An operand. Registers are numbered per function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Const(f64),
    Param(usize),
    Register(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl FloatOp {
    fn mnemonic(self) -> &'static str {
        match self {
            FloatOp::Add => "fadd",
            FloatOp::Sub => "fsub",
            FloatOp::Mul => "fmul",
            FloatOp::Div => "fdiv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPredicate {
    /// unordered or less than
    ULT,
}

impl FloatPredicate {
    pub fn evaluate(self, lhs: f64, rhs: f64) -> bool {
        match self {
            FloatPredicate::ULT => lhs.is_nan() || rhs.is_nan() || lhs < rhs,
        }
    }
}

impl fmt::Display for FloatPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FloatPredicate::ULT => write!(f, "ult"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    Float {
        op: FloatOp,
        lhs: Value,
        rhs: Value,
    },
    Compare {
        predicate: FloatPredicate,
        lhs: Value,
        rhs: Value,
    },
    UIToFP(Value),
    Call {
        callee: FunctionValue,
        args: Vec<Value>,
    },
    Return(Value),
}

impl InstructionKind {
    pub fn result_type(&self) -> Option<Type> {
        match self {
            InstructionKind::Compare { .. } => Some(Type::Bool),
            InstructionKind::Return(_) => None,
            _ => Some(Type::Double),
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, InstructionKind::Return(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub result: Option<usize>,
    pub name: String,
    pub kind: InstructionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub blocks: Vec<Block>,
    next_register: usize,
}

impl Function {
    /// a function without blocks is an external declaration
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn count_params(&self) -> usize {
        self.params.len()
    }

    fn register_name(&self, register: usize) -> Option<&str> {
        self.blocks
            .iter()
            .flat_map(|block| block.instructions.iter())
            .find(|inst| inst.result == Some(register))
            .map(|inst| inst.name.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    name: String,
    functions: Vec<Option<Function>>,
    names: HashMap<String, FunctionValue>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Module {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Declares `double name(double, ...)` with one parameter per name.
    pub fn add_function(
        &mut self,
        name: &str,
        params: &[String],
    ) -> Result<FunctionValue, IrError> {
        if self.names.contains_key(name) {
            return Err(IrError::DuplicateFunction(name.to_string()));
        }

        let handle = FunctionValue(self.functions.len());
        self.functions.push(Some(Function {
            name: name.to_string(),
            params: params.to_vec(),
            blocks: Vec::new(),
            next_register: 0,
        }));
        self.names.insert(name.to_string(), handle);
        Ok(handle)
    }

    pub fn get_function(&self, name: &str) -> Option<FunctionValue> {
        self.names.get(name).copied()
    }

    pub fn function(&self, handle: FunctionValue) -> Result<&Function, IrError> {
        self.functions
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(IrError::InvalidFunction)
    }

    fn function_mut(&mut self, handle: FunctionValue) -> Result<&mut Function, IrError> {
        self.functions
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(IrError::InvalidFunction)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> + '_ {
        self.functions.iter().filter_map(Option::as_ref)
    }

    pub fn count_params(&self, handle: FunctionValue) -> Result<usize, IrError> {
        Ok(self.function(handle)?.count_params())
    }

    pub fn set_param_names(
        &mut self,
        handle: FunctionValue,
        names: &[String],
    ) -> Result<(), IrError> {
        let function = self.function_mut(handle)?;
        if function.params.len() != names.len() {
            return Err(IrError::ParameterCount {
                function: function.name.clone(),
                expected: function.params.len(),
                found: names.len(),
            });
        }
        function.params = names.to_vec();
        Ok(())
    }

    pub fn append_basic_block(
        &mut self,
        handle: FunctionValue,
        name: &str,
    ) -> Result<BasicBlock, IrError> {
        let function = self.function_mut(handle)?;
        function.blocks.push(Block {
            name: name.to_string(),
            instructions: Vec::new(),
        });
        Ok(BasicBlock {
            function: handle,
            index: function.blocks.len() - 1,
        })
    }

    /// Drops every block, turning a definition back into a declaration.
    pub fn clear_body(&mut self, handle: FunctionValue) -> Result<(), IrError> {
        let function = self.function_mut(handle)?;
        function.blocks.clear();
        function.next_register = 0;
        Ok(())
    }

    /// Removes the function and frees its name.
    pub fn delete(&mut self, handle: FunctionValue) -> Option<Function> {
        let function = self.functions.get_mut(handle.0)?.take()?;
        self.names.remove(&function.name);
        Some(function)
    }

    fn insert(
        &mut self,
        block: BasicBlock,
        name: &str,
        kind: InstructionKind,
    ) -> Result<Option<Value>, IrError> {
        let function = self.function_mut(block.function)?;
        let result = match kind.result_type() {
            Some(_) => {
                let register = function.next_register;
                function.next_register += 1;
                Some(register)
            }
            None => None,
        };
        let target = function
            .blocks
            .get_mut(block.index)
            .ok_or(IrError::InvalidBlock)?;
        target.instructions.push(Instruction {
            result,
            name: name.to_string(),
            kind,
        });
        Ok(result.map(Value::Register))
    }

    pub fn verify(&self, handle: FunctionValue) -> Result<(), IrError> {
        let function = self.function(handle)?;
        self.check_function(function)
            .map_err(|reason| IrError::Verification {
                function: function.name.clone(),
                reason,
            })
    }

    fn check_function(&self, function: &Function) -> Result<(), String> {
        if function.is_declaration() {
            return Err("function has no body".to_string());
        }

        let mut defined: HashMap<usize, Type> = HashMap::new();
        let operand_type = |defined: &HashMap<usize, Type>, value: Value| -> Result<Type, String> {
            match value {
                Value::Const(_) => Ok(Type::Double),
                Value::Param(index) if index < function.params.len() => Ok(Type::Double),
                Value::Param(index) => Err(format!("parameter {} out of range", index)),
                Value::Register(register) => defined
                    .get(&register)
                    .copied()
                    .ok_or_else(|| format!("use of undefined value %{}", register)),
            }
        };
        let expect = |defined: &HashMap<usize, Type>, value, ty: Type| -> Result<(), String> {
            let found = operand_type(defined, value)?;
            if found == ty {
                Ok(())
            } else {
                Err(format!("expected {} operand, found {}", ty, found))
            }
        };

        for block in &function.blocks {
            match block.instructions.last() {
                Some(last) if last.kind.is_terminator() => {}
                _ => return Err(format!("block {} is not terminated", block.name)),
            }

            for (position, inst) in block.instructions.iter().enumerate() {
                if inst.kind.is_terminator() && position + 1 != block.instructions.len() {
                    return Err(format!("terminator in the middle of block {}", block.name));
                }

                match &inst.kind {
                    InstructionKind::Float { lhs, rhs, .. }
                    | InstructionKind::Compare { lhs, rhs, .. } => {
                        expect(&defined, *lhs, Type::Double)?;
                        expect(&defined, *rhs, Type::Double)?;
                    }
                    InstructionKind::UIToFP(value) => expect(&defined, *value, Type::Bool)?,
                    InstructionKind::Call { callee, args } => {
                        let target = self
                            .function(*callee)
                            .map_err(|_| "call to a deleted function".to_string())?;
                        if target.count_params() != args.len() {
                            return Err(format!(
                                "call to {} passes {} arguments, expected {}",
                                target.name,
                                args.len(),
                                target.count_params()
                            ));
                        }
                        for arg in args {
                            expect(&defined, *arg, Type::Double)?;
                        }
                    }
                    InstructionKind::Return(value) => expect(&defined, *value, Type::Double)?,
                }

                if let (Some(register), Some(ty)) = (inst.result, inst.kind.result_type()) {
                    defined.insert(register, ty);
                }
            }
        }

        Ok(())
    }

    pub fn print_function(&self, handle: FunctionValue) -> Result<String, IrError> {
        let function = self.function(handle)?;
        Ok(FunctionDisplay {
            module: self,
            function,
        }
        .to_string())
    }
}

struct FunctionDisplay<'a> {
    module: &'a Module,
    function: &'a Function,
}

impl FunctionDisplay<'_> {
    fn value(&self, value: Value) -> String {
        match value {
            Value::Const(constant) => format!("{:?}", constant),
            Value::Param(index) => match self.function.params.get(index) {
                Some(name) if !name.is_empty() => format!("%{}", name),
                _ => format!("%arg{}", index),
            },
            Value::Register(register) => {
                format!("%{}{}", self.function.register_name(register).unwrap_or(""), register)
            }
        }
    }

    fn callee(&self, callee: FunctionValue) -> String {
        self.module
            .function(callee)
            .map_or_else(|_| "<deleted>".to_string(), |f| f.name.clone())
    }
}

impl fmt::Display for FunctionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = self.function;
        let params = (0..func.params.len())
            .map(|index| format!("double {}", self.value(Value::Param(index))))
            .collect::<Vec<_>>()
            .join(", ");

        if func.is_declaration() {
            return writeln!(f, "declare double @{}({})", func.name, params);
        }

        writeln!(f, "define double @{}({}) {{", func.name, params)?;
        for block in &func.blocks {
            writeln!(f, "{}:", block.name)?;
            for inst in &block.instructions {
                write!(f, "  ")?;
                if let Some(register) = inst.result {
                    write!(f, "{} = ", self.value(Value::Register(register)))?;
                }
                match &inst.kind {
                    InstructionKind::Float { op, lhs, rhs } => write!(
                        f,
                        "{} double {}, {}",
                        op.mnemonic(),
                        self.value(*lhs),
                        self.value(*rhs)
                    )?,
                    InstructionKind::Compare {
                        predicate,
                        lhs,
                        rhs,
                    } => write!(
                        f,
                        "fcmp {} double {}, {}",
                        predicate,
                        self.value(*lhs),
                        self.value(*rhs)
                    )?,
                    InstructionKind::UIToFP(value) => {
                        write!(f, "uitofp i1 {} to double", self.value(*value))?
                    }
                    InstructionKind::Call { callee, args } => {
                        let args = args
                            .iter()
                            .map(|arg| format!("double {}", self.value(*arg)))
                            .collect::<Vec<_>>()
                            .join(", ");
                        write!(f, "call double @{}({})", self.callee(*callee), args)?
                    }
                    InstructionKind::Return(value) => {
                        write!(f, "ret double {}", self.value(*value))?
                    }
                }
                writeln!(f)?;
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        for function in self.functions() {
            writeln!(f)?;
            write!(
                f,
                "{}",
                FunctionDisplay {
                    module: self,
                    function,
                }
            )?;
        }
        Ok(())
    }
}

/// Appends instructions at the end of its current block.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    block: Option<BasicBlock>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position_at_end(&mut self, block: BasicBlock) {
        self.block = Some(block);
    }

    pub fn clear_insertion_position(&mut self) {
        self.block = None;
    }

    pub fn const_float(&self, value: f64) -> Value {
        Value::Const(value)
    }

    fn build(
        &self,
        module: &mut Module,
        name: &str,
        kind: InstructionKind,
    ) -> Result<Option<Value>, IrError> {
        let block = self.block.ok_or(IrError::NoInsertionBlock)?;
        module.insert(block, name, kind)
    }

    fn build_value(
        &self,
        module: &mut Module,
        name: &str,
        kind: InstructionKind,
    ) -> Result<Value, IrError> {
        self.build(module, name, kind)?.ok_or(IrError::InvalidBlock)
    }

    fn build_float_op(
        &self,
        module: &mut Module,
        op: FloatOp,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.build_value(module, name, InstructionKind::Float { op, lhs, rhs })
    }

    pub fn build_float_add(
        &self,
        module: &mut Module,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.build_float_op(module, FloatOp::Add, lhs, rhs, name)
    }

    pub fn build_float_sub(
        &self,
        module: &mut Module,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.build_float_op(module, FloatOp::Sub, lhs, rhs, name)
    }

    pub fn build_float_mul(
        &self,
        module: &mut Module,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.build_float_op(module, FloatOp::Mul, lhs, rhs, name)
    }

    pub fn build_float_div(
        &self,
        module: &mut Module,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.build_float_op(module, FloatOp::Div, lhs, rhs, name)
    }

    pub fn build_float_compare(
        &self,
        module: &mut Module,
        predicate: FloatPredicate,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.build_value(module, name, InstructionKind::Compare { predicate, lhs, rhs })
    }

    pub fn build_unsigned_int_to_float(
        &self,
        module: &mut Module,
        value: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.build_value(module, name, InstructionKind::UIToFP(value))
    }

    pub fn build_call(
        &self,
        module: &mut Module,
        callee: FunctionValue,
        args: &[Value],
        name: &str,
    ) -> Result<Value, IrError> {
        let kind = InstructionKind::Call {
            callee,
            args: args.to_vec(),
        };
        self.build_value(module, name, kind)
    }

    pub fn build_return(&self, module: &mut Module, value: Value) -> Result<(), IrError> {
        self.build(module, "", InstructionKind::Return(value)).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn define_add(module: &mut Module) -> FunctionValue {
        let add = module.add_function("add", &names(&["a", "b"])).unwrap();
        let entry = module.append_basic_block(add, "entry").unwrap();
        let mut builder = Builder::new();
        builder.position_at_end(entry);
        let sum = builder
            .build_float_add(module, Value::Param(0), Value::Param(1), "tmpadd")
            .unwrap();
        builder.build_return(module, sum).unwrap();
        add
    }

    #[test]
    fn builds_and_verifies() {
        let mut module = Module::new("test");
        let add = define_add(&mut module);
        assert_eq!(module.verify(add), Ok(()));
        assert_eq!(module.get_function("add"), Some(add));
        assert_eq!(
            module.print_function(add).unwrap(),
            "define double @add(double %a, double %b) {\n\
             entry:\n  \
             %tmpadd0 = fadd double %a, %b\n  \
             ret double %tmpadd0\n\
             }\n"
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut module = Module::new("test");
        module.add_function("f", &[]).unwrap();
        assert_eq!(
            module.add_function("f", &[]),
            Err(IrError::DuplicateFunction("f".to_string()))
        );
    }

    #[test]
    fn delete_frees_the_name() {
        let mut module = Module::new("test");
        let add = define_add(&mut module);
        assert!(module.delete(add).is_some());
        assert_eq!(module.get_function("add"), None);
        assert_eq!(module.function(add), Err(IrError::InvalidFunction));
        assert!(module.delete(add).is_none());
        assert!(module.add_function("add", &[]).is_ok());
    }

    #[test]
    fn declarations_do_not_verify() {
        let mut module = Module::new("test");
        let sin = module.add_function("sin", &names(&["x"])).unwrap();
        assert!(matches!(module.verify(sin), Err(IrError::Verification { .. })));
        assert_eq!(module.print_function(sin).unwrap(), "declare double @sin(double %x)\n");
    }

    #[test]
    fn unterminated_block_fails_verification() {
        let mut module = Module::new("test");
        let f = module.add_function("f", &[]).unwrap();
        let entry = module.append_basic_block(f, "entry").unwrap();
        let mut builder = Builder::new();
        builder.position_at_end(entry);
        builder
            .build_float_mul(&mut module, Value::Const(1.0), Value::Const(2.0), "tmpmul")
            .unwrap();
        match module.verify(f) {
            Err(IrError::Verification { reason, .. }) => assert!(reason.contains("not terminated")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn operand_types_are_checked() {
        let mut module = Module::new("test");
        let f = module.add_function("f", &names(&["x"])).unwrap();
        let entry = module.append_basic_block(f, "entry").unwrap();
        let mut builder = Builder::new();
        builder.position_at_end(entry);
        let cmp = builder
            .build_float_compare(
                &mut module,
                FloatPredicate::ULT,
                Value::Param(0),
                Value::Const(1.0),
                "tmpcmp",
            )
            .unwrap();
        builder.build_return(&mut module, cmp).unwrap();
        match module.verify(f) {
            Err(IrError::Verification { reason, .. }) => {
                assert_eq!(reason, "expected double operand, found i1")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn calls_must_match_arity() {
        let mut module = Module::new("test");
        let add = define_add(&mut module);
        let f = module.add_function("f", &[]).unwrap();
        let entry = module.append_basic_block(f, "entry").unwrap();
        let mut builder = Builder::new();
        builder.position_at_end(entry);
        let call = builder
            .build_call(&mut module, add, &[Value::Const(1.0)], "tmpcall")
            .unwrap();
        builder.build_return(&mut module, call).unwrap();
        assert!(module.verify(f).is_err());
    }

    #[test]
    fn builder_needs_a_block() {
        let mut module = Module::new("test");
        let builder = Builder::new();
        assert_eq!(
            builder.build_return(&mut module, Value::Const(0.0)),
            Err(IrError::NoInsertionBlock)
        );
    }

    #[test]
    fn clear_body_restores_declaration() {
        let mut module = Module::new("test");
        let add = define_add(&mut module);
        module.clear_body(add).unwrap();
        assert!(module.function(add).unwrap().is_declaration());
    }
}
