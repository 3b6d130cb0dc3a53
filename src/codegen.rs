use std::collections::HashMap;

use tracing::debug;

use crate::ast::{ASTNode, Expression, Function, Prototype};
use crate::ir::{Builder, FloatPredicate, FunctionValue, IrError, Module, Value};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable referenced {0}")]
    UndefinedVariable(String),
    #[error("unknown operator {0}")]
    UnknownOperator(char),
    #[error("unknown function {0}")]
    UndefinedFunction(String),
    #[error("invalid number of args in call {name} expected {expected} found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("function {0} cannot be redefined")]
    Redefinition(String),
    #[error("function {name} was declared with {expected} args but defined with {found}")]
    SignatureMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("failed to verify function {0}")]
    InvalidFunction(String),
    #[error(transparent)]
    Ir(#[from] IrError),
}

/// Lowers AST nodes into an owned IR module.
///
/// `named_values` is the symbol environment of the function body being
/// lowered; it is cleared at the start of every function.
#[derive(Debug)]
pub struct Codegen {
    pub module: Module,
    pub builder: Builder,
    pub named_values: HashMap<String, Value>,
}

impl Codegen {
    pub fn new(module_name: &str) -> Codegen {
        Codegen {
            module: Module::new(module_name),
            builder: Builder::new(),
            named_values: HashMap::new(),
        }
    }

    fn codegen_expr(&mut self, expr: &Expression) -> Result<Value, CodegenError> {
        match expr {
            Expression::Number(value) => Ok(self.builder.const_float(*value)),
            Expression::Variable(name) => match self.named_values.get(name) {
                Some(var) => Ok(*var),
                None => Err(CodegenError::UndefinedVariable(name.clone())),
            },
            Expression::Binary(op, left, right) => {
                let lhs = self.codegen_expr(left)?;
                let rhs = self.codegen_expr(right)?;
                let module = &mut self.module;

                let value = match op {
                    '+' => self.builder.build_float_add(module, lhs, rhs, "tmpadd")?,
                    '-' => self.builder.build_float_sub(module, lhs, rhs, "tmpsub")?,
                    '*' => self.builder.build_float_mul(module, lhs, rhs, "tmpmul")?,
                    '/' => self.builder.build_float_div(module, lhs, rhs, "tmpdiv")?,
                    '<' => {
                        let cmp = self.builder.build_float_compare(
                            module,
                            FloatPredicate::ULT,
                            lhs,
                            rhs,
                            "tmpcmp",
                        )?;
                        self.builder.build_unsigned_int_to_float(module, cmp, "tmpbool")?
                    }
                    _ => return Err(CodegenError::UnknownOperator(*op)),
                };
                Ok(value)
            }
            Expression::Call(callee, args) => {
                let func = match self.module.get_function(callee) {
                    Some(func) => func,
                    None => return Err(CodegenError::UndefinedFunction(callee.clone())),
                };

                let expected = self.module.count_params(func)?;
                if expected != args.len() {
                    return Err(CodegenError::ArityMismatch {
                        name: callee.clone(),
                        expected,
                        found: args.len(),
                    });
                }

                let mut gened_args = Vec::with_capacity(args.len());
                for arg in args {
                    gened_args.push(self.codegen_expr(arg)?);
                }

                Ok(self
                    .builder
                    .build_call(&mut self.module, func, &gened_args, "tmpcall")?)
            }
        }
    }

    fn compile_proto(&mut self, proto: &Prototype) -> Result<FunctionValue, CodegenError> {
        if let Some(existing) = self.module.get_function(&proto.name) {
            let expected = self.module.count_params(existing)?;
            if expected != proto.args.len() {
                return Err(CodegenError::SignatureMismatch {
                    name: proto.name.clone(),
                    expected,
                    found: proto.args.len(),
                });
            }
            return Ok(existing);
        }

        Ok(self.module.add_function(&proto.name, &proto.args)?)
    }

    fn compile_fn(&mut self, function: &Function) -> Result<FunctionValue, CodegenError> {
        let Function {
            prototype: proto,
            body,
        } = function;

        // a previous `extern` may already have declared this function
        let (func, declared_names) = match self.module.get_function(&proto.name) {
            Some(existing) => {
                let declared = self.module.function(existing)?;
                if !declared.is_declaration() {
                    return Err(CodegenError::Redefinition(proto.name.clone()));
                }
                if declared.count_params() != proto.args.len() {
                    return Err(CodegenError::SignatureMismatch {
                        name: proto.name.clone(),
                        expected: declared.count_params(),
                        found: proto.args.len(),
                    });
                }
                let declared_names = declared.params.clone();
                self.module.set_param_names(existing, &proto.args)?;
                (existing, Some(declared_names))
            }
            None => (self.compile_proto(proto)?, None),
        };

        let result = self.compile_body(func, proto, body);
        self.builder.clear_insertion_position();

        if let Err(err) = result {
            match declared_names {
                Some(names) => {
                    self.module.clear_body(func)?;
                    self.module.set_param_names(func, &names)?;
                }
                None => {
                    self.module.delete(func);
                }
            }
            return Err(err);
        }

        Ok(func)
    }

    fn compile_body(
        &mut self,
        func: FunctionValue,
        proto: &Prototype,
        body: &Expression,
    ) -> Result<(), CodegenError> {
        let entry = self.module.append_basic_block(func, "entry")?;
        self.builder.position_at_end(entry);

        self.named_values.clear();
        self.named_values.reserve(proto.args.len());
        for (i, arg) in proto.args.iter().enumerate() {
            self.named_values.insert(arg.clone(), Value::Param(i));
        }

        let body = self.codegen_expr(body)?;
        self.builder.build_return(&mut self.module, body)?;

        self.module.verify(func).map_err(|err| {
            debug!(%err, "verification failed");
            CodegenError::InvalidFunction(proto.name.clone())
        })
    }

    /// Lowers one top-level unit. On failure nothing new is left registered
    /// in the module.
    pub fn compile_node(&mut self, node: &ASTNode) -> Result<FunctionValue, CodegenError> {
        let func = match node {
            ASTNode::Extern(proto) => self.compile_proto(proto),
            ASTNode::Function(func) | ASTNode::Expression(func) => self.compile_fn(func),
        }?;
        debug!(name = node.name(), "lowered top-level unit");
        Ok(func)
    }

    pub fn codegen(&mut self, ast_nodes: &[ASTNode]) -> Result<(), CodegenError> {
        for node in ast_nodes {
            self.compile_node(node)?;
        }

        Ok(())
    }
}
