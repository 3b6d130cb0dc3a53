use tracing::debug;

use crate::ast::ASTNode;
use crate::codegen::Codegen;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Stage};
use crate::engine::{ExecutionEngine, ExecutionError};
use crate::ir::Module;
use crate::parser::Parser;

/// A top-level unit that made it through lowering.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub name: String,
    pub ir: String,
    /// result of evaluating a top-level expression
    pub value: Option<f64>,
}

/// One compilation run: parses, lowers and evaluates units against a single
/// module, reporting every failure to `sink` and carrying on.
#[derive(Debug)]
pub struct Session<S = Vec<Diagnostic>> {
    pub codegen: Codegen,
    pub engine: ExecutionEngine,
    pub sink: S,
    pub run_expressions: bool,
}

impl Session<Vec<Diagnostic>> {
    pub fn new() -> Self {
        Self::with_sink(Vec::new())
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.sink
    }
}

impl Default for Session<Vec<Diagnostic>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DiagnosticSink> Session<S> {
    pub fn with_sink(sink: S) -> Self {
        Session {
            codegen: Codegen::new("kaleidoscope"),
            engine: ExecutionEngine::default(),
            sink,
            run_expressions: true,
        }
    }

    pub fn module(&self) -> &Module {
        &self.codegen.module
    }

    pub fn run(&mut self, source: &str) -> Vec<Compiled> {
        self.run_parser(Parser::new(source))
    }

    pub fn run_parser(&mut self, parser: Parser) -> Vec<Compiled> {
        let mut compiled = Vec::new();
        for item in parser {
            match item {
                Ok(node) => compiled.extend(self.handle(&node)),
                Err(err) => self.sink.report(Diagnostic::new(Stage::Syntax, err)),
            }
        }
        compiled
    }

    fn handle(&mut self, node: &ASTNode) -> Option<Compiled> {
        let function = match self.codegen.compile_node(node) {
            Ok(function) => function,
            Err(err) => {
                self.sink.report(Diagnostic::new(Stage::Lowering, err));
                return None;
            }
        };

        let ir = match self.codegen.module.print_function(function) {
            Ok(ir) => ir,
            Err(err) => {
                self.sink.report(Diagnostic::new(Stage::Lowering, err));
                return None;
            }
        };

        let mut value = None;
        if let ASTNode::Expression(_) = node {
            if self.run_expressions {
                match self.engine.run_function(&self.codegen.module, node.name(), &[]) {
                    Ok(result) => value = Some(result),
                    Err(err) => self.sink.report(Diagnostic::new(Stage::Execution, err)),
                }
            }
            // the anonymous name is reused by the next expression
            self.codegen.module.delete(function);
        }

        debug!(name = node.name(), ?value, "compiled top-level unit");
        Some(Compiled {
            name: node.name().to_string(),
            ir,
            value,
        })
    }

    /// Calls a function of the module with no arguments.
    pub fn call(&self, name: &str) -> Result<f64, ExecutionError> {
        self.engine.run_function(&self.codegen.module, name, &[])
    }
}
