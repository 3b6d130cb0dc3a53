use std::fmt;

/// Name given to the zero-argument function wrapping a top-level expression.
pub const ANONYMOUS_FUNCTION: &str = "__anon_expr";

#[derive(Debug, PartialEq, Clone)]
pub struct Prototype {
    pub name: String,
    pub args: Vec<String>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Number(f64),
    Variable(String),
    Binary(char, Box<Expression>, Box<Expression>),
    Call(String, Vec<Expression>),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Function {
    pub prototype: Prototype,
    pub body: Expression,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ASTNode {
    Extern(Prototype),
    Function(Function),
    /// a bare top-level expression, wrapped as `ANONYMOUS_FUNCTION`
    Expression(Function),
}

impl Function {
    pub fn anonymous(body: Expression) -> Self {
        Function {
            prototype: Prototype {
                name: ANONYMOUS_FUNCTION.to_string(),
                args: Vec::new(),
            },
            body,
        }
    }
}

impl Expression {
    /// Height of the tree; a leaf is 1. Walks with an explicit stack.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1)];
        while let Some((expr, depth)) = pending.pop() {
            deepest = deepest.max(depth);
            match expr {
                Expression::Binary(_, lhs, rhs) => {
                    pending.push((lhs.as_ref(), depth + 1));
                    pending.push((rhs.as_ref(), depth + 1));
                }
                Expression::Call(_, args) => {
                    pending.extend(args.iter().map(|arg| (arg, depth + 1)));
                }
                Expression::Number(_) | Expression::Variable(_) => {}
            }
        }
        deepest
    }
}

impl ASTNode {
    pub fn name(&self) -> &str {
        match self {
            ASTNode::Extern(proto) => &proto.name,
            ASTNode::Function(func) | ASTNode::Expression(func) => &func.prototype.name,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Number(value) => write!(f, "{}", value),
            Expression::Variable(name) => write!(f, "{}", name),
            Expression::Binary(op, lhs, rhs) => write!(f, "({} {} {})", lhs, op, rhs),
            Expression::Call(callee, args) => {
                write!(f, "{}(", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.args.join(" "))
    }
}
