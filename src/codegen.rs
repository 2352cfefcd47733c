use std::collections::HashMap;

use log::{debug, warn};

use crate::ast::{ASTNode, BinaryOperator, Expression, Function, Prototype};
use crate::backend::{Backend, BackendError};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum CodegenError {
    #[error("undefined variable {0}")]
    UndefinedVariable(String),
    #[error("unknown function {name} taking {arity} args")]
    UnknownFunction { name: String, arity: usize },
    #[error("cannot redefine function {name} taking {arity} args")]
    Redefinition { name: String, arity: usize },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Parameter bindings of the function being lowered.
pub type Scope<V> = HashMap<String, V>;

pub struct Codegen<B> {
    backend: B,
}

impl<B: Backend> Codegen<B> {
    pub fn new(backend: B) -> Self {
        Codegen { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn codegen_expr(
        &mut self,
        expr: &Expression,
        scope: &Scope<B::Value>,
    ) -> Result<B::Value, CodegenError> {
        match expr {
            Expression::Literal(value) => Ok(self.backend.emit_constant(*value)),
            Expression::Variable(name) => match scope.get(name) {
                Some(&var) => Ok(var),
                None => Err(CodegenError::UndefinedVariable(name.clone())),
            },
            Expression::Binary(op, left, right) => {
                let lhs = self.codegen_expr(left, scope)?;
                let rhs = self.codegen_expr(right, scope)?;

                let value = match op {
                    BinaryOperator::Add => self.backend.emit_add(lhs, rhs)?,
                    BinaryOperator::Sub => self.backend.emit_sub(lhs, rhs)?,
                    BinaryOperator::Mul => self.backend.emit_mul(lhs, rhs)?,
                    BinaryOperator::Less => {
                        let cmp = self.backend.emit_less_than(lhs, rhs)?;
                        self.backend.convert_bool_to_number(cmp)?
                    }
                };
                Ok(value)
            }
            Expression::Call(callee, args) => {
                let func = match self.backend.lookup_function(callee, args.len()) {
                    Some(func) => func,
                    None => {
                        return Err(CodegenError::UnknownFunction {
                            name: callee.clone(),
                            arity: args.len(),
                        })
                    }
                };

                let mut gened_args = Vec::with_capacity(args.len());
                for arg in args {
                    gened_args.push(self.codegen_expr(arg, scope)?);
                }

                Ok(self.backend.emit_call(func, &gened_args)?)
            }
        }
    }

    pub fn compile_proto(&mut self, proto: &Prototype) -> Result<B::Function, CodegenError> {
        Ok(self.backend.declare_function(&proto.name, &proto.args)?)
    }

    /// Lower a definition. A failure after the body was opened leaves the
    /// partial function in the backend module.
    pub fn compile_fn(&mut self, function: &Function) -> Result<B::Function, CodegenError> {
        let Function {
            prototype: proto,
            body,
        } = function;

        let func = match self.backend.lookup_function(&proto.name, proto.args.len()) {
            Some(func) => func,
            None => self.compile_proto(proto)?,
        };

        if self.backend.function_is_defined(func) {
            return Err(CodegenError::Redefinition {
                name: proto.name.clone(),
                arity: proto.args.len(),
            });
        }

        self.backend.begin_function_body(func)?;

        let mut scope: Scope<B::Value> = HashMap::with_capacity(proto.args.len());
        for (i, arg) in proto.args.iter().enumerate() {
            let value = self.backend.bind_parameter(func, i)?;
            if scope.insert(arg.clone(), value).is_some() {
                warn!("parameter {} of {} is bound more than once", arg, proto.name);
            }
        }

        let body = self.codegen_expr(body, &scope)?;
        self.backend.emit_return(body)?;
        self.backend.finish_function(func)?;

        Ok(func)
    }

    pub fn compile_node(&mut self, node: &ASTNode) -> Result<B::Function, CodegenError> {
        let func = match node {
            ASTNode::Function(func) => self.compile_fn(func),
            ASTNode::Extern(proto) => self.compile_proto(proto),
        }?;
        debug!("lowered {}", node.prototype().name);
        Ok(func)
    }

    pub fn codegen(&mut self, ast_nodes: &[ASTNode]) -> Result<(), CodegenError> {
        for node in ast_nodes {
            self.compile_node(node)?;
        }

        Ok(())
    }
}
