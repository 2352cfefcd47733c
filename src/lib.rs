//! Front end of a small expression language: a pull-based tokenizer, a
//! precedence-climbing parser and a lowering pass that drives any
//! [`Backend`](backend::Backend).
//!
//! Compilation is streaming. [`Session`] parses one top-level construct,
//! lowers it into the backend and only then reads on, so later input can
//! call anything declared earlier.

pub mod ast;
pub mod backend;
pub mod codegen;
pub mod ir;
pub mod lexer;
#[cfg(feature = "llvm")]
pub mod llvm;
pub mod parser;

use ast::ASTNode;
use backend::Backend;
use codegen::{Codegen, CodegenError};
use lexer::{CharSource, Lexer};
use parser::{AnonNames, ParseError, Parser};

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("codegen error: {0}")]
    Codegen(#[from] CodegenError),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ItemKind {
    Extern,
    Definition,
    TopLevelExpr,
}

/// Summary of one lowered top-level construct.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Compiled {
    pub kind: ItemKind,
    pub name: String,
}

impl Compiled {
    fn of(node: &ASTNode) -> Self {
        let kind = match node {
            ASTNode::Extern(_) => ItemKind::Extern,
            ASTNode::Function(func) if func.is_anonymous() => ItemKind::TopLevelExpr,
            ASTNode::Function(_) => ItemKind::Definition,
        };
        Compiled {
            kind,
            name: node.prototype().name.clone(),
        }
    }
}

/// One compilation session: a backend module that accumulates functions
/// and the counter naming anonymous top-level expressions.
pub struct Session<B> {
    codegen: Codegen<B>,
    names: AnonNames,
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B) -> Self {
        Session {
            codegen: Codegen::new(backend),
            names: AnonNames::default(),
        }
    }

    pub fn backend(&self) -> &B {
        self.codegen.backend()
    }

    pub fn into_backend(self) -> B {
        self.codegen.into_backend()
    }

    /// Parse and lower every construct from `source` in order, calling
    /// `on_item` right after each one is lowered. Stops at the first error;
    /// whatever was lowered before it stays in the backend.
    pub fn compile_with<S, F, E>(&mut self, source: S, mut on_item: F) -> Result<(), E>
    where
        S: CharSource,
        F: FnMut(&ASTNode, &Compiled, &mut B) -> Result<(), E>,
        E: From<CompileError>,
    {
        let mut parser = Parser::new(Lexer::new(source)).map_err(CompileError::from)?;
        while let Some(node) = parser
            .parse_top_level(&mut self.names)
            .map_err(CompileError::from)?
        {
            self.codegen
                .compile_node(&node)
                .map_err(CompileError::from)?;
            on_item(&node, &Compiled::of(&node), self.codegen.backend_mut())?;
        }
        Ok(())
    }

    pub fn compile<S: CharSource>(&mut self, source: S) -> Result<Vec<Compiled>, CompileError> {
        let mut compiled = Vec::new();
        self.compile_with(source, |_, item, _| {
            compiled.push(item.clone());
            Ok::<_, CompileError>(())
        })?;
        Ok(compiled)
    }

    pub fn compile_str(&mut self, input: &str) -> Result<Vec<Compiled>, CompileError> {
        self.compile(input.chars())
    }
}
