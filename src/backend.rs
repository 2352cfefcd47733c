//! The IR backend driven by the lowering pass.
//!
//! A backend owns a module of functions and an insertion point inside the
//! body currently being built. Every value is either a `double` or, for the
//! result of a comparison, a boolean; handles are cheap `Copy` tokens whose
//! meaning is private to the backend.

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("no function body is open for emission")]
    NoInsertionPoint,
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("function {function} has no parameter {index}")]
    InvalidParameter { function: String, index: usize },
    #[error("call to {name} expected {expected} args found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("failed to build instruction: {0}")]
    Builder(String),
    #[error("failed to verify function {0}")]
    Verify(String),
}

pub trait Backend {
    type Function: Copy;
    type Value: Copy;

    /// Declare a function taking and returning `double`s. Declaring an
    /// existing name and arity again returns the existing function.
    fn declare_function(
        &mut self,
        name: &str,
        params: &[String],
    ) -> Result<Self::Function, BackendError>;

    /// First function matching both `name` and `arity`.
    fn lookup_function(&self, name: &str, arity: usize) -> Option<Self::Function>;

    fn function_is_defined(&self, function: Self::Function) -> bool;

    /// Open the entry block of `function` and move the insertion point there.
    fn begin_function_body(&mut self, function: Self::Function) -> Result<(), BackendError>;

    fn bind_parameter(
        &self,
        function: Self::Function,
        index: usize,
    ) -> Result<Self::Value, BackendError>;

    fn emit_constant(&mut self, value: f64) -> Self::Value;

    fn emit_add(&mut self, lhs: Self::Value, rhs: Self::Value)
        -> Result<Self::Value, BackendError>;

    fn emit_sub(&mut self, lhs: Self::Value, rhs: Self::Value)
        -> Result<Self::Value, BackendError>;

    fn emit_mul(&mut self, lhs: Self::Value, rhs: Self::Value)
        -> Result<Self::Value, BackendError>;

    /// Unordered `<`; the result is boolean typed.
    fn emit_less_than(
        &mut self,
        lhs: Self::Value,
        rhs: Self::Value,
    ) -> Result<Self::Value, BackendError>;

    /// Boolean to `0.0` / `1.0`.
    fn convert_bool_to_number(&mut self, value: Self::Value) -> Result<Self::Value, BackendError>;

    fn emit_call(
        &mut self,
        function: Self::Function,
        args: &[Self::Value],
    ) -> Result<Self::Value, BackendError>;

    fn emit_return(&mut self, value: Self::Value) -> Result<(), BackendError>;

    /// Called once a body has been returned from.
    fn finish_function(&mut self, _function: Self::Function) -> Result<(), BackendError> {
        Ok(())
    }
}
