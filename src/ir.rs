//! In-memory IR module.
//!
//! Records the instructions the lowering pass emits, prints them as
//! LLVM-flavoured text and can interpret defined functions directly, so the
//! front end is usable without an LLVM installation.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use crate::backend::{Backend, BackendError};

/// Deepest call chain `Module::evaluate` will follow.
pub const MAX_CALL_DEPTH: usize = 1024;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Type {
    Double,
    Bool,
}

impl Type {
    pub fn name(self) -> &'static str {
        match self {
            Type::Double => "double",
            Type::Bool => "i1",
        }
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum Operand {
    Const(f64),
    Param(usize),
    Inst(usize),
}

/// Handle to a value in the body currently being built.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Value {
    operand: Operand,
    ty: Type,
}

impl Value {
    pub fn ty(&self) -> Type {
        self.ty
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct FunctionId(usize);

#[derive(Debug, PartialEq, Clone)]
enum Instruction {
    FAdd(Value, Value),
    FSub(Value, Value),
    FMul(Value, Value),
    FCmpUlt(Value, Value),
    UiToFp(Value),
    Call(FunctionId, Vec<Value>),
    Ret(Value),
}

/// Local names of one function. Parameters are entered first, so
/// temporaries never reuse them.
#[derive(Debug, Default)]
struct NameTable {
    counts: HashMap<String, usize>,
    taken: HashSet<String>,
}

impl NameTable {
    fn with_params(params: &[String]) -> (Self, Vec<String>) {
        let mut table = NameTable::default();
        let names = params.iter().map(|p| table.unique_name(p)).collect();
        (table, names)
    }

    /// `addtmp`, `addtmp1`, `addtmp2`, ...
    fn unique_name(&mut self, hint: &str) -> String {
        let count = self.counts.entry(hint.to_string()).or_insert(0);
        loop {
            let name = if *count == 0 {
                hint.to_string()
            } else {
                format!("{}{}", hint, count)
            };
            *count += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }
}

#[derive(Debug)]
struct Body {
    instructions: Vec<(String, Instruction)>,
    names: NameTable,
}

#[derive(Debug)]
pub struct Function {
    name: String,
    params: Vec<String>,
    body: Option<Body>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn is_defined(&self) -> bool {
        self.body.is_some()
    }

    /// Parameter names as printed, with repeats suffixed.
    fn param_names(&self) -> Vec<String> {
        NameTable::with_params(&self.params).1
    }

    fn operand(&self, params: &[String], value: &Value) -> String {
        let named = |name: Option<&String>| match name {
            Some(name) => format!("%{}", name),
            None => "undef".to_string(),
        };
        match value.operand {
            Operand::Const(v) => format_double(v),
            Operand::Param(i) => named(params.get(i)),
            Operand::Inst(i) => named(
                self.body
                    .as_ref()
                    .and_then(|body| body.instructions.get(i))
                    .map(|(name, _)| name),
            ),
        }
    }
}

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum EvalError {
    #[error("unknown function {name} taking {arity} args")]
    UnknownFunction { name: String, arity: usize },
    #[error("extern function {0} has no host implementation")]
    UnresolvedExtern(String),
    #[error("function {0} does not return")]
    MissingReturn(String),
    #[error("call depth exceeded {0}")]
    RecursionLimit(usize),
}

#[derive(Debug)]
pub struct Module {
    name: String,
    functions: Vec<Function>,
    cursor: Option<FunctionId>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Module {
            name: name.to_string(),
            functions: Vec::new(),
            cursor: None,
        }
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0]
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    fn current_body(&mut self) -> Result<&mut Body, BackendError> {
        let functions = &mut self.functions;
        self.cursor
            .and_then(move |id| functions[id.0].body.as_mut())
            .ok_or(BackendError::NoInsertionPoint)
    }

    fn push(&mut self, hint: &str, inst: Instruction, ty: Type) -> Result<Value, BackendError> {
        let body = self.current_body()?;
        let index = body.instructions.len();
        let name = body.names.unique_name(hint);
        body.instructions.push((name, inst));
        Ok(Value {
            operand: Operand::Inst(index),
            ty,
        })
    }

    fn binary(
        &mut self,
        hint: &str,
        lhs: Value,
        rhs: Value,
        build: fn(Value, Value) -> Instruction,
        ty: Type,
    ) -> Result<Value, BackendError> {
        expect_type(lhs, Type::Double)?;
        expect_type(rhs, Type::Double)?;
        self.push(hint, build(lhs, rhs), ty)
    }

    /// Run a function of this module. Declared-only functions resolve to a
    /// small set of host math functions.
    pub fn evaluate(&self, name: &str, args: &[f64]) -> Result<f64, EvalError> {
        match self.lookup_function(name, args.len()) {
            Some(id) => self.call(id, args, 0),
            None => Err(EvalError::UnknownFunction {
                name: name.to_string(),
                arity: args.len(),
            }),
        }
    }

    fn call(&self, id: FunctionId, args: &[f64], depth: usize) -> Result<f64, EvalError> {
        if depth >= MAX_CALL_DEPTH {
            return Err(EvalError::RecursionLimit(MAX_CALL_DEPTH));
        }

        let func = &self.functions[id.0];
        let body = match &func.body {
            Some(body) => body,
            None => {
                return host_function(&func.name, args)
                    .ok_or_else(|| EvalError::UnresolvedExtern(func.name.clone()))
            }
        };

        let read = |results: &[f64], value: &Value| match value.operand {
            Operand::Const(v) => v,
            Operand::Param(i) => args.get(i).copied().unwrap_or(f64::NAN),
            Operand::Inst(i) => results.get(i).copied().unwrap_or(f64::NAN),
        };

        let mut results = Vec::with_capacity(body.instructions.len());
        for (_, inst) in &body.instructions {
            let result = match inst {
                Instruction::FAdd(l, r) => read(&results, l) + read(&results, r),
                Instruction::FSub(l, r) => read(&results, l) - read(&results, r),
                Instruction::FMul(l, r) => read(&results, l) * read(&results, r),
                Instruction::FCmpUlt(l, r) => {
                    let (l, r) = (read(&results, l), read(&results, r));
                    if l.is_nan() || r.is_nan() || l < r {
                        1.0
                    } else {
                        0.0
                    }
                }
                Instruction::UiToFp(v) => read(&results, v),
                Instruction::Call(callee, call_args) => {
                    let values: Vec<f64> = call_args.iter().map(|a| read(&results, a)).collect();
                    self.call(*callee, &values, depth + 1)?
                }
                Instruction::Ret(v) => return Ok(read(&results, v)),
            };
            results.push(result);
        }

        Err(EvalError::MissingReturn(func.name.clone()))
    }

    fn write_function(&self, f: &mut fmt::Formatter<'_>, func: &Function) -> fmt::Result {
        let param_names = func.param_names();
        let params: Vec<String> = param_names.iter().map(|p| format!("double %{}", p)).collect();
        let body = match &func.body {
            Some(body) => body,
            None => return writeln!(f, "declare double @{}({})", func.name, params.join(", ")),
        };

        writeln!(f, "define double @{}({}) {{", func.name, params.join(", "))?;
        writeln!(f, "entry:")?;
        for (name, inst) in &body.instructions {
            let op = |v: &Value| func.operand(&param_names, v);
            match inst {
                Instruction::FAdd(l, r) => {
                    writeln!(f, "  %{} = fadd double {}, {}", name, op(l), op(r))?
                }
                Instruction::FSub(l, r) => {
                    writeln!(f, "  %{} = fsub double {}, {}", name, op(l), op(r))?
                }
                Instruction::FMul(l, r) => {
                    writeln!(f, "  %{} = fmul double {}, {}", name, op(l), op(r))?
                }
                Instruction::FCmpUlt(l, r) => {
                    writeln!(f, "  %{} = fcmp ult double {}, {}", name, op(l), op(r))?
                }
                Instruction::UiToFp(v) => {
                    writeln!(f, "  %{} = uitofp i1 {} to double", name, op(v))?
                }
                Instruction::Call(callee, args) => {
                    let args: Vec<String> =
                        args.iter().map(|a| format!("double {}", op(a))).collect();
                    writeln!(
                        f,
                        "  %{} = call double @{}({})",
                        name,
                        self.function(*callee).name,
                        args.join(", ")
                    )?
                }
                Instruction::Ret(v) => writeln!(f, "  ret double {}", op(v))?,
            }
        }
        writeln!(f, "}}")
    }
}

/// LLVM's decimal form when it reads back exactly, the hex bit pattern
/// otherwise (which also covers infinities and NaN).
fn format_double(value: f64) -> String {
    if value.is_finite() {
        let sci = format!("{:.6e}", value);
        if let Some((mantissa, exp)) = sci.split_once('e') {
            if let Ok(exp) = exp.parse::<i32>() {
                let sign = if exp < 0 { '-' } else { '+' };
                let text = format!("{}e{}{:02}", mantissa, sign, exp.abs());
                if text.parse::<f64>() == Ok(value) {
                    return text;
                }
            }
        }
    }
    format!("0x{:016X}", value.to_bits())
}

fn expect_type(value: Value, ty: Type) -> Result<(), BackendError> {
    if value.ty == ty {
        Ok(())
    } else {
        Err(BackendError::TypeMismatch {
            expected: ty.name(),
            found: value.ty.name(),
        })
    }
}

fn host_function(name: &str, args: &[f64]) -> Option<f64> {
    let value = match (name, args) {
        ("sin", &[x]) => x.sin(),
        ("cos", &[x]) => x.cos(),
        ("tan", &[x]) => x.tan(),
        ("sqrt", &[x]) => x.sqrt(),
        ("exp", &[x]) => x.exp(),
        ("log", &[x]) => x.ln(),
        ("fabs", &[x]) => x.abs(),
        ("floor", &[x]) => x.floor(),
        ("ceil", &[x]) => x.ceil(),
        ("pow", &[x, y]) => x.powf(y),
        ("atan2", &[y, x]) => y.atan2(x),
        _ => return None,
    };
    Some(value)
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        for func in &self.functions {
            writeln!(f)?;
            self.write_function(f, func)?;
        }
        Ok(())
    }
}

impl Backend for Module {
    type Function = FunctionId;
    type Value = Value;

    fn declare_function(
        &mut self,
        name: &str,
        params: &[String],
    ) -> Result<FunctionId, BackendError> {
        if let Some(id) = self.lookup_function(name, params.len()) {
            let func = &mut self.functions[id.0];
            if !func.is_defined() {
                func.params = params.to_vec();
            }
            return Ok(id);
        }

        self.functions.push(Function {
            name: name.to_string(),
            params: params.to_vec(),
            body: None,
        });
        Ok(FunctionId(self.functions.len() - 1))
    }

    fn lookup_function(&self, name: &str, arity: usize) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|func| func.name == name && func.params.len() == arity)
            .map(FunctionId)
    }

    fn function_is_defined(&self, function: FunctionId) -> bool {
        self.function(function).is_defined()
    }

    fn begin_function_body(&mut self, function: FunctionId) -> Result<(), BackendError> {
        let func = &mut self.functions[function.0];
        let (names, _) = NameTable::with_params(&func.params);
        func.body = Some(Body {
            instructions: Vec::new(),
            names,
        });
        self.cursor = Some(function);
        Ok(())
    }

    fn bind_parameter(&self, function: FunctionId, index: usize) -> Result<Value, BackendError> {
        let func = self.function(function);
        if index >= func.params.len() {
            return Err(BackendError::InvalidParameter {
                function: func.name.clone(),
                index,
            });
        }
        Ok(Value {
            operand: Operand::Param(index),
            ty: Type::Double,
        })
    }

    fn emit_constant(&mut self, value: f64) -> Value {
        Value {
            operand: Operand::Const(value),
            ty: Type::Double,
        }
    }

    fn emit_add(&mut self, lhs: Value, rhs: Value) -> Result<Value, BackendError> {
        self.binary("addtmp", lhs, rhs, Instruction::FAdd, Type::Double)
    }

    fn emit_sub(&mut self, lhs: Value, rhs: Value) -> Result<Value, BackendError> {
        self.binary("subtmp", lhs, rhs, Instruction::FSub, Type::Double)
    }

    fn emit_mul(&mut self, lhs: Value, rhs: Value) -> Result<Value, BackendError> {
        self.binary("multmp", lhs, rhs, Instruction::FMul, Type::Double)
    }

    fn emit_less_than(&mut self, lhs: Value, rhs: Value) -> Result<Value, BackendError> {
        self.binary("cmptmp", lhs, rhs, Instruction::FCmpUlt, Type::Bool)
    }

    fn convert_bool_to_number(&mut self, value: Value) -> Result<Value, BackendError> {
        expect_type(value, Type::Bool)?;
        self.push("booltmp", Instruction::UiToFp(value), Type::Double)
    }

    fn emit_call(&mut self, function: FunctionId, args: &[Value]) -> Result<Value, BackendError> {
        let callee = self.function(function);
        if callee.params.len() != args.len() {
            return Err(BackendError::ArityMismatch {
                name: callee.name.clone(),
                expected: callee.params.len(),
                found: args.len(),
            });
        }
        for &arg in args {
            expect_type(arg, Type::Double)?;
        }
        self.push("calltmp", Instruction::Call(function, args.to_vec()), Type::Double)
    }

    fn emit_return(&mut self, value: Value) -> Result<(), BackendError> {
        expect_type(value, Type::Double)?;
        self.current_body()?
            .instructions
            .push((String::new(), Instruction::Ret(value)));
        Ok(())
    }

    fn finish_function(&mut self, _function: FunctionId) -> Result<(), BackendError> {
        self.cursor = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{codegen::Codegen, parser::Parser};

    fn module(source: &str) -> Module {
        let ast = Parser::parse_str(source).unwrap();
        let mut codegen = Codegen::new(Module::new("test"));
        for node in &ast {
            // a failed definition stays behind in the module, like any backend
            let _ = codegen.compile_node(node);
        }
        codegen.into_backend()
    }

    #[test]
    fn evaluate_arithmetic() {
        let module = module("def f(x y): x * y - 3 + 1; def g(): f(2, 5) * 2");
        assert_eq!(module.evaluate("f", &[4.0, 0.5]), Ok(0.0));
        assert_eq!(module.evaluate("g", &[]), Ok(16.0));
    }

    #[test]
    fn less_than_is_unordered() {
        let module = module("def lt(a b): a < b");
        assert_eq!(module.evaluate("lt", &[1.0, 2.0]), Ok(1.0));
        assert_eq!(module.evaluate("lt", &[2.0, 1.0]), Ok(0.0));
        assert_eq!(module.evaluate("lt", &[2.0, 2.0]), Ok(0.0));
        assert_eq!(module.evaluate("lt", &[f64::NAN, 1.0]), Ok(1.0));
    }

    #[test]
    fn externs_resolve_to_host_functions() {
        let module = module("extern sqrt(x) extern atan2(y x) extern mystery(x) sqrt(16)");
        assert_eq!(module.evaluate("_anon0", &[]), Ok(4.0));
        assert_eq!(module.evaluate("atan2", &[0.0, 1.0]), Ok(0.0));
        assert_eq!(
            module.evaluate("mystery", &[1.0]),
            Err(EvalError::UnresolvedExtern("mystery".to_string()))
        );
        assert_eq!(
            module.evaluate("sqrt", &[]),
            Err(EvalError::UnknownFunction {
                name: "sqrt".to_string(),
                arity: 0
            })
        );
    }

    #[test]
    fn unbounded_recursion_is_cut_off() {
        let module = module("extern loop(x) def loop(x): loop(x + 1)");
        assert_eq!(
            module.evaluate("loop", &[0.0]),
            Err(EvalError::RecursionLimit(MAX_CALL_DEPTH))
        );
    }

    #[test]
    fn failed_lowering_leaves_partial_body() {
        let module = module("def f(x): x + y");
        let f = module.lookup_function("f", 1).unwrap();
        assert!(module.function_is_defined(f));
        assert_eq!(
            module.evaluate("f", &[1.0]),
            Err(EvalError::MissingReturn("f".to_string()))
        );
    }

    #[test]
    fn redeclaring_returns_the_same_function() {
        let mut module = Module::new("test");
        let params = vec!["a".to_string()];
        let first = module.declare_function("f", &params).unwrap();
        let second = module.declare_function("f", &["b".to_string()]).unwrap();
        assert_eq!(first, second);
        assert_eq!(module.function(first).params(), ["b".to_string()]);

        let other = module.declare_function("f", &[]).unwrap();
        assert_ne!(first, other);
        assert_eq!(module.lookup_function("f", 0), Some(other));
        assert_eq!(module.functions().count(), 2);
    }

    #[test]
    fn temporaries_avoid_parameter_names() {
        let expected = "\
; ModuleID = 'test'

define double @f(double %addtmp) {
entry:
  %addtmp1 = fadd double %addtmp, 1.000000e+00
  ret double %addtmp1
}
";
        assert_eq!(module("def f(addtmp): addtmp + 1").to_string(), expected);
    }

    #[test]
    fn repeated_parameters_get_distinct_names() {
        let expected = "\
; ModuleID = 'test'

define double @pick(double %x, double %x1) {
entry:
  ret double %x1
}
";
        assert_eq!(module("def pick(x x): x").to_string(), expected);

        let ir = module("def g(x1 x x): x1 * x").to_string();
        assert!(ir.contains("define double @g(double %x1, double %x, double %x2)"));
        assert!(ir.contains("%multmp = fmul double %x1, %x2"));
    }

    #[test]
    fn constants_use_llvm_float_syntax() {
        assert_eq!(format_double(1.0), "1.000000e+00");
        assert_eq!(format_double(0.0), "0.000000e+00");
        assert_eq!(format_double(-0.25), "-2.500000e-01");
        assert_eq!(format_double(1e16), "1.000000e+16");
        assert_eq!(format_double(1.5e-7), "1.500000e-07");
        assert_eq!(format_double(0.1), "0x3FB999999999999A");
        assert_eq!(format_double(f64::INFINITY), "0x7FF0000000000000");
    }

    #[test]
    fn emission_needs_an_open_body() {
        let mut module = Module::new("test");
        let one = module.emit_constant(1.0);
        assert_eq!(module.emit_add(one, one), Err(BackendError::NoInsertionPoint));
    }

    #[test]
    fn values_are_type_checked() {
        let mut module = Module::new("test");
        let f = module.declare_function("f", &["x".to_string()]).unwrap();
        module.begin_function_body(f).unwrap();
        let x = module.bind_parameter(f, 0).unwrap();
        assert_eq!(
            module.convert_bool_to_number(x),
            Err(BackendError::TypeMismatch {
                expected: "i1",
                found: "double"
            })
        );
        let cmp = module.emit_less_than(x, x).unwrap();
        assert_eq!(cmp.ty(), Type::Bool);
        assert!(module.emit_return(cmp).is_err());
        assert_eq!(
            module.emit_call(f, &[]),
            Err(BackendError::ArityMismatch {
                name: "f".to_string(),
                expected: 1,
                found: 0
            })
        );
        assert_eq!(
            module.bind_parameter(f, 1),
            Err(BackendError::InvalidParameter {
                function: "f".to_string(),
                index: 1
            })
        );
    }
}
