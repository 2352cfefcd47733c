//! LLVM backend, enabled with the `llvm` feature.

use std::fmt;

use inkwell::{
    builder::Builder,
    context::Context,
    module::{Linkage, Module},
    types::BasicMetadataTypeEnum,
    values::{BasicMetadataValueEnum, BasicValueEnum, FloatValue, FunctionValue},
    FloatPredicate,
};

use crate::backend::{Backend, BackendError};

pub struct LlvmBackend<'a> {
    pub context: &'a Context,
    pub module: Module<'a>,
    pub builder: Builder<'a>,
}

impl<'a> LlvmBackend<'a> {
    pub fn new(context: &'a Context, name: &str) -> Self {
        LlvmBackend {
            context,
            module: context.create_module(name),
            builder: context.create_builder(),
        }
    }

    fn float(value: BasicValueEnum<'a>) -> Result<FloatValue<'a>, BackendError> {
        match value {
            BasicValueEnum::FloatValue(value) => Ok(value),
            other => Err(BackendError::TypeMismatch {
                expected: "double",
                found: type_name(&other),
            }),
        }
    }

    fn floats(
        lhs: BasicValueEnum<'a>,
        rhs: BasicValueEnum<'a>,
    ) -> Result<(FloatValue<'a>, FloatValue<'a>), BackendError> {
        Ok((Self::float(lhs)?, Self::float(rhs)?))
    }
}

fn type_name(value: &BasicValueEnum<'_>) -> &'static str {
    match value {
        BasicValueEnum::FloatValue(_) => "double",
        BasicValueEnum::IntValue(_) => "i1",
        _ => "non-scalar",
    }
}

fn builder_error(e: impl fmt::Display) -> BackendError {
    BackendError::Builder(e.to_string())
}

impl<'a> fmt::Display for LlvmBackend<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.module.print_to_string().to_string())
    }
}

impl<'a> Backend for LlvmBackend<'a> {
    type Function = FunctionValue<'a>;
    type Value = BasicValueEnum<'a>;

    fn declare_function(
        &mut self,
        name: &str,
        params: &[String],
    ) -> Result<FunctionValue<'a>, BackendError> {
        let fn_val = match self.lookup_function(name, params.len()) {
            Some(fn_val) => fn_val,
            None => {
                let args_types = std::iter::repeat(self.context.f64_type())
                    .take(params.len())
                    .map(|f| f.into())
                    .collect::<Vec<BasicMetadataTypeEnum>>();
                let fn_type = self.context.f64_type().fn_type(&args_types, false);
                self.module
                    .add_function(name, fn_type, Some(Linkage::External))
            }
        };

        if fn_val.count_basic_blocks() == 0 {
            for (arg, name) in fn_val.get_param_iter().zip(params) {
                arg.into_float_value().set_name(name);
            }
        }

        Ok(fn_val)
    }

    fn lookup_function(&self, name: &str, arity: usize) -> Option<FunctionValue<'a>> {
        let mut next = self.module.get_first_function();
        while let Some(func) = next {
            if func.get_name().to_str() == Ok(name) && func.count_params() as usize == arity {
                return Some(func);
            }
            next = func.get_next_function();
        }
        None
    }

    fn function_is_defined(&self, function: FunctionValue<'a>) -> bool {
        function.count_basic_blocks() > 0
    }

    fn begin_function_body(&mut self, function: FunctionValue<'a>) -> Result<(), BackendError> {
        let entry = self.context.append_basic_block(function, "entry");
        self.builder.position_at_end(entry);
        Ok(())
    }

    fn bind_parameter(
        &self,
        function: FunctionValue<'a>,
        index: usize,
    ) -> Result<BasicValueEnum<'a>, BackendError> {
        function
            .get_nth_param(index as u32)
            .ok_or_else(|| BackendError::InvalidParameter {
                function: function.get_name().to_string_lossy().into_owned(),
                index,
            })
    }

    fn emit_constant(&mut self, value: f64) -> BasicValueEnum<'a> {
        self.context.f64_type().const_float(value).into()
    }

    fn emit_add(
        &mut self,
        lhs: BasicValueEnum<'a>,
        rhs: BasicValueEnum<'a>,
    ) -> Result<BasicValueEnum<'a>, BackendError> {
        let (lhs, rhs) = Self::floats(lhs, rhs)?;
        self.builder
            .build_float_add(lhs, rhs, "addtmp")
            .map(Into::into)
            .map_err(builder_error)
    }

    fn emit_sub(
        &mut self,
        lhs: BasicValueEnum<'a>,
        rhs: BasicValueEnum<'a>,
    ) -> Result<BasicValueEnum<'a>, BackendError> {
        let (lhs, rhs) = Self::floats(lhs, rhs)?;
        self.builder
            .build_float_sub(lhs, rhs, "subtmp")
            .map(Into::into)
            .map_err(builder_error)
    }

    fn emit_mul(
        &mut self,
        lhs: BasicValueEnum<'a>,
        rhs: BasicValueEnum<'a>,
    ) -> Result<BasicValueEnum<'a>, BackendError> {
        let (lhs, rhs) = Self::floats(lhs, rhs)?;
        self.builder
            .build_float_mul(lhs, rhs, "multmp")
            .map(Into::into)
            .map_err(builder_error)
    }

    fn emit_less_than(
        &mut self,
        lhs: BasicValueEnum<'a>,
        rhs: BasicValueEnum<'a>,
    ) -> Result<BasicValueEnum<'a>, BackendError> {
        let (lhs, rhs) = Self::floats(lhs, rhs)?;
        self.builder
            .build_float_compare(FloatPredicate::ULT, lhs, rhs, "cmptmp")
            .map(Into::into)
            .map_err(builder_error)
    }

    fn convert_bool_to_number(
        &mut self,
        value: BasicValueEnum<'a>,
    ) -> Result<BasicValueEnum<'a>, BackendError> {
        let value = match value {
            BasicValueEnum::IntValue(value) => value,
            other => {
                return Err(BackendError::TypeMismatch {
                    expected: "i1",
                    found: type_name(&other),
                })
            }
        };
        self.builder
            .build_unsigned_int_to_float(value, self.context.f64_type(), "booltmp")
            .map(Into::into)
            .map_err(builder_error)
    }

    fn emit_call(
        &mut self,
        function: FunctionValue<'a>,
        args: &[BasicValueEnum<'a>],
    ) -> Result<BasicValueEnum<'a>, BackendError> {
        if function.count_params() as usize != args.len() {
            return Err(BackendError::ArityMismatch {
                name: function.get_name().to_string_lossy().into_owned(),
                expected: function.count_params() as usize,
                found: args.len(),
            });
        }

        let argsv: Vec<BasicMetadataValueEnum> = args.iter().map(|&val| val.into()).collect();

        self.builder
            .build_call(function, argsv.as_slice(), "calltmp")
            .map_err(builder_error)?
            .try_as_basic_value()
            .left()
            .ok_or_else(|| BackendError::Builder("call produced no value".to_string()))
    }

    fn emit_return(&mut self, value: BasicValueEnum<'a>) -> Result<(), BackendError> {
        self.builder
            .build_return(Some(&value))
            .map(|_| ())
            .map_err(builder_error)
    }

    fn finish_function(&mut self, function: FunctionValue<'a>) -> Result<(), BackendError> {
        if function.verify(true) {
            Ok(())
        } else {
            Err(BackendError::Verify(
                function.get_name().to_string_lossy().into_owned(),
            ))
        }
    }
}
