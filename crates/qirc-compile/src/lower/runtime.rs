//! QIR runtime and quantum instruction set functions used by lowering.

use qirc_ir::{FunctionBuilder, Module, Operand, Type};

use crate::error::{LoweringError, LoweringResult};

pub(crate) const INITIALIZE: &str = "__quantum__rt__initialize";
pub(crate) const MZ: &str = "__quantum__qis__mz__body";
pub(crate) const M: &str = "__quantum__qis__m__body";
pub(crate) const RESET: &str = "__quantum__qis__reset__body";
pub(crate) const READ_RESULT: &str = "__quantum__qis__read_result__body";
pub(crate) const QUBIT_ALLOCATE: &str = "__quantum__rt__qubit_allocate";
pub(crate) const QUBIT_ALLOCATE_ARRAY: &str = "__quantum__rt__qubit_allocate_array";
pub(crate) const QUBIT_RELEASE: &str = "__quantum__rt__qubit_release";
pub(crate) const QUBIT_RELEASE_ARRAY: &str = "__quantum__rt__qubit_release_array";
pub(crate) const RESULT_EQUAL: &str = "__quantum__rt__result_equal";
pub(crate) const RESULT_GET_ONE: &str = "__quantum__rt__result_get_one";
pub(crate) const RESULT_GET_ZERO: &str = "__quantum__rt__result_get_zero";
pub(crate) const ARRAY_CREATE_1D: &str = "__quantum__rt__array_create_1d";
pub(crate) const ARRAY_GET_ELEMENT_PTR_1D: &str = "__quantum__rt__array_get_element_ptr_1d";
pub(crate) const ARRAY_GET_SIZE_1D: &str = "__quantum__rt__array_get_size_1d";
pub(crate) const ARRAY_CONCATENATE: &str = "__quantum__rt__array_concatenate";
pub(crate) const ARRAY_RECORD_OUTPUT: &str = "__quantum__rt__array_record_output";
pub(crate) const RESULT_RECORD_OUTPUT: &str = "__quantum__rt__result_record_output";
pub(crate) const INT_RECORD_OUTPUT: &str = "__quantum__rt__int_record_output";
pub(crate) const BOOL_RECORD_OUTPUT: &str = "__quantum__rt__bool_record_output";
pub(crate) const DOUBLE_RECORD_OUTPUT: &str = "__quantum__rt__double_record_output";

/// Attribute group attached to irreversible instructions.
pub(crate) const IRREVERSIBLE_GROUP: u32 = 1;

/// Dynamic-allocation entry points a static profile must not reference.
pub(crate) const DYNAMIC_ALLOCATION: [&str; 2] = [QUBIT_ALLOCATE, QUBIT_ALLOCATE_ARRAY];

/// Symbol of a gate's body function, e.g. `__quantum__qis__cnot__body`.
pub(crate) fn gate_symbol(qis: &str) -> String {
    format!("__quantum__qis__{qis}__body")
}

/// Signature `(ret, params, attribute group)` of a known function.
fn signature(name: &str) -> Option<(Type, Vec<Type>, Option<u32>)> {
    let i8_ptr = || Type::ptr(Type::I8);
    let sig = match name {
        INITIALIZE => (Type::Void, vec![i8_ptr()], None),
        MZ => (Type::Void, vec![Type::Qubit, Type::Result], Some(IRREVERSIBLE_GROUP)),
        M => (Type::Result, vec![Type::Qubit], Some(IRREVERSIBLE_GROUP)),
        RESET => (Type::Void, vec![Type::Qubit], None),
        READ_RESULT => (Type::I1, vec![Type::Result], None),
        QUBIT_ALLOCATE => (Type::Qubit, vec![], None),
        QUBIT_ALLOCATE_ARRAY => (Type::Array, vec![Type::I64], None),
        QUBIT_RELEASE => (Type::Void, vec![Type::Qubit], None),
        QUBIT_RELEASE_ARRAY => (Type::Void, vec![Type::Array], None),
        RESULT_EQUAL => (Type::I1, vec![Type::Result, Type::Result], None),
        RESULT_GET_ONE | RESULT_GET_ZERO => (Type::Result, vec![], None),
        ARRAY_CREATE_1D => (Type::Array, vec![Type::I32, Type::I64], None),
        ARRAY_GET_ELEMENT_PTR_1D => (i8_ptr(), vec![Type::Array, Type::I64], None),
        ARRAY_GET_SIZE_1D => (Type::I64, vec![Type::Array], None),
        ARRAY_CONCATENATE => (Type::Array, vec![Type::Array, Type::Array], None),
        ARRAY_RECORD_OUTPUT | INT_RECORD_OUTPUT => (Type::Void, vec![Type::I64, i8_ptr()], None),
        RESULT_RECORD_OUTPUT => (Type::Void, vec![Type::Result, i8_ptr()], None),
        BOOL_RECORD_OUTPUT => (Type::Void, vec![Type::I1, i8_ptr()], None),
        DOUBLE_RECORD_OUTPUT => (Type::Void, vec![Type::Double, i8_ptr()], None),
        _ => {
            let qis = name.strip_prefix("__quantum__qis__")?.strip_suffix("__body")?;
            match qis {
                "h" | "x" | "y" | "z" | "s" | "t" => (Type::Void, vec![Type::Qubit], None),
                "rx" | "ry" | "rz" => (Type::Void, vec![Type::Double, Type::Qubit], None),
                "cnot" | "cz" | "swap" => (Type::Void, vec![Type::Qubit, Type::Qubit], None),
                _ => return None,
            }
        }
    };
    Some(sig)
}

/// Declare `callee` in `module` and emit a call to it.
pub(crate) fn call(
    module: &mut Module,
    builder: &mut FunctionBuilder,
    callee: &str,
    args: Vec<Operand>,
) -> LoweringResult<Option<Operand>> {
    let (ret, params, attrs) = signature(callee)
        .ok_or_else(|| LoweringError::InvalidIr(format!("no signature for @{callee}")))?;
    if params.len() != args.len() {
        return Err(LoweringError::InvalidIr(format!(
            "@{callee} takes {} arguments, {} given",
            params.len(),
            args.len()
        )));
    }
    module.declare(callee, ret.clone(), params, attrs)?;
    Ok(builder.call(callee, ret, args)?)
}

/// `i8* null`, the label argument of every `*_record_output` call.
pub(crate) fn no_label() -> Operand {
    Operand::Null(Type::ptr(Type::I8))
}
