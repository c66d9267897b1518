//! Integration tests for profile-aware lowering.
//!
//! Each test compiles a complete program through [`generate_ir`] or
//! [`compile_module`] and checks either the emitted IR or the error.

use qirc_compile::{CompileError, ConstructKind, LoweringError, TargetProfile, compile_module, generate_ir};
use qirc_ir::Terminator;

/// Helper: wrap a body in a namespace with an `@EntryPoint()` operation.
fn program(output: &str, body: &str) -> String {
    format!(
        "namespace Sample {{\n    @EntryPoint()\n    operation Main() : {output} {{\n{body}\n    }}\n}}\n"
    )
}

/// Helper: count non-overlapping occurrences of `needle`.
fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

const BELL: &str = r"
namespace Bell {
    @EntryPoint()
    operation Main() : Result[] {
        use qs = Qubit[2];
        H(qs[0]);
        CNOT(qs[0], qs[1]);
        return [M(qs[0]), M(qs[1])];
    }
}
";

const BRANCH_ON_MEASUREMENT: &str = r"
namespace Sample {
    @EntryPoint()
    operation Main() : Int {
        use q = Qubit();
        H(q);
        mutable count = 0;
        if M(q) == One {
            set count += 1;
        }
        return count;
    }
}
";

const RECURSIVE: &str = r"
namespace Sample {
    function Fact(n : Int) : Int {
        if n <= 1 {
            return 1;
        }
        return n * Fact(n - 1);
    }

    @EntryPoint()
    operation Main() : Int {
        return Fact(5);
    }
}
";

// ============================================================================
// Base profile
// ============================================================================

#[test]
fn test_base_bell_is_straight_line() {
    let ir = generate_ir("bell.qs", BELL, TargetProfile::Base).unwrap();

    assert!(ir.contains("define void @ENTRYPOINT__main() #0 {"));
    assert!(ir.contains(
        "call void @__quantum__qis__h__body(%Qubit* inttoptr (i64 0 to %Qubit*))"
    ));
    assert!(ir.contains(
        "call void @__quantum__qis__cnot__body(%Qubit* inttoptr (i64 0 to %Qubit*), %Qubit* inttoptr (i64 1 to %Qubit*))"
    ));
    assert!(ir.contains(
        "call void @__quantum__qis__mz__body(%Qubit* inttoptr (i64 1 to %Qubit*), %Result* inttoptr (i64 1 to %Result*))"
    ));
    assert!(ir.contains("call void @__quantum__rt__array_record_output(i64 2, i8* null)"));
    assert_eq!(count(&ir, "call void @__quantum__rt__result_record_output("), 2);

    assert!(ir.contains("\"qir_profiles\"=\"base_profile\""));
    assert!(ir.contains("\"required_num_qubits\"=\"2\""));
    assert!(ir.contains("\"required_num_results\"=\"2\""));
    assert!(ir.contains("!\"dynamic_qubit_management\", i1 false"));
    assert!(!ir.contains("br "));
    assert_eq!(count(&ir, "ret void"), 1);
}

#[test]
fn test_base_output_is_deterministic() {
    let first = generate_ir("bell.qs", BELL, TargetProfile::Base).unwrap();
    let second = generate_ir("bell.qs", BELL, TargetProfile::Base).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_base_rejects_measurement_comparison() {
    let err = generate_ir("branch.qs", BRANCH_ON_MEASUREMENT, TargetProfile::Base).unwrap_err();
    assert_eq!(
        err.unsupported_construct(),
        Some((ConstructKind::MeasurementComparison, TargetProfile::Base))
    );
    let message = err.to_string();
    assert!(message.contains("comparison of measurement results"), "{message}");
    assert!(message.contains("Base profile"), "{message}");
    assert!(message.contains("at 8:12"), "{message}");
}

#[test]
fn test_base_checks_callables_that_are_never_called() {
    let source = r"
namespace Sample {
    operation Unused(q : Qubit) : Unit {
        if M(q) == One {
            X(q);
        }
    }

    @EntryPoint()
    operation Main() : Result {
        use q = Qubit();
        return M(q);
    }
}
";
    let err = generate_ir("unused.qs", source, TargetProfile::Base).unwrap_err();
    assert_eq!(
        err.unsupported_construct(),
        Some((ConstructKind::MeasurementComparison, TargetProfile::Base))
    );
    assert!(err.to_string().contains("at 4:12"), "{err}");

    assert!(generate_ir("unused.qs", source, TargetProfile::Adaptive).is_ok());
}

#[test]
fn test_base_checks_branches_that_fold_to_false() {
    let source = program(
        "Result",
        r"
        use q = Qubit();
        if 1 == 2 {
            if M(q) == One {
                X(q);
            }
        }
        return M(q);",
    );
    let err = generate_ir("dead.qs", &source, TargetProfile::Base).unwrap_err();
    assert_eq!(
        err.unsupported_construct(),
        Some((ConstructKind::MeasurementComparison, TargetProfile::Base))
    );
}

#[test]
fn test_static_profiles_check_loops_that_never_run() {
    let source = program(
        "Result",
        r"
        use q = Qubit();
        for i in 1..0 {
            while M(q) == One {
                X(q);
            }
        }
        return M(q);",
    );
    let err = generate_ir("zero.qs", &source, TargetProfile::Base).unwrap_err();
    assert_eq!(
        err.unsupported_construct(),
        Some((ConstructKind::MeasurementComparison, TargetProfile::Base))
    );

    let err = generate_ir("zero.qs", &source, TargetProfile::Adaptive).unwrap_err();
    assert_eq!(
        err.unsupported_construct(),
        Some((ConstructKind::DynamicLoop, TargetProfile::Adaptive))
    );

    assert!(generate_ir("zero.qs", &source, TargetProfile::Full).is_ok());
}

#[test]
fn test_base_rejects_recursion_outside_the_entry_point() {
    let source = r"
namespace Sample {
    function Spin(n : Int) : Int {
        return Spin(n + 1);
    }

    @EntryPoint()
    operation Main() : Result {
        use q = Qubit();
        return M(q);
    }
}
";
    let err = generate_ir("spin.qs", source, TargetProfile::Base).unwrap_err();
    assert_eq!(
        err.unsupported_construct(),
        Some((ConstructKind::Recursion, TargetProfile::Base))
    );
    assert!(err.to_string().contains("at 4:16"), "{err}");

    assert!(generate_ir("spin.qs", source, TargetProfile::Full).is_ok());
}

#[test]
fn test_adaptive_tracks_values_assigned_under_a_measurement() {
    let source = program(
        "Unit",
        r"
        use q = Qubit();
        mutable again = true;
        mutable tries = 0;
        while tries < 0 {
            if M(q) == One {
                set again = false;
            }
            set tries += 1;
        }
        if tries > 5 {
            while again {
                X(q);
            }
        }",
    );
    let err = generate_ir("retry.qs", &source, TargetProfile::Adaptive).unwrap_err();
    assert_eq!(
        err.unsupported_construct(),
        Some((ConstructKind::DynamicLoop, TargetProfile::Adaptive))
    );
}

#[test]
fn test_base_unrolls_loops_and_concatenates() {
    let source = program(
        "Result[]",
        r"
        use qs = Qubit[3];
        for i in 0..2 {
            H(qs[i]);
        }
        mutable rs = [];
        for q in qs {
            set rs += [M(q)];
        }
        return rs;",
    );
    let ir = generate_ir("loops.qs", &source, TargetProfile::Base).unwrap();
    assert_eq!(count(&ir, "call void @__quantum__qis__h__body("), 3);
    assert_eq!(count(&ir, "call void @__quantum__qis__mz__body("), 3);
    assert!(ir.contains("array_record_output(i64 3, i8* null)"));
    assert!(ir.contains("\"required_num_results\"=\"3\""));
}

#[test]
fn test_base_reuses_released_qubits() {
    let source = program(
        "Unit",
        r"
        for i in 1..3 {
            use q = Qubit();
            H(q);
        }",
    );
    let ir = generate_ir("reuse.qs", &source, TargetProfile::Base).unwrap();
    assert_eq!(count(&ir, "call void @__quantum__qis__h__body(%Qubit* inttoptr (i64 0 to %Qubit*))"), 3);
    assert!(ir.contains("\"required_num_qubits\"=\"1\""));
    assert!(ir.contains("\"required_num_results\"=\"0\""));
}

#[test]
fn test_base_rejects_classical_output() {
    let source = program("Int", "        return 3;");
    let err = generate_ir("int.qs", &source, TargetProfile::Base).unwrap_err();
    assert_eq!(
        err.unsupported_construct(),
        Some((ConstructKind::ClassicalOutput, TargetProfile::Base))
    );
}

#[test]
fn test_overflow_is_an_evaluation_error() {
    let source = program(
        "Unit",
        r"
        let x = 9223372036854775807;
        let y = x + 1;",
    );
    let err = generate_ir("overflow.qs", &source, TargetProfile::Base).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Lowering(LoweringError::Evaluation { .. })
    ));
    assert!(err.to_string().contains("integer overflow"));
}

#[test]
fn test_index_out_of_range() {
    let source = program(
        "Unit",
        r"
        use qs = Qubit[2];
        H(qs[2]);",
    );
    let err = generate_ir("index.qs", &source, TargetProfile::Base).unwrap_err();
    assert!(err.to_string().contains("out of range"), "{err}");
}

// ============================================================================
// Adaptive profile
// ============================================================================

#[test]
fn test_adaptive_merges_branch_with_phi() {
    let ir = generate_ir("branch.qs", BRANCH_ON_MEASUREMENT, TargetProfile::Adaptive).unwrap();

    assert!(ir.contains("call i1 @__quantum__qis__read_result__body(%Result* inttoptr (i64 0 to %Result*))"));
    assert!(ir.contains("br i1 "));
    assert!(ir.contains("phi i64 [ 1, %then."), "{ir}");
    assert!(ir.contains("call void @__quantum__rt__int_record_output(i64 %count."));
    assert!(ir.contains("\"qir_profiles\"=\"adaptive_profile\""));
    assert!(ir.contains("!\"int_computations\", !{!\"i64\"}"));
}

#[test]
fn test_adaptive_rejects_measurement_dependent_loop() {
    let source = program(
        "Unit",
        r"
        use q = Qubit();
        mutable n = 0;
        if M(q) == One {
            set n = 3;
        }
        for i in 1..n {
            X(q);
        }",
    );
    let err = generate_ir("loop.qs", &source, TargetProfile::Adaptive).unwrap_err();
    assert_eq!(
        err.unsupported_construct(),
        Some((ConstructKind::DynamicLoop, TargetProfile::Adaptive))
    );
}

#[test]
fn test_adaptive_short_circuit_on_measurement() {
    let source = program(
        "Bool",
        r"
        use a = Qubit();
        use b = Qubit();
        return M(a) == One and M(b) == One;",
    );
    let ir = generate_ir("and.qs", &source, TargetProfile::Adaptive).unwrap();
    assert!(ir.contains("phi i1 [ false, %entry ]"), "{ir}");
    assert!(ir.contains("bool_record_output(i1 %and."));
}

// ============================================================================
// Full profile
// ============================================================================

#[test]
fn test_full_minimal_round_trip() {
    let source = program(
        "Result",
        r"
        use q = Qubit();
        H(q);
        return M(q);",
    );
    let module = compile_module("min.qs", &source, TargetProfile::Full).unwrap();
    let body = module.function("Sample__Main").unwrap();

    assert_eq!(body.blocks.len(), 1);
    let calls: Vec<&str> = body.calls().collect();
    assert_eq!(calls.iter().filter(|c| **c == "__quantum__rt__qubit_allocate").count(), 1);
    assert_eq!(calls.iter().filter(|c| **c == "__quantum__qis__h__body").count(), 1);
    assert_eq!(calls.iter().filter(|c| **c == "__quantum__qis__m__body").count(), 1);
    assert_eq!(calls.iter().filter(|c| **c == "__quantum__rt__qubit_release").count(), 1);

    let position = |name: &str| calls.iter().position(|c| *c == name).unwrap();
    assert!(position("__quantum__rt__qubit_allocate") < position("__quantum__qis__h__body"));
    assert!(position("__quantum__qis__h__body") < position("__quantum__qis__m__body"));
    assert!(position("__quantum__qis__m__body") < position("__quantum__rt__qubit_release"));

    let returns = body
        .blocks
        .iter()
        .filter(|b| matches!(b.terminator, Some(Terminator::Ret(Some(_)))))
        .count();
    assert_eq!(returns, 1);
    assert!(body.blocks.iter().all(|b| b.terminator.is_some()));

    let ir = module.to_string();
    assert!(ir.contains("define internal %Result* @Sample__Main() {"));
    assert!(ir.contains("call %Result* @Sample__Main()"));
    assert!(ir.contains("\"qir_profiles\"=\"full\""));
    assert!(!ir.contains("required_num_qubits"));
    assert!(ir.contains("!\"dynamic_qubit_management\", i1 true"));
}

#[test]
fn test_full_accepts_recursion_base_rejects() {
    let err = generate_ir("fact.qs", RECURSIVE, TargetProfile::Base).unwrap_err();
    assert_eq!(
        err.unsupported_construct(),
        Some((ConstructKind::Recursion, TargetProfile::Base))
    );

    let ir = generate_ir("fact.qs", RECURSIVE, TargetProfile::Full).unwrap();
    assert!(ir.contains("define internal i64 @Sample__Fact(i64 %n) {"));
    assert!(ir.contains("call i64 @Sample__Fact(i64 %"));
    assert!(ir.contains("icmp sle i64 %n, 1"));
    assert!(ir.contains("call void @__quantum__rt__int_record_output("));
}

#[test]
fn test_full_defines_callables_in_source_order() {
    let source = r"
namespace P {
    operation A(q : Qubit) : Unit {
        X(q);
    }

    operation B(q : Qubit) : Unit {
        H(q);
    }

    operation Unused() : Unit {
    }

    @EntryPoint()
    operation Main() : Result {
        use q = Qubit();
        B(q);
        A(q);
        return M(q);
    }
}
";
    let module = compile_module("order.qs", source, TargetProfile::Full).unwrap();
    let names: Vec<&str> = module.functions().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["ENTRYPOINT__main", "P__A", "P__B", "P__Main"]);

    let ir = module.to_string();
    let a = ir.find("define internal void @P__A(").unwrap();
    let b = ir.find("define internal void @P__B(").unwrap();
    assert!(a < b);
}

#[test]
fn test_full_while_loop_uses_stack_slot() {
    let source = program(
        "Int",
        r"
        mutable i = 0;
        while i < 3 {
            set i += 1;
        }
        return i;",
    );
    let module = compile_module("while.qs", &source, TargetProfile::Full).unwrap();
    let body = module.function("Sample__Main").unwrap();
    assert_eq!(body.blocks.len(), 4);

    let ir = module.to_string();
    assert!(ir.contains("= alloca i64"));
    assert!(ir.contains("while.header"));
    assert!(ir.contains("icmp slt i64"));
}

#[test]
fn test_full_dynamic_qubit_array() {
    let source = program(
        "Result[]",
        r"
        let n = 2 + 1;
        use qs = Qubit[n];
        mutable rs = [];
        for q in qs {
            set rs += [M(q)];
        }
        return rs;",
    );
    let ir = generate_ir("dyn.qs", &source, TargetProfile::Full).unwrap();
    assert!(ir.contains("call %Array* @__quantum__rt__qubit_allocate_array(i64 %"));
    assert!(ir.contains("call void @__quantum__rt__qubit_release_array(%Array* %"));
    assert!(ir.contains("@__quantum__rt__array_concatenate("));
    assert!(ir.contains("rec.header"));

    let err = generate_ir("dyn.qs", &source, TargetProfile::Adaptive);
    assert!(err.is_ok(), "n is known at compile time for Adaptive: {err:?}");
}

#[test]
fn test_nested_array_output_is_unimplemented() {
    let source = program("Int[][]", "        return [[1]];");
    let err = generate_ir("nested.qs", &source, TargetProfile::Full).unwrap_err();
    assert!(err.is_unimplemented());
}

// ============================================================================
// Resolution and entry points
// ============================================================================

#[test]
fn test_config_excluded_callable() {
    let source = r"
namespace Sample {
    @Config(Full)
    operation Prepare(q : Qubit) : Unit {
        H(q);
    }

    @EntryPoint()
    operation Main() : Unit {
        use q = Qubit();
        Prepare(q);
    }
}
";
    let err = generate_ir("config.qs", source, TargetProfile::Base).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Cannot resolve 'Prepare'"), "{message}");
    assert!(message.contains("excluded by @Config for the Base profile"), "{message}");

    assert!(generate_ir("config.qs", source, TargetProfile::Full).is_ok());
}

#[test]
fn test_unknown_callable() {
    let source = program("Unit", "        use q = Qubit();\n        Toffoli(q);");
    let err = generate_ir("unknown.qs", &source, TargetProfile::Full).unwrap_err();
    assert!(err.to_string().contains("no callable with this name is defined"));
}

#[test]
fn test_missing_entry_point() {
    let source = "namespace Sample { operation Helper() : Unit { } }";
    let err = generate_ir("none.qs", source, TargetProfile::Full).unwrap_err();
    assert_eq!(err, CompileError::Lowering(LoweringError::MissingEntryPoint));
}

#[test]
fn test_main_without_attribute_is_entry_point() {
    let source = r"
namespace Sample {
    operation Main() : Result {
        use q = Qubit();
        return M(q);
    }
}
";
    assert!(generate_ir("main.qs", source, TargetProfile::Base).is_ok());
}

#[test]
fn test_shadowing_rejected() {
    let source = program("Unit", "        let x = 1;\n        let x = 2;");
    let err = generate_ir("shadow.qs", &source, TargetProfile::Full).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Lowering(LoweringError::Duplicate { .. })
    ));
}

#[test]
fn test_syntax_error_has_location() {
    let source = program("Unit", "        H(q;");
    let err = generate_ir("syntax.qs", &source, TargetProfile::Full).unwrap_err();
    assert!(matches!(err, CompileError::Syntax(_)));
    assert!(err.to_string().contains("at 4:"), "{err}");
}
