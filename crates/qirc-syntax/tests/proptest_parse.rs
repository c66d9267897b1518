//! Property-based tests for the qirc parser.
//!
//! Generated gate programs must parse to the expected shape, and arbitrary
//! input must produce an error rather than a panic.

use proptest::prelude::*;
use qirc_syntax::ast::{ExprKind, StmtKind};
use qirc_syntax::parse;

/// Gate applications that can appear in a generated body.
#[derive(Debug, Clone)]
enum GateOp {
    Single(&'static str, usize),
    Rotation(&'static str, f64, usize),
    Two(&'static str, usize, usize),
}

impl GateOp {
    fn render(&self) -> String {
        match self {
            GateOp::Single(name, q) => format!("{name}(qs[{q}]);"),
            GateOp::Rotation(name, angle, q) => format!("{name}({angle:.3}, qs[{q}]);"),
            GateOp::Two(name, a, b) => format!("{name}(qs[{a}], qs[{b}]);"),
        }
    }
}

fn arb_gate_op(num_qubits: usize) -> impl Strategy<Value = GateOp> {
    let single = prop_oneof![Just("H"), Just("X"), Just("Y"), Just("Z"), Just("S"), Just("T")];
    let rotation = prop_oneof![Just("Rx"), Just("Ry"), Just("Rz")];
    let two = prop_oneof![Just("CNOT"), Just("CZ"), Just("SWAP")];
    prop_oneof![
        (single, 0..num_qubits).prop_map(|(g, q)| GateOp::Single(g, q)),
        (rotation, 0.0_f64..6.3, 0..num_qubits).prop_map(|(g, a, q)| GateOp::Rotation(g, a, q)),
        (two, 0..num_qubits, 0..num_qubits).prop_map(|(g, a, b)| GateOp::Two(g, a, b)),
    ]
}

fn arb_program() -> impl Strategy<Value = (usize, Vec<GateOp>)> {
    (1_usize..=5).prop_flat_map(|n| (Just(n), prop::collection::vec(arb_gate_op(n), 1..=12)))
}

fn render_program(num_qubits: usize, ops: &[GateOp]) -> String {
    let body: Vec<String> = ops.iter().map(GateOp::render).collect();
    format!(
        "namespace Gen {{\n  @EntryPoint()\n  operation Main() : Unit {{\n    use qs = Qubit[{num_qubits}];\n    {}\n  }}\n}}\n",
        body.join("\n    ")
    )
}

proptest! {
    #[test]
    fn generated_programs_parse(program in arb_program()) {
        let (num_qubits, ops) = program;
        let source = render_program(num_qubits, &ops);
        let parsed = parse(&source).expect("generated program should parse");

        let main = &parsed.namespaces[0].items[0];
        prop_assert!(main.is_entry_point());
        // One `use` plus one statement per gate.
        prop_assert_eq!(main.body.stmts.len(), ops.len() + 1);

        for stmt in &main.body.stmts[1..] {
            let StmtKind::Expr(expr) = &stmt.kind else {
                return Err(TestCaseError::fail("expected expression statement"));
            };
            prop_assert!(matches!(expr.kind, ExprKind::Call { .. }), "gate application should be a call");
        }
    }

    #[test]
    fn parsing_is_deterministic(program in arb_program()) {
        let (num_qubits, ops) = program;
        let source = render_program(num_qubits, &ops);
        let first = format!("{:?}", parse(&source).unwrap());
        let second = format!("{:?}", parse(&source).unwrap());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn arbitrary_input_never_panics(source in "\\PC{0,200}") {
        let _ = parse(&source);
    }

    #[test]
    fn truncated_programs_fail_cleanly(program in arb_program(), cut in 0.0_f64..1.0) {
        let (num_qubits, ops) = program;
        let source = render_program(num_qubits, &ops);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let mut end = ((source.len() as f64) * cut) as usize;
        while !source.is_char_boundary(end) {
            end -= 1;
        }
        // Every truncation before the closing brace is an error.
        let trimmed = source.trim_end();
        if end > 0 && end < trimmed.len() {
            prop_assert!(parse(&source[..end]).is_err());
        }
    }
}
