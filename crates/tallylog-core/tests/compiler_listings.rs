//! Instruction listings produced by the code generator

use tallylog_core::bytecode::OpCode::{
    Capref, Cmp, Dload, Inc, Jm, Jmp, Jnm, Match, Mload, Pop, Push, S2f, S2i, Set, SetMatched, Str,
    Strptime,
};
use tallylog_core::testutil::{compile_program, instrs, listing};

#[test]
fn line_counter() {
    assert_eq!(
        listing("counter line_count\n/$/ { line_count++ }").unwrap(),
        instrs(&[(Match, 0), (Jnm, 4), (Mload, 0), (Inc, 0)])
    );
}

#[test]
fn single_block_jumps_past_its_end() {
    let program = "counter foo\n/foo/ {\n  foo++\n  foo++\n}\n";
    assert_eq!(
        listing(program).unwrap(),
        instrs(&[(Match, 0), (Jnm, 6), (Mload, 0), (Inc, 0), (Mload, 0), (Inc, 0)])
    );
}

#[test]
fn relational_operators() {
    let cases = [
        (">", Cmp, 1, Jnm),
        ("<", Cmp, -1, Jnm),
        ("==", Cmp, 0, Jnm),
        ("<=", Cmp, 1, Jm),
        (">=", Cmp, -1, Jm),
        ("!=", Cmp, 0, Jm),
    ];
    for (op, cmp, operand, jump) in cases {
        let source = format!("counter foo\n1 {op} 0 {{\n  foo++\n}}\n");
        assert_eq!(
            listing(&source).unwrap(),
            instrs(&[
                (Push, 1),
                (Push, 0),
                (cmp, operand),
                (jump, 6),
                (Mload, 0),
                (Inc, 0)
            ]),
            "operator {op}"
        );
    }
}

#[test]
fn nested_blocks_share_an_exit() {
    let program = "counter foo\n/foo/ {\n  /bar/ {\n    foo++\n  }\n}\n";
    assert_eq!(
        listing(program).unwrap(),
        instrs(&[(Match, 0), (Jnm, 6), (Match, 1), (Jnm, 6), (Mload, 0), (Inc, 0)])
    );
}

#[test]
fn else_branch() {
    assert_eq!(
        listing("counter a\ncounter b\n/x/ { a++ } else { b++ }").unwrap(),
        instrs(&[
            (Match, 0),
            (Jnm, 5),
            (Mload, 0),
            (Inc, 0),
            (Jmp, 7),
            (Mload, 1),
            (Inc, 0)
        ])
    );
}

#[test]
fn logical_operators_short_circuit() {
    assert_eq!(
        listing("counter a\n/x/ && /y/ { a++ }").unwrap(),
        instrs(&[(Match, 0), (Jnm, 6), (Match, 1), (Jnm, 6), (Mload, 0), (Inc, 0)])
    );
    assert_eq!(
        listing("counter a\n/x/ || /y/ { a++ }").unwrap(),
        instrs(&[(Match, 0), (Jm, 4), (Match, 1), (Jnm, 6), (Mload, 0), (Inc, 0)])
    );
    assert_eq!(
        listing("counter a\n!/x/ { a++ }").unwrap(),
        instrs(&[(Match, 0), (Jm, 4), (Mload, 0), (Inc, 0)])
    );
}

#[test]
fn boolean_literals() {
    assert_eq!(
        listing("counter a\ntrue { a++ }").unwrap(),
        instrs(&[(SetMatched, 1), (Jnm, 4), (Mload, 0), (Inc, 0)])
    );
}

#[test]
fn strptime_call() {
    assert_eq!(
        listing("/(.*)/ {\n  strptime($1, \"%Y-%m-%d\")\n}").unwrap(),
        instrs(&[
            (Match, 0),
            (Jnm, 7),
            (Push, 0),
            (Capref, 1),
            (Str, 0),
            (Strptime, 2),
            (Pop, 0)
        ])
    );
}

#[test]
fn increment_by_capture() {
    assert_eq!(
        listing("counter foo\n/(\\d+)/ { foo += $1 }").unwrap(),
        instrs(&[
            (Match, 0),
            (Jnm, 7),
            (Mload, 0),
            (Push, 0),
            (Capref, 1),
            (S2i, 0),
            (Inc, 1)
        ])
    );
}

#[test]
fn gauge_from_capture_is_float() {
    assert_eq!(
        listing("gauge latency\n/took (\\S+)s/ { latency = $1 }").unwrap(),
        instrs(&[
            (Match, 0),
            (Jnm, 7),
            (Mload, 0),
            (Push, 0),
            (Capref, 1),
            (S2f, 0),
            (Set, 0)
        ])
    );
    assert_eq!(
        listing("timer t\n/(\\S+)/ { t += $1 }").unwrap(),
        instrs(&[
            (Match, 0),
            (Jnm, 7),
            (Mload, 0),
            (Push, 0),
            (Capref, 1),
            (S2f, 0),
            (Inc, 1)
        ])
    );
}

#[test]
fn set_with_integer_and_float() {
    assert_eq!(
        listing("gauge g\n/x/ { g = 5 }").unwrap(),
        instrs(&[(Match, 0), (Jnm, 5), (Mload, 0), (Push, 5), (Set, 0)])
    );
    let program = compile_program("gauge g\n/x/ { g = 1.5 }").unwrap();
    assert_eq!(
        program.instructions(),
        instrs(&[(Match, 0), (Jnm, 6), (Mload, 0), (Str, 0), (S2f, 0), (Set, 0)])
    );
    assert_eq!(program.strings(), ["1.5"]);
}

#[test]
fn labelled_metric() {
    assert_eq!(
        listing("counter req by method\n/(?P<method>GET|POST)/ { req[$method]++ }").unwrap(),
        instrs(&[
            (Match, 0),
            (Jnm, 7),
            (Mload, 0),
            (Push, 0),
            (Capref, 1),
            (Dload, 1),
            (Inc, 0)
        ])
    );
}

#[test]
fn inner_capture_shadows_outer() {
    let program = "counter a by x\n/(o)/ {\n  /(i)/ {\n    a[$1]++\n  }\n}\n";
    assert_eq!(
        listing(program).unwrap(),
        instrs(&[
            (Match, 0),
            (Jnm, 9),
            (Match, 1),
            (Jnm, 9),
            (Mload, 0),
            (Push, 1),
            (Capref, 1),
            (Dload, 1),
            (Inc, 0)
        ])
    );
}

#[test]
fn capture_compared_to_number_is_converted() {
    assert_eq!(
        listing("counter slow\n/t=(\\d+)/ {\n  $1 > 100 {\n    slow++\n  }\n}").unwrap(),
        instrs(&[
            (Match, 0),
            (Jnm, 10),
            (Push, 0),
            (Capref, 1),
            (S2i, 0),
            (Push, 100),
            (Cmp, 1),
            (Jnm, 10),
            (Mload, 0),
            (Inc, 0)
        ])
    );
}
