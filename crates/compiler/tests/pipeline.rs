//! End-to-end pipeline tests: source text in, IR listing and flow graph
//! out.

use std::collections::HashMap;

use pascc::ir::Op;
use pascc::symtab::SymCat;
use pascc::{compile_file, compile_source, compile_to_text, CompilerConfig, ErrorKind};

fn quiet() -> CompilerConfig {
    CompilerConfig::new().with_quiet(true)
}

fn instruction_lines(text: &str) -> Vec<String> {
    text.lines()
        .take_while(|l| !l.starts_with("fn_label"))
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

#[test]
fn s1_constant_and_variable_assignment() {
    let text = compile_to_text(
        "const one = 1;\nvar x: integer;\nbegin\n  x := one + 2\nend.",
    )
    .unwrap();
    assert_eq!(
        instruction_lines(&text),
        vec![
            "FN_START _start 0000 0002 0001 FUN001",
            "ADD TMP005 CNS002 2",
            "STORE_VAR VBL003 TMP005",
            "FN_END _start",
        ]
    );
    assert!(text.contains("fn_locale _start VBL003 VARIABLE INT x"));
}

#[test]
fn s2_for_to_loop_shape() {
    let text = compile_to_text(
        "var i,s: integer;\nbegin s := 0; for i := 1 to 3 do s := s + i end.",
    )
    .unwrap();
    let lines = instruction_lines(&text);
    let ops: Vec<&str> = lines
        .iter()
        .map(|l| l.split(' ').next().unwrap())
        .collect();
    assert_eq!(
        ops,
        vec![
            "FN_START",
            "STORE_VAR",  // s := 0
            "STORE_VAR",  // i := 1
            "LABEL",      // @forstart
            "BRANCH_GTT", // i > 3 -> @fordone
            "ADD",
            "STORE_VAR",
            "INC",
            "JUMP",
            "LABEL", // @fordone
            "DEC",
            "FN_END",
        ]
    );
    // the branch tests the induction variable against the bound, inlined
    let branch = &lines[4];
    assert!(branch.ends_with("3"), "bound literal inlined: {}", branch);
    // INC and DEC hit the same induction variable
    let inc_arg = lines[7].split(' ').nth(1).unwrap();
    let dec_arg = lines[10].split(' ').nth(1).unwrap();
    assert_eq!(inc_arg, dec_arg);
}

#[test]
fn s3_overloading_by_literal_sign() {
    let out = compile_source(
        "function f(x: integer): integer; begin f := x end;\n\
         function f(x: uinteger): uinteger; begin f := x end;\n\
         var a: integer; begin a := f(1) end.",
        &quiet(),
    )
    .unwrap();
    let text = out.asm.render();
    assert!(text.contains("FN_START f_I"));
    assert!(text.contains("FN_START f_U"));
    // the literal argument resolves to the unsigned overload first
    assert!(text.contains("CALL f_U"));
    assert!(!text.contains("CALL f_I"));
}

#[test]
fn s4_bad_reference_argument_is_fatal() {
    let err = compile_source(
        "var x: integer;\n\
         procedure p(var v: integer);\nbegin end;\n\
         begin p(x+1) end.",
        &quiet(),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadReference);
    assert_eq!(err.kind.exit_code(), 115);
    assert!(err.message.contains("arg1"));
}

#[test]
fn s5_dead_store_elimination() {
    let out = compile_source(
        "var x: integer;\nbegin x := 1; x := 2; write(x) end.",
        &quiet(),
    )
    .unwrap();
    let stores: Vec<i64> = out
        .flow
        .funs
        .iter()
        .flat_map(|f| f.blocks.iter())
        .flat_map(|b| b.live_insts.iter())
        .filter(|i| i.op == Op::StoreVar)
        .filter(|i| out.symtab.sym(i.d.unwrap()).name == "x")
        .map(|i| out.symtab.sym(i.r.unwrap()).value)
        .collect();
    assert_eq!(stores, vec![2], "first store dropped, second survives");
}

#[test]
fn s6_dag_common_subexpression() {
    let out = compile_source(
        "function g(a, b: integer): integer;\n\
         begin g := (a + b) + (a + b) end;\n\
         begin end.",
        &quiet(),
    )
    .unwrap();
    let g = &out.flow.funs[0];
    let stream = g.blocks[0].dag_insts.as_ref().expect("block is eligible");
    let adds: Vec<_> = stream.iter().filter(|i| i.op == Op::Add).collect();
    assert_eq!(adds.len(), 2, "a+b evaluated exactly once");
    let t = adds[0].d.unwrap();
    assert_eq!(out.symtab.sym(t).cate, SymCat::Temp);
    // ADD out T T
    assert_eq!(adds[1].r, Some(t));
    assert_eq!(adds[1].s, Some(t));
    assert_eq!(out.symtab.sym(adds[1].d.unwrap()).cate, SymCat::Func);
}

/// Execute a straight-line instruction stream over a scalar environment.
fn eval_straight_line(
    out: &pascc::CompileOutput,
    stream: &[pascc::ir::Inst],
) -> std::collections::HashMap<pascc::symtab::SymId, i64> {
    use std::collections::HashMap;

    let mut env: HashMap<pascc::symtab::SymId, i64> = HashMap::new();
    let val = |env: &HashMap<pascc::symtab::SymId, i64>, sym: pascc::symtab::SymId| -> i64 {
        let e = out.symtab.sym(sym);
        match e.cate {
            SymCat::Number | SymCat::Const => e.value,
            _ => env.get(&sym).copied().unwrap_or(0),
        }
    };

    for inst in stream {
        let r = inst.r.map(|s| val(&env, s));
        let s = inst.s.map(|s| val(&env, s));
        match inst.op {
            Op::Add => {
                env.insert(inst.d.unwrap(), r.unwrap() + s.unwrap());
            }
            Op::Sub => {
                env.insert(inst.d.unwrap(), r.unwrap() - s.unwrap());
            }
            Op::Mul => {
                env.insert(inst.d.unwrap(), r.unwrap() * s.unwrap());
            }
            Op::Div => {
                env.insert(inst.d.unwrap(), r.unwrap() / s.unwrap());
            }
            Op::Neg => {
                env.insert(inst.d.unwrap(), -r.unwrap());
            }
            Op::Inc => {
                let d = inst.d.unwrap();
                let v = val(&env, d);
                env.insert(d, v + 1);
            }
            Op::Dec => {
                let d = inst.d.unwrap();
                let v = val(&env, d);
                env.insert(d, v - 1);
            }
            Op::StoreVar => {
                env.insert(inst.d.unwrap(), r.unwrap());
            }
            Op::FnStart | Op::FnEnd | Op::Label => {}
            other => panic!("{:?} in a straight-line stream", other),
        }
    }
    env
}

#[test]
fn p9_dag_regeneration_preserves_behavior() {
    let out = compile_source(
        "var a, b, c, d: integer;\n\
         begin\n\
           a := 1;\n\
           b := a + 2;\n\
           c := a + 2 + (a + 2);\n\
           a := c - b;\n\
           d := c / b\n\
         end.",
        &quiet(),
    )
    .unwrap();
    let block = &out.flow.funs[0].blocks[0];
    let regen = block.dag_insts.as_ref().expect("block is eligible");

    let before = eval_straight_line(&out, &block.insts);
    let after = eval_straight_line(&out, regen);

    // every user variable ends with the same value in both streams
    for fun in &out.flow.funs {
        for var in &fun.vars {
            if out.symtab.sym(*var).cate != SymCat::Var {
                continue;
            }
            assert_eq!(
                before.get(var).copied().unwrap_or(0),
                after.get(var).copied().unwrap_or(0),
                "variable {} diverged",
                out.symtab.sym(*var).name
            );
        }
    }
    // and the regenerated stream computes the shared a+2 only once
    let adds = regen.iter().filter(|i| i.op == Op::Add).count();
    assert!(adds < block.insts.iter().filter(|i| i.op == Op::Add).count());
}

#[test]
fn p1_compilation_is_byte_identical_across_runs() {
    let src = "const base = 10;\n\
               var i, acc: integer;\n\
               arr: array [4] of integer;\n\
               function twice(n: integer): integer;\n\
               begin twice := n + n end;\n\
               begin\n\
                 acc := 0;\n\
                 for i := 1 to 4 do\n\
                 begin\n\
                   arr[i - 1] := twice(i);\n\
                   acc := acc + arr[i - 1]\n\
                 end;\n\
                 if acc > base then write(\"big: \", acc) else write(acc)\n\
               end.";
    let a = compile_source(src, &quiet()).unwrap();
    let b = compile_source(src, &quiet()).unwrap();
    assert_eq!(a.asm.render(), b.asm.render());
    assert_eq!(a.asm.to_json().unwrap(), b.asm.to_json().unwrap());
    assert_eq!(a.asm, b.asm);
}

#[test]
fn p2_every_branch_target_is_a_unique_label() {
    let text = compile_to_text(
        "var i, s: integer;\n\
         begin\n\
           s := 0;\n\
           for i := 1 to 5 do\n\
             if s < 10 then s := s + i else s := s - 1;\n\
           repeat s := s - 1 until s <= 0\n\
         end.",
    )
    .unwrap();

    let mut labels: HashMap<String, usize> = HashMap::new();
    let mut targets: Vec<String> = Vec::new();
    for line in instruction_lines(&text) {
        let mut fields = line.split(' ');
        let op = fields.next().unwrap();
        if op == "LABEL" {
            *labels.entry(fields.next().unwrap().to_string()).or_insert(0) += 1;
        } else if op == "JUMP" || op.starts_with("BRANCH_") {
            targets.push(fields.next().unwrap().to_string());
        }
    }

    assert!(!labels.is_empty());
    for (label, count) in &labels {
        assert_eq!(*count, 1, "label {} marked more than once", label);
        assert!(
            targets.contains(label),
            "label {} never targeted",
            label
        );
    }
    for target in &targets {
        assert!(labels.contains_key(target), "target {} has no label", target);
    }
}

#[test]
fn p3_scope_stack_is_balanced() {
    let out = compile_source(
        "procedure outer();\n\
         procedure inner();\nbegin end;\n\
         begin inner() end;\n\
         begin outer() end.",
        &quiet(),
    )
    .unwrap();
    assert_eq!(out.symtab.stack_balance(), 0);
}

#[test]
fn p6_push_and_pop_counts_match_arity() {
    let out = compile_source(
        "procedure p(a, b: integer; var c: integer);\nbegin c := a + b end;\n\
         var x: integer;\nbegin p(1, 2, x) end.",
        &quiet(),
    )
    .unwrap();
    let insts = out.ir.insts();
    let call_pos = insts
        .iter()
        .position(|i| i.op == Op::Call && out.symtab.sym(i.r.unwrap()).name == "p_I_I_I")
        .unwrap();
    let pushes = insts[..call_pos]
        .iter()
        .filter(|i| matches!(i.op, Op::PushVal | Op::PushAddr))
        .count();
    let pops = insts[call_pos..]
        .iter()
        .filter(|i| i.op == Op::Pop)
        .count();
    assert_eq!(pushes, 3);
    assert_eq!(pops, 3);
}

#[test]
fn p10_block_leaders_follow_the_flow_rules() {
    let out = compile_source(
        "var i, s: integer;\n\
         function f(n: integer): integer;\nbegin f := n * 2 end;\n\
         begin\n\
           s := 0;\n\
           for i := 1 to 3 do s := s + f(i);\n\
           write(s)\n\
         end.",
        &quiet(),
    )
    .unwrap();
    for fun in &out.flow.funs {
        for (i, block) in fun.blocks.iter().enumerate() {
            let first = block.insts.first().unwrap();
            if i == 0 {
                assert_eq!(first.op, Op::FnStart);
            } else {
                let prev = fun.blocks[i - 1].insts.last().unwrap();
                let after_break = prev.op.is_branch()
                    || matches!(prev.op, Op::Jump | Op::Call | Op::FnEnd);
                assert!(first.op == Op::Label || after_break);
            }
            let labels = block.insts.iter().filter(|x| x.op == Op::Label).count();
            assert!(labels <= 1, "second LABEL inside a block");
        }
    }
}

#[test]
fn write_string_then_expression_lowering() {
    let text = compile_to_text(
        "var n: uinteger;\nbegin n := 4; write(\"n is \", n) end.",
    )
    .unwrap();
    let lines = instruction_lines(&text);
    let ws = lines
        .iter()
        .position(|l| l.starts_with("WRITE_STRING"))
        .unwrap();
    assert!(lines[ws + 1].starts_with("WRITE_UINT"));
    assert!(text.contains("fn_string _start"));
    assert!(text.contains("\"n is \""));
}

#[test]
fn repeat_until_lowering() {
    let text = compile_to_text(
        "var n: integer;\nbegin n := 3; repeat n := n - 1 until n = 0 end.",
    )
    .unwrap();
    let lines = instruction_lines(&text);
    let ops: Vec<&str> = lines
        .iter()
        .map(|l| l.split(' ').next().unwrap())
        .collect();
    assert_eq!(
        ops,
        vec![
            "FN_START",
            "STORE_VAR",  // n := 3
            "LABEL",      // @loopstart
            "SUB",
            "STORE_VAR",
            "BRANCH_EQU", // exit when satisfied
            "JUMP",       // back to @loopstart
            "LABEL",      // @loopdone
            "FN_END",
        ]
    );
    // the jump returns to the loop-start label
    let start_label = lines[2].split(' ').nth(1).unwrap();
    let jump_target = lines[6].split(' ').nth(1).unwrap();
    assert_eq!(start_label, jump_target);
}

#[test]
fn for_downto_is_symmetric() {
    let text = compile_to_text(
        "var i: integer;\nbegin for i := 9 downto 5 do write(i) end.",
    )
    .unwrap();
    let lines = instruction_lines(&text);
    assert!(lines.iter().any(|l| l.starts_with("BRANCH_LST")));
    let dec = lines.iter().position(|l| l.starts_with("DEC")).unwrap();
    let inc = lines.iter().position(|l| l.starts_with("INC")).unwrap();
    assert!(dec < inc, "body decrements, exit path increments");
}

#[test]
fn char_constants_and_writes() {
    let out = compile_source(
        "const mark = 'x';\nvar c: char;\nbegin c := mark; write(c) end.",
        &quiet(),
    )
    .unwrap();
    let text = out.asm.render();
    assert!(text.contains("WRITE_CHAR"));
    let mark = out
        .symtab
        .sym(pascc::symtab::SymId(2))
        .clone();
    assert_eq!(mark.name, "mark");
    assert_eq!(mark.value, i64::from(b'x'));
    assert_eq!(mark.cate, SymCat::Const);
}

#[test]
fn nested_scope_offsets_are_independent() {
    let out = compile_source(
        "var a, b: integer;\n\
         function f(p, q: integer): integer;\n\
         var local: integer;\n\
         begin local := p + q; f := local end;\n\
         begin a := 0; b := f(a, a) end.",
        &quiet(),
    )
    .unwrap();
    let text = out.asm.render();
    let f_line = instruction_lines(&text)
        .into_iter()
        .find(|l| l.starts_with("FN_START f_I_I"))
        .unwrap();
    let fields: Vec<&str> = f_line.split(' ').collect();
    assert_eq!(fields[2], "0002"); // two value parameters
    assert_eq!(fields[3], "0002"); // return slot + one local
    assert_eq!(fields[4], "0001"); // one expression temporary
    assert!(text.contains("fn_locale f_I_I"));
    assert!(text.contains("fn_arg f_I_I"));
}

#[test]
fn array_reference_argument_pushes_index() {
    let text = compile_to_text(
        "var buf: array [8] of integer;\nvar i: integer;\n\
         procedure bump(var cell: integer);\n\
         begin cell := cell + 1 end;\n\
         begin i := 2; bump(buf[i + 1]) end.",
    )
    .unwrap();
    let lines = instruction_lines(&text);
    let push = lines
        .iter()
        .find(|l| l.starts_with("PUSH_ADDR"))
        .unwrap();
    let fields: Vec<&str> = push.split(' ').collect();
    assert_eq!(fields.len(), 3, "address push carries the index: {}", push);
    assert!(fields[1].starts_with("ARR"));
}

#[test]
fn compile_from_file_round_trip() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prog.pas");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "var x: integer;").unwrap();
    writeln!(file, "begin x := 41; x := x + 1; write(x) end.").unwrap();
    drop(file);

    let out = compile_file(&path, &quiet()).unwrap();
    let text = out.asm.render();
    assert!(text.starts_with("FN_START _start"));
    assert!(text.contains("WRITE_INT"));
}

#[test]
fn error_exit_codes_are_stable() {
    let cases = [
        ("begin y := 1 end.", ErrorKind::MissingSymbol, 111),
        (
            "var a: array [2] of integer;\nvar x: integer;\nbegin x := a + 1 end.",
            ErrorKind::BadCategory,
            112,
        ),
        (
            "const c = 1;\nprocedure p(var v: integer);\nbegin end;\nbegin p(c) end.",
            ErrorKind::NotReferable,
            106,
        ),
        (
            "procedure p(var v: integer);\nbegin end;\nbegin p(3) end.",
            ErrorKind::BadReference,
            115,
        ),
    ];
    for (src, kind, code) in cases {
        let err = compile_source(src, &quiet()).unwrap_err();
        assert_eq!(err.kind, kind, "source: {}", src);
        assert_eq!(err.kind.exit_code(), code);
    }
}
