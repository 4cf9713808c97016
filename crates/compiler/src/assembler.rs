//! IR assembly: the structured, printable form of the instruction stream
//! plus the per-function tables.
//!
//! The text form is line oriented and whitespace separated: one line per
//! instruction, mnemonic first, then the operand fields. An operand whose
//! value type is literal is inlined by value; every other operand prints
//! its symbol label. After the instructions come the per-function
//! directives (`fn_label`, `fn_arg`, `fn_locale`, `fn_temp`, `fn_literal`,
//! `fn_string`), one per line, in declaration order. The same data is
//! serializable for machine consumption.

use serde::Serialize;

use crate::error::CompileError;
use crate::internal;
use crate::ir::{Inst, IrList, Op};
use crate::symtab::{SymCat, SymId, SymTab, ValType};

/// One rendered instruction: mnemonic plus operand fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsmInst {
    pub op: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FnArg {
    pub label: String,
    pub category: String,
    pub typ: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FnLocale {
    pub label: String,
    pub category: String,
    pub typ: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FnTemp {
    pub label: String,
    pub typ: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FnLiteral {
    pub label: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FnString {
    pub label: String,
    pub value: String,
}

/// Per-function metadata tables, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FnTable {
    pub name: String,
    pub label: String,
    pub args: Vec<FnArg>,
    pub locales: Vec<FnLocale>,
    pub temps: Vec<FnTemp>,
    pub literals: Vec<FnLiteral>,
    pub strings: Vec<FnString>,
}

/// The assembled compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrAsm {
    pub insts: Vec<AsmInst>,
    pub funs: Vec<FnTable>,
}

impl IrAsm {
    /// Line-oriented text form consumed by downstream tooling.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for inst in &self.insts {
            out.push_str(&inst.op);
            for arg in &inst.args {
                out.push(' ');
                out.push_str(arg);
            }
            out.push('\n');
            if inst.op == "FN_END" {
                out.push('\n');
            }
        }
        for fun in &self.funs {
            out.push_str(&format!("fn_label {} {}\n", fun.name, fun.label));
            for a in &fun.args {
                out.push_str(&format!(
                    "fn_arg {} {} {} {} {}\n",
                    fun.name, a.label, a.category, a.typ, a.name
                ));
            }
            for l in &fun.locales {
                out.push_str(&format!(
                    "fn_locale {} {} {} {} {}\n",
                    fun.name, l.label, l.category, l.typ, l.name
                ));
            }
            for t in &fun.temps {
                out.push_str(&format!(
                    "fn_temp {} {} {} {}\n",
                    fun.name, t.label, t.typ, t.name
                ));
            }
            for n in &fun.literals {
                out.push_str(&format!("fn_literal {} {} {}\n", fun.name, n.label, n.value));
            }
            for s in &fun.strings {
                out.push_str(&format!(
                    "fn_string {} {} \"{}\"\n",
                    fun.name, s.label, s.value
                ));
            }
            out.push('\n');
        }
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for IrAsm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Assemble the linear instruction list into its structured form.
pub fn assemble(tab: &SymTab, ir: &IrList) -> Result<IrAsm, CompileError> {
    let mut insts = Vec::new();
    let mut funs = Vec::new();

    for inst in ir.iter() {
        insts.push(asm_inst(tab, inst)?);
        if inst.op == Op::FnStart {
            funs.push(fn_table(tab, require(inst.d)?)?);
        }
    }

    Ok(IrAsm { insts, funs })
}

fn require(sym: Option<SymId>) -> Result<SymId, CompileError> {
    sym.ok_or_else(|| internal!("instruction missing an operand"))
}

/// Operand field: literal operands inline their value, everything else
/// prints its label.
fn operand(tab: &SymTab, sym: SymId) -> String {
    let e = tab.sym(sym);
    if e.typ == ValType::Literal {
        e.value.to_string()
    } else {
        e.label.clone()
    }
}

fn label(tab: &SymTab, sym: SymId) -> String {
    tab.sym(sym).label.clone()
}

/// Render one instruction as a text line, for block dumps.
pub fn render_inst(tab: &SymTab, inst: &Inst) -> Result<String, CompileError> {
    let asm = asm_inst(tab, inst)?;
    let mut line = asm.op;
    for arg in &asm.args {
        line.push(' ');
        line.push_str(arg);
    }
    Ok(line)
}

fn asm_inst(tab: &SymTab, inst: &Inst) -> Result<AsmInst, CompileError> {
    let args = match inst.op {
        Op::Add
        | Op::Sub
        | Op::Mul
        | Op::Div
        | Op::LoadArray
        | Op::StoreArray
        | Op::BranchEqu
        | Op::BranchNeq
        | Op::BranchGtt
        | Op::BranchGeq
        | Op::BranchLst
        | Op::BranchLeq => vec![
            label(tab, require(inst.d)?),
            operand(tab, require(inst.r)?),
            operand(tab, require(inst.s)?),
        ],
        Op::StoreVar => vec![
            label(tab, require(inst.d)?),
            operand(tab, require(inst.r)?),
        ],
        Op::Neg => vec![label(tab, require(inst.d)?), label(tab, require(inst.r)?)],
        Op::Inc | Op::Dec | Op::Jump | Op::Label => vec![label(tab, require(inst.d)?)],
        Op::PushVal => vec![operand(tab, require(inst.d)?)],
        Op::PushAddr => {
            let mut args = vec![label(tab, require(inst.d)?)];
            if let Some(r) = inst.r {
                args.push(operand(tab, r));
            }
            args
        }
        Op::Pop => Vec::new(),
        Op::Call => {
            let callee = tab.sym(require(inst.r)?);
            let mut args = vec![callee.name.clone()];
            if let Some(d) = inst.d {
                args.push(label(tab, d));
            }
            args
        }
        Op::FnStart => {
            let sym = tab.sym(require(inst.d)?);
            let scope = sym
                .scope
                .ok_or_else(|| internal!("callable {} without scope", sym.name))?;
            let scope = tab.scope(scope);
            vec![
                sym.name.clone(),
                format!("{:04}", scope.argoff),
                format!("{:04}", scope.varoff),
                format!("{:04}", scope.tmpoff),
                sym.label.clone(),
            ]
        }
        Op::FnEnd => vec![tab.sym(require(inst.d)?).name.clone()],
        Op::ReadInt | Op::ReadUint | Op::ReadChar | Op::WriteString => {
            vec![label(tab, require(inst.d)?)]
        }
        Op::WriteInt | Op::WriteUint | Op::WriteChar => vec![operand(tab, require(inst.d)?)],
    };

    Ok(AsmInst {
        op: inst.op.mnemonic().to_string(),
        args,
    })
}

fn fn_table(tab: &SymTab, sym: SymId) -> Result<FnTable, CompileError> {
    let entry = tab.sym(sym);
    let scope_id = entry
        .scope
        .ok_or_else(|| internal!("callable {} without scope", entry.name))?;
    let scope = tab.scope(scope_id);

    let mut table = FnTable {
        name: entry.name.clone(),
        label: entry.label.clone(),
        args: Vec::new(),
        locales: Vec::new(),
        temps: Vec::new(),
        literals: Vec::new(),
        strings: Vec::new(),
    };

    for param in &entry.params {
        let p = tab.sym(*param);
        table.args.push(FnArg {
            label: p.label.clone(),
            category: p.cate.name().to_string(),
            typ: p.typ.name().to_string(),
            name: p.name.clone(),
        });
    }

    for id in &scope.entries {
        let e = tab.sym(*id);
        match e.cate {
            SymCat::Var | SymCat::Array => table.locales.push(FnLocale {
                label: e.label.clone(),
                category: e.cate.name().to_string(),
                typ: e.typ.name().to_string(),
                name: e.name.clone(),
            }),
            SymCat::Temp => table.temps.push(FnTemp {
                label: e.label.clone(),
                typ: e.typ.name().to_string(),
                name: e.name.clone(),
            }),
            SymCat::Number => table.literals.push(FnLiteral {
                label: e.label.clone(),
                value: e.value,
            }),
            SymCat::Str => table.strings.push(FnString {
                label: e.label.clone(),
                value: e.text.clone(),
            }),
            _ => {}
        }
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::error::Diagnostics;
    use crate::generate::generate;
    use crate::parser::Parser;
    use crate::scanner::Scanner;
    use std::io::Cursor;

    fn asm_of(src: &str) -> IrAsm {
        let mut diag = Diagnostics::new().quiet(true);
        let scanner = Scanner::new(Cursor::new(src.to_string()));
        let mut pgm = Parser::new(scanner, &mut diag).unwrap().parse().unwrap();
        let mut tab = SymTab::new();
        analyze(&mut tab, &mut diag, &mut pgm).unwrap();
        let ir = generate(&mut tab, &pgm).unwrap();
        assemble(&tab, &ir).unwrap()
    }

    #[test]
    fn test_constant_assignment_text() {
        let asm = asm_of("const one = 1;\nvar x: integer;\nbegin x := one + 2 end.");
        assert_eq!(
            asm.render(),
            "FN_START _start 0000 0002 0001 FUN001\n\
             ADD TMP005 CNS002 2\n\
             STORE_VAR VBL003 TMP005\n\
             FN_END _start\n\
             \n\
             fn_label _start FUN001\n\
             fn_locale _start VBL003 VARIABLE INT x\n\
             fn_temp _start TMP005 INT @expr/add\n\
             fn_literal _start LIT004 2\n\
             \n"
        );
    }

    #[test]
    fn test_fn_start_fields() {
        let asm = asm_of(
            "function f(a: integer; var b: char): integer;\nbegin f := a end;\n\
             begin end.",
        );
        let start = asm.insts.iter().find(|x| x.op == "FN_START").unwrap();
        assert_eq!(start.args[0], "f_I_C");
        assert_eq!(start.args[1], "0002"); // two arguments
        assert_eq!(start.args[2], "0001"); // no locals past the return slot
        assert_eq!(start.args[3], "0000");
        assert!(start.args[4].starts_with("FUN"));

        let table = &asm.funs[0];
        assert_eq!(table.args.len(), 2);
        assert_eq!(table.args[0].category, "BY_VALUE");
        assert_eq!(table.args[1].category, "BY_REFERENCE");
        assert_eq!(table.args[1].typ, "CHAR");
    }

    #[test]
    fn test_string_table_and_write() {
        let asm = asm_of("begin write(\"hello\") end.");
        let text = asm.render();
        assert!(text.contains("WRITE_STRING TMP"));
        let table = &asm.funs[0];
        assert_eq!(table.strings.len(), 1);
        assert_eq!(table.strings[0].value, "hello");
        assert!(text.contains("fn_string _start"));
        assert!(text.contains("\"hello\""));
    }

    #[test]
    fn test_call_renders_name_and_return_temp() {
        let asm = asm_of(
            "function f(x: integer): integer;\nbegin f := x end;\n\
             var a: integer;\nbegin a := f(-1) end.",
        );
        let call = asm.insts.iter().find(|x| x.op == "CALL").unwrap();
        assert_eq!(call.args[0], "f_I");
        assert!(call.args[1].starts_with("TMP"));
    }

    #[test]
    fn test_push_of_literal_inlines_value() {
        let asm = asm_of(
            "procedure p(x: integer);\nbegin end;\n\
             begin p(7) end.",
        );
        let push = asm.insts.iter().find(|x| x.op == "PUSH_VAL").unwrap();
        assert_eq!(push.args, vec!["7"]);
        let pops = asm.insts.iter().filter(|x| x.op == "POP").count();
        assert_eq!(pops, 1);
    }

    #[test]
    fn test_push_addr_includes_array_index() {
        let asm = asm_of(
            "var a: array [4] of integer;\nvar i: integer;\n\
             procedure p(var v: integer);\nbegin end;\n\
             begin p(a[i]) end.",
        );
        let push = asm.insts.iter().find(|x| x.op == "PUSH_ADDR").unwrap();
        assert_eq!(push.args.len(), 2);
        assert!(push.args[0].starts_with("ARR"));
    }

    #[test]
    fn test_label_format_of_all_operands() {
        let asm = asm_of(
            "var i, s: integer;\nbegin s := 0; for i := 1 to 3 do s := s + i end.",
        );
        for inst in &asm.insts {
            for arg in &inst.args {
                if arg.chars().next().map(|c| c.is_ascii_uppercase()) == Some(true)
                    && arg.len() == 6
                {
                    let (prefix, digits) = arg.split_at(3);
                    assert!(
                        ["CNS", "VBL", "FUN", "VAL", "ARR", "TMP", "LIT", "LBL"]
                            .contains(&prefix),
                        "unexpected label {}",
                        arg
                    );
                    assert!(digits.chars().all(|c| c.is_ascii_digit()));
                }
            }
        }
    }

    #[test]
    fn test_json_form_round_trips_structure() {
        let asm = asm_of("var x: integer;\nbegin x := 1 end.");
        let json = asm.to_json().unwrap();
        assert!(json.contains("\"STORE_VAR\""));
        assert!(json.contains("\"funs\""));
    }
}
