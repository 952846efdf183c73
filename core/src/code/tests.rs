use super::asm::assemble;
use super::*;
use crate::jit::OptLevel;

fn raw_unit(code: Vec<u8>, consts: Vec<Value>) -> std::rc::Rc<CodeUnit> {
    let mut builder = CodeBuilder::new("raw");
    builder.code = code;
    builder.consts = consts;
    builder.build()
}

#[test]
fn decodes_offsets_and_block_starts() {
    let program = assemble(
        "def pick(flag):
            LOAD_FAST flag
            POP_JUMP_IF_FALSE other
            LOAD_CONST 1
            RETURN_VALUE
         other:
            LOAD_CONST 2
            RETURN_VALUE",
    )
    .expect("assembles");
    let code = &program.get("pick").expect("unit").code;
    let decoded = code.decoded().expect("decodes");

    let offsets: Vec<usize> = decoded.instrs.iter().map(|i| i.offset).collect();
    assert_eq!(offsets, vec![0, 3, 6, 9, 10, 13]);
    assert_eq!(decoded.instrs[1].target, Some(4));
    assert_eq!(decoded.block_starts.iter().copied().collect::<Vec<_>>(), vec![0, 2, 4]);
    assert_eq!(decoded.index_of(9), Some(3));
    assert_eq!(decoded.index_of(8), None);
    assert_eq!(decoded.block_range(2), 2..4);
    assert_eq!(decoded.block_range(4), 4..6);
}

#[test]
fn extended_arg_is_folded_into_the_next_instruction() {
    let mut builder = CodeBuilder::new("wide");
    builder.consts = vec![Value::none(); 0x10001];
    builder.emit(Opcode::LoadConst, 0x10000);
    builder.emit(Opcode::ReturnValue, 0);
    let code = builder.build();
    assert_eq!(code.code.len(), 7);

    let decoded = code.decoded().expect("decodes");
    assert_eq!(decoded.len(), 2);
    let load = decoded.instrs[0];
    assert_eq!(load.opcode, Opcode::LoadConst);
    assert_eq!(load.offset, 0);
    assert_eq!(load.arg, 0x10000);
    assert_eq!(load.next_offset, 6);
    assert_eq!(decoded.instrs[1].offset, 6);
}

#[test]
fn malformed_streams_are_rejected() {
    let load = Opcode::LoadConst.byte();
    let ret = Opcode::ReturnValue.byte();
    let ext = Opcode::ExtendedArg.byte();

    assert_eq!(raw_unit(vec![], vec![]).decoded().unwrap_err(), DecodeError::Empty);
    assert_eq!(
        raw_unit(vec![0xff], vec![]).decoded().unwrap_err(),
        DecodeError::UnknownOpcode { offset: 0, byte: 0xff }
    );
    assert_eq!(
        raw_unit(vec![load, 0], vec![Value::none()]).decoded().unwrap_err(),
        DecodeError::TruncatedArgument { offset: 0 }
    );
    assert_eq!(
        raw_unit(vec![load, 5, 0, ret], vec![Value::none()]).decoded().unwrap_err(),
        DecodeError::OperandOutOfRange {
            offset: 0,
            opcode: Opcode::LoadConst,
            arg: 5,
            len: 1
        }
    );
    assert_eq!(
        raw_unit(vec![ext, 0, 0, ret], vec![]).decoded().unwrap_err(),
        DecodeError::OrphanExtendedArg { offset: 0 }
    );
    assert_eq!(
        raw_unit(vec![load, 0, 0], vec![Value::none()]).decoded().unwrap_err(),
        DecodeError::FallsOffEnd { offset: 0 }
    );

    let jump = Opcode::JumpAbsolute.byte();
    assert_eq!(
        raw_unit(vec![jump, 1, 0], vec![]).decoded().unwrap_err(),
        DecodeError::BadJumpTarget { offset: 0, target: 1 }
    );

    let compare = Opcode::CompareOp.byte();
    assert_eq!(
        raw_unit(vec![load, 0, 0, load, 0, 0, compare, 42, 0, ret], vec![Value::none()])
            .decoded()
            .unwrap_err(),
        DecodeError::BadCompareOp { offset: 6, arg: 42 }
    );
}

#[test]
fn decode_result_is_memoized() {
    let code = raw_unit(vec![0xff], vec![]);
    let first = code.decoded().unwrap_err();
    let second = code.decoded().unwrap_err();
    assert_eq!(first, second);
}

#[test]
fn disassembly_marks_blocks_and_annotates_operands() {
    let program = assemble(
        "def loop(n):
            LOAD_CONST 0
            STORE_FAST i
         top:
            LOAD_FAST i
            LOAD_FAST n
            COMPARE_OP <
            POP_JUMP_IF_FALSE done
            LOAD_FAST i
            LOAD_CONST 1
            INPLACE_ADD
            STORE_FAST i
            JUMP_ABSOLUTE top
         done:
            LOAD_CONST None
            RETURN_VALUE",
    )
    .expect("assembles");
    let text = program.get("loop").expect("unit").code.disassemble().expect("decodes");
    assert!(text.starts_with("code loop (argcount=1, locals=2)"));
    assert!(text.contains("COMPARE_OP"));
    assert!(text.contains("(<)"));
    assert!(text.contains("(None)"));
    assert!(text.contains("(to 6)"));
    assert_eq!(text.lines().filter(|l| l.starts_with(">>")).count(), 4);
}

#[test]
fn stack_effects_of_calls_and_builders() {
    assert_eq!(Opcode::CallFunction.stack_effect(2), -2);
    assert_eq!(Opcode::CallFunction.stack_effect(1 | (1 << 8)), -3);
    assert_eq!(Opcode::CallFunctionVarKw.stack_effect(0), -2);
    assert_eq!(Opcode::BuildTuple.stack_effect(3), -2);
    assert_eq!(Opcode::UnpackSequence.stack_effect(3), 2);
    assert_eq!(Opcode::MakeClosure.stack_effect(1), -2);
    assert_eq!(Opcode::BuildSlice.stack_effect(3), -2);
}

#[test]
fn opcode_names_round_trip() {
    assert_eq!(Opcode::from_name("SLICE+3"), Some(Opcode::Slice3));
    assert_eq!(Opcode::from_name("BINARY_FOO"), None);
    assert_eq!(Opcode::from_byte(Opcode::ForIter.byte()), Some(Opcode::ForIter));
    assert!(Opcode::ForIter.is_jump());
    assert!(!Opcode::PopTop.has_arg());
    assert!(Opcode::ContinueLoop.is_terminator());
    assert_eq!(Opcode::StoreSlice2.slice_bounds(), Some((false, true)));
}

#[test]
fn assembler_reports_bad_sources() {
    assert!(assemble("LOAD_CONST 1").is_err());
    assert!(assemble("def f():\n    BOGUS\n").is_err());
    assert!(assemble("def f():\n    LOAD_CONST\n").is_err());
    assert!(assemble("def f():\n    JUMP_FORWARD back\n").is_err());
    assert!(assemble("def f():\n back:\n    JUMP_FORWARD back\n").is_err());
    assert!(assemble("def f(a=1, b):\n    RETURN_VALUE\n").is_err());
    assert!(assemble("def f():\n    LOAD_CONST None\n    RETURN_VALUE\ndef f():\n    RETURN_VALUE\n").is_err());
}

#[test]
fn assembler_builds_signature_flags_and_defaults() {
    let program = assemble(
        "def f(a, b=2, *rest, **kw):
            LOAD_FAST a
            RETURN_VALUE",
    )
    .expect("assembles");
    let unit = program.get("f").expect("unit");
    assert_eq!(unit.code.argcount, 2);
    assert!(unit.code.has_varargs());
    assert!(unit.code.has_varkeywords());
    assert_eq!(unit.code.varnames, vec!["a", "b", "rest", "kw"]);
    assert_eq!(unit.defaults.len(), 1);
    assert_eq!(unit.defaults[0].as_int(), Some(2));
}

#[test]
fn nested_units_are_constants() {
    let program = assemble(
        "def outer():
            LOAD_CONST @inner
            MAKE_FUNCTION 0
            RETURN_VALUE
         def inner():
            LOAD_CONST 7
            RETURN_VALUE",
    )
    .expect("assembles");
    let outer = &program.get("outer").expect("unit").code;
    assert_eq!(outer.nested().count(), 1);
    assert_eq!(program.all_code().len(), 2);
}

#[test]
fn tier_state_tracks_failures_per_level() {
    let code = raw_unit(vec![Opcode::LoadConst.byte(), 0, 0, Opcode::ReturnValue.byte()], vec![Value::none()]);
    assert_eq!(code.tier_state(), TierState::Interpreted);
    assert!(!code.use_jit());
    code.set_use_jit(true);
    assert!(code.use_jit());

    assert_eq!(code.optimization(), None);
    assert_eq!(code.resolve_optimization(OptLevel::O2), OptLevel::O2);
    assert_eq!(code.optimization(), Some(OptLevel::O2));
    assert_eq!(code.resolve_optimization(OptLevel::O0), OptLevel::O2);

    code.set_tier_state(TierState::Failed(OptLevel::O2));
    assert!(code.has_failed(OptLevel::O2));
    assert!(!code.has_failed(OptLevel::O1));
    code.set_tier_state(TierState::Compiled(OptLevel::O1));
    assert!(code.has_failed(OptLevel::O2));
}

#[test]
fn code_ids_are_unique() {
    let a = raw_unit(vec![Opcode::ReturnValue.byte()], vec![]);
    let b = raw_unit(vec![Opcode::ReturnValue.byte()], vec![]);
    assert_ne!(a.id(), b.id());
    assert!(a.id().get() > 0);
}
