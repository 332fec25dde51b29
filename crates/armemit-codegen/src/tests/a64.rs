use crate::a64::{Address, ArithOperand, Extend, IndexExtend, LogicalOperand, Reg};
use crate::cond::{Cond, Shift};
use crate::decode::{a64_logical_imm, eval_mov_sequence};
use crate::emit::{Arm64, Emitter};
use crate::error::EncodeError;

fn emitter() -> Emitter<Arm64> {
    Emitter::new()
}

fn x(n: u8) -> Reg {
    Reg::x(n)
}

fn w(n: u8) -> Reg {
    Reg::w(n)
}

// ---- Add/subtract ----

#[test]
fn encode_add_x_reg() {
    let mut e = emitter();
    // ADD X1, X2, X3
    e.add(x(1), x(2), x(3)).unwrap();
    assert_eq!(e.code()[0], 0x8B030041);
}

#[test]
fn encode_add_w_reg() {
    let mut e = emitter();
    // ADD W0, W1, W2
    e.add(w(0), w(1), w(2)).unwrap();
    assert_eq!(e.code()[0], 0x0B020020);
}

#[test]
fn encode_sub_w_imm() {
    let mut e = emitter();
    // SUB W0, W1, #1
    e.sub(w(0), w(1), ArithOperand::Imm(1)).unwrap();
    assert_eq!(e.code()[0], 0x51000420);
}

#[test]
fn encode_subs_x_imm() {
    let mut e = emitter();
    // SUBS X24, X24, #1
    e.subs(x(24), x(24), ArithOperand::Imm(1)).unwrap();
    assert_eq!(e.code()[0], 0xF1000718);
}

#[test]
fn encode_add_imm_shifted() {
    let mut e = emitter();
    // ADD X0, X1, #1, LSL #12
    e.add(x(0), x(1), ArithOperand::Imm(0x1000)).unwrap();
    assert_eq!(e.code()[0], 0x91400420);

    let err = e.add(x(0), x(1), ArithOperand::Imm(0x1001)).unwrap_err();
    assert!(matches!(err, EncodeError::UnencodableImmediate { value: 0x1001, .. }));
    assert_eq!(e.code().len(), 1);
}

#[test]
fn encode_add_sp_imm() {
    let mut e = emitter();
    // ADD SP, SP, #16
    e.add(Reg::SP, Reg::SP, ArithOperand::Imm(16)).unwrap();
    assert_eq!(e.code()[0], 0x910043FF);
}

#[test]
fn flag_setting_add_rejects_sp_destination() {
    let mut e = emitter();
    let err = e.adds(Reg::SP, x(1), ArithOperand::Imm(1)).unwrap_err();
    assert!(matches!(err, EncodeError::InvalidRegister { role: "Rd", .. }));
}

#[test]
fn encode_add_extended() {
    let mut e = emitter();
    // ADD X0, X1, W2, UXTW #2
    e.add(
        x(0),
        x(1),
        ArithOperand::Ext {
            rm: w(2),
            extend: Extend::Uxtw,
            amount: 2,
        },
    )
    .unwrap();
    assert_eq!(e.code()[0], 0x8B224820);

    let err = e
        .add(
            x(0),
            x(1),
            ArithOperand::Ext {
                rm: w(2),
                extend: Extend::Uxtw,
                amount: 5,
            },
        )
        .unwrap_err();
    assert!(matches!(err, EncodeError::ImmediateOutOfRange { max: 4, .. }));
}

#[test]
fn encode_sub_shifted() {
    let mut e = emitter();
    // SUB X0, X1, X2, LSL #3
    e.sub(
        x(0),
        x(1),
        ArithOperand::Reg {
            rm: x(2),
            shift: Shift::Lsl,
            amount: 3,
        },
    )
    .unwrap();
    assert_eq!(e.code()[0], 0xCB020C20);

    let ror = ArithOperand::Reg {
        rm: x(2),
        shift: Shift::Ror,
        amount: 3,
    };
    assert!(matches!(
        e.sub(x(0), x(1), ror),
        Err(EncodeError::InvalidShift { shift: "ror", .. })
    ));
}

#[test]
fn mixed_widths_are_rejected() {
    let mut e = emitter();
    let err = e.add(x(0), w(1), x(2)).unwrap_err();
    assert!(matches!(err, EncodeError::WidthMismatch { expected: 64, .. }));
    let err = e.add(w(0), w(1), x(2)).unwrap_err();
    assert!(matches!(err, EncodeError::WidthMismatch { expected: 32, .. }));
    assert!(e.code().is_empty());
}

#[test]
fn compare_and_negate_aliases() {
    let mut e = emitter();
    // CMP W9, #1 == SUBS WZR, W9, #1
    e.cmp(w(9), ArithOperand::Imm(1)).unwrap();
    e.subs(Reg::WZR, w(9), ArithOperand::Imm(1)).unwrap();
    // CMN W0, #1 == ADDS WZR, W0, #1
    e.cmn(w(0), ArithOperand::Imm(1)).unwrap();
    // NEG X0, X1 == SUB X0, XZR, X1
    e.neg(x(0), x(1)).unwrap();
    e.sub(x(0), Reg::XZR, x(1)).unwrap();

    assert_eq!(e.code(), &[0x7100053F, 0x7100053F, 0x3100041F, 0xCB0103E0, 0xCB0103E0]);
}

#[test]
fn mov_register_picks_orr_or_add() {
    let mut e = emitter();
    // MOV W0, W1 == ORR W0, WZR, W1
    e.mov(w(0), w(1)).unwrap();
    // MOV X0, SP == ADD X0, SP, #0
    e.mov(x(0), Reg::SP).unwrap();
    // MOV SP, X1 == ADD SP, X1, #0
    e.mov(Reg::SP, x(1)).unwrap();
    assert_eq!(e.code(), &[0x2A0103E0, 0x910003E0, 0x9100003F]);
}

// ---- Logical ----

#[test]
fn encode_logical_immediates() {
    let mut e = emitter();
    // AND X0, X1, #0xFF
    e.and(x(0), x(1), LogicalOperand::Imm(0xFF)).unwrap();
    // ORR W0, W1, #0xFFFF0000
    e.orr(w(0), w(1), LogicalOperand::Imm(0xFFFF_0000)).unwrap();
    // TST X0, #1 == ANDS XZR, X0, #1
    e.tst(x(0), LogicalOperand::Imm(1)).unwrap();
    // AND SP, X1, #0xFF
    e.and(Reg::SP, x(1), LogicalOperand::Imm(0xFF)).unwrap();
    assert_eq!(e.code(), &[0x92401C20, 0x32103C20, 0xF240001F, 0x92401C3F]);
}

#[test]
fn bic_immediate_encodes_complement() {
    let mut e = emitter();
    // BIC X0, X1, #0xFF == AND X0, X1, #0xFFFFFFFFFFFFFF00
    e.bic(x(0), x(1), LogicalOperand::Imm(0xFF)).unwrap();
    assert_eq!(e.code()[0], 0x9278DC20);
    let decoded = a64_logical_imm(e.code()[0]).unwrap();
    assert_eq!(decoded.value, 0xFFFF_FFFF_FFFF_FF00);
}

#[test]
fn logical_rejects_unencodable_immediates() {
    let mut e = emitter();
    for value in [0, u64::MAX, 0x1234] {
        assert!(matches!(
            e.and(x(0), x(1), LogicalOperand::Imm(value)),
            Err(EncodeError::UnencodableImmediate { .. })
        ));
    }
    // Wider than the register.
    assert!(e.orr(w(0), w(1), LogicalOperand::Imm(0x1_0000_0000)).is_err());
    // ANDS cannot write SP.
    assert!(matches!(
        e.ands(Reg::SP, x(1), LogicalOperand::Imm(0xFF)),
        Err(EncodeError::InvalidRegister { .. })
    ));
    assert!(e.code().is_empty());
}

#[test]
fn encode_logical_shifted_register() {
    let mut e = emitter();
    // EOR X0, X1, X2, ROR #4
    e.eor(
        x(0),
        x(1),
        LogicalOperand::Reg {
            rm: x(2),
            shift: Shift::Ror,
            amount: 4,
        },
    )
    .unwrap();
    // BIC W0, W1, W2
    e.bic(w(0), w(1), w(2)).unwrap();
    // MVN X0, X1 == ORN X0, XZR, X1
    e.mvn(x(0), x(1)).unwrap();
    assert_eq!(e.code(), &[0xCAC21020, 0x0A220020, 0xAA2103E0]);

    let too_far = LogicalOperand::Reg {
        rm: w(2),
        shift: Shift::Lsl,
        amount: 32,
    };
    assert!(e.orr(w(0), w(1), too_far).is_err());
}

// ---- Move wide ----

#[test]
fn encode_move_wide() {
    let mut e = emitter();
    // MOVZ W0, #42
    e.movz(w(0), 42, 0).unwrap();
    // MOVK W0, #0x1234, LSL #16
    e.movk(w(0), 0x1234, 1).unwrap();
    // MOVN X3, #0
    e.movn(x(3), 0, 0).unwrap();
    assert_eq!(e.code(), &[0x52800540, 0x72A24680, 0x92800003]);

    assert!(e.movz(w(0), 1, 2).is_err());
    assert!(e.movz(x(0), 1, 4).is_err());
    assert!(e.movz(Reg::SP, 1, 0).is_err());
}

#[test]
fn mov_imm_four_lane_constant() {
    let mut e = emitter();
    e.mov_imm(x(0), 0x1234_5678_9ABC_DEF0).unwrap();
    assert_eq!(e.code(), &[0xD29BDE00, 0xF2B35780, 0xF2CACF00, 0xF2E24680]);
    assert_eq!(eval_mov_sequence(e.code()), Some(0x1234_5678_9ABC_DEF0));
}

#[test]
fn mov_imm_uses_bitmask_when_shorter() {
    let mut e = emitter();
    e.mov_imm(x(5), 0x00FF_00FF_00FF_00FF).unwrap();
    assert_eq!(e.code().len(), 1);
    let decoded = a64_logical_imm(e.code()[0]).unwrap();
    assert_eq!((decoded.opc, decoded.rn, decoded.rd), (0b01, 31, 5));
    assert_eq!(eval_mov_sequence(e.code()), Some(0x00FF_00FF_00FF_00FF));
}

#[test]
fn mov_imm_bitmask_into_zr_and_sp() {
    // Rd = 31 is SP in ORR (immediate): ZR must take MOVZ/MOVK instead.
    let mut e = emitter();
    e.mov_imm(Reg::XZR, 0x00FF_00FF_00FF_00FF).unwrap();
    assert_eq!(e.code().len(), 4);
    assert!(e.code().iter().all(|&word| a64_logical_imm(word).is_none()));
    // MOVZ XZR, #0xff
    assert_eq!(e.code()[0], 0xD2801FFF);

    // ORR SP, XZR, #0x00ff00ff00ff00ff
    let mut e = emitter();
    e.mov_imm(Reg::SP, 0x00FF_00FF_00FF_00FF).unwrap();
    assert_eq!(e.code(), &[0xB2009FFF]);
    assert!(matches!(
        e.mov_imm(Reg::SP, 0x1234),
        Err(EncodeError::InvalidRegister { .. })
    ));
}

#[test]
fn mov_imm_uses_movn_for_mostly_ones() {
    let mut e = emitter();
    // MOVN W1, #1
    e.mov_imm(w(1), 0xFFFF_FFFE).unwrap();
    assert_eq!(e.code(), &[0x12800021]);
    assert!(e.mov_imm(w(1), 0x1_0000_0000).is_err());
}

// ---- Shifts and bitfields ----

#[test]
fn immediate_shift_aliases() {
    let mut e = emitter();
    // LSL X0, X1, #4 == UBFM X0, X1, #60, #59
    e.lsl(x(0), x(1), 4).unwrap();
    // LSR W0, W1, #3 == UBFM W0, W1, #3, #31
    e.lsr(w(0), w(1), 3).unwrap();
    // ASR X2, X3, #63 == SBFM X2, X3, #63, #63
    e.asr(x(2), x(3), 63).unwrap();
    // ROR W0, W1, #8 == EXTR W0, W1, W1, #8
    e.ror(w(0), w(1), 8).unwrap();
    assert_eq!(e.code(), &[0xD37CEC20, 0x53037C20, 0x937FFC62, 0x13812020]);

    assert!(e.lsl(w(0), w(1), 32).is_err());
    assert!(e.lsr(x(0), x(1), 64).is_err());
}

#[test]
fn lsl_by_zero_is_a_plain_move() {
    let mut e = emitter();
    e.lsl(x(0), x(1), 0).unwrap();
    // UBFM X0, X1, #0, #63
    assert_eq!(e.code()[0], 0xD340FC20);
}

#[test]
fn encode_variable_shift() {
    let mut e = emitter();
    // LSLV X0, X1, X2
    e.shift_reg(Shift::Lsl, x(0), x(1), x(2)).unwrap();
    // RORV W0, W1, W2
    e.shift_reg(Shift::Ror, w(0), w(1), w(2)).unwrap();
    assert_eq!(e.code(), &[0x9AC22020, 0x1AC22C20]);
}

#[test]
fn extend_aliases() {
    let mut e = emitter();
    // SXTW X0, W1
    e.sxtw(x(0), w(1)).unwrap();
    // SXTB W0, W1
    e.sxtb(w(0), w(1)).unwrap();
    // UXTB W0, W1
    e.uxtb(w(0), w(1)).unwrap();
    // UXTH W0, W1
    e.uxth(w(0), w(1)).unwrap();
    // SXTH X0, W1
    e.sxth(x(0), w(1)).unwrap();
    assert_eq!(e.code(), &[0x93407C20, 0x13001C20, 0x53001C20, 0x53003C20, 0x93403C20]);

    assert!(e.sxtw(w(0), w(1)).is_err());
    assert!(e.uxtb(x(0), w(1)).is_err());
}

#[test]
fn bitfield_extract_and_insert() {
    let mut e = emitter();
    // UBFX X0, X1, #8, #8 == UBFM X0, X1, #8, #15
    e.ubfx(x(0), x(1), 8, 8).unwrap();
    // BFI W0, W1, #4, #4 == BFM W0, W1, #28, #3
    e.bfi(w(0), w(1), 4, 4).unwrap();
    assert_eq!(e.code(), &[0xD3483C20, 0x331C0C20]);
    assert!(e.sbfx(w(0), w(1), 30, 4).is_err());
}

// ---- Multiply/divide and conditional select ----

#[test]
fn encode_multiply_divide() {
    let mut e = emitter();
    // MUL X0, X1, X2 == MADD X0, X1, X2, XZR
    e.mul(x(0), x(1), x(2)).unwrap();
    // MSUB W0, W1, W2, W3
    e.msub(w(0), w(1), w(2), w(3)).unwrap();
    // SDIV W0, W1, W2
    e.sdiv(w(0), w(1), w(2)).unwrap();
    // UDIV X0, X1, X2
    e.udiv(x(0), x(1), x(2)).unwrap();
    assert_eq!(e.code(), &[0x9B027C20, 0x1B028C20, 0x1AC20C20, 0x9AC20820]);
}

#[test]
fn encode_conditional_select() {
    let mut e = emitter();
    // CSET W0, EQ == CSINC W0, WZR, WZR, NE
    e.cset(w(0), Cond::EQ).unwrap();
    // CSEL X0, X1, X2, LT
    e.csel(x(0), x(1), x(2), Cond::LT).unwrap();
    // CSETM X1, HI == CSINV X1, XZR, XZR, LS
    e.csetm(x(1), Cond::HI).unwrap();
    assert_eq!(e.code(), &[0x1A9F17E0, 0x9A82B020, 0xDA9F93E1]);

    assert_eq!(
        e.cset(w(0), Cond::AL),
        Err(EncodeError::InvalidCondition {
            cond: Cond::AL,
            form: "cset"
        })
    );
}

// ---- Loads and stores ----

#[test]
fn encode_unsigned_offset_loads() {
    let mut e = emitter();
    // LDR X0, [X1, #8]
    e.ldr(x(0), Address::Offset(x(1), 8)).unwrap();
    // STR W2, [SP, #4]
    e.str(w(2), Address::Offset(Reg::SP, 4)).unwrap();
    // STRH W0, [X1, #2]
    e.strh(w(0), Address::Offset(x(1), 2)).unwrap();
    // LDRB W3, [X4]
    e.ldrb(w(3), Address::base(x(4))).unwrap();
    assert_eq!(e.code(), &[0xF9400420, 0xB90007E2, 0x79000420, 0x39400083]);
}

#[test]
fn small_negative_or_unaligned_offsets_use_unscaled_form() {
    let mut e = emitter();
    // LDUR X0, [X1, #-8]
    e.ldr(x(0), Address::Offset(x(1), -8)).unwrap();
    // LDUR X0, [X1, #3]
    e.ldr(x(0), Address::Offset(x(1), 3)).unwrap();
    assert_eq!(e.code(), &[0xF85F8020, 0xF8403020]);

    assert!(matches!(
        e.ldr(x(0), Address::Offset(x(1), 0x8001)),
        Err(EncodeError::MisalignedOffset { align: 8, .. })
    ));
    assert!(matches!(
        e.ldr(x(0), Address::Offset(x(1), -300)),
        Err(EncodeError::ImmediateOutOfRange { .. })
    ));
    assert!(e.ldr(x(0), Address::Offset(x(1), 8 * 4096)).is_err());
}

#[test]
fn encode_pre_and_post_index() {
    let mut e = emitter();
    // STR X30, [SP, #-16]!
    e.str(Reg::LR, Address::PreIndex(Reg::SP, -16)).unwrap();
    // LDR X30, [SP], #16
    e.ldr(Reg::LR, Address::PostIndex(Reg::SP, 16)).unwrap();
    assert_eq!(e.code(), &[0xF81F0FFE, 0xF84107FE]);
    assert!(e.ldr(x(0), Address::PreIndex(x(1), 256)).is_err());
}

#[test]
fn encode_register_offset() {
    let mut e = emitter();
    // LDRB W0, [X1, X2]
    e.ldrb(
        w(0),
        Address::Indexed {
            base: x(1),
            index: x(2),
            extend: IndexExtend::Lsl,
            scaled: false,
        },
    )
    .unwrap();
    // LDR X0, [X1, W2, SXTW #3]
    e.ldr(
        x(0),
        Address::Indexed {
            base: x(1),
            index: w(2),
            extend: IndexExtend::Sxtw,
            scaled: true,
        },
    )
    .unwrap();
    assert_eq!(e.code(), &[0x38626820, 0xF862D820]);

    let bad_index = Address::Indexed {
        base: x(1),
        index: x(2),
        extend: IndexExtend::Uxtw,
        scaled: false,
    };
    assert!(e.ldr(x(0), bad_index).is_err());
}

#[test]
fn load_store_register_rules() {
    let mut e = emitter();
    // Byte access needs a W register.
    assert!(matches!(
        e.ldrb(x(0), Address::base(x(1))),
        Err(EncodeError::WidthMismatch { .. })
    ));
    // Base register cannot be the zero register or a W register.
    assert!(e.ldr(x(0), Address::base(Reg::XZR)).is_err());
    assert!(e.ldr(x(0), Address::base(w(1))).is_err());
    // Transfer register cannot be SP.
    assert!(e.str(Reg::SP, Address::base(x(1))).is_err());
    // XZR as a store source is fine.
    e.str(Reg::XZR, Address::base(x(1))).unwrap();
    assert_eq!(e.code(), &[0xF900003F]);
}

#[test]
fn encode_pairs() {
    let mut e = emitter();
    // STP X29, X30, [SP, #-16]!
    e.stp(Reg::FP, Reg::LR, Address::PreIndex(Reg::SP, -16)).unwrap();
    // LDP X29, X30, [SP], #16
    e.ldp(Reg::FP, Reg::LR, Address::PostIndex(Reg::SP, 16)).unwrap();
    // STP W0, W1, [X2, #8]
    e.stp(w(0), w(1), Address::Offset(x(2), 8)).unwrap();
    assert_eq!(e.code(), &[0xA9BF7BFD, 0xA8C17BFD, 0x29010440]);

    assert!(matches!(
        e.stp(x(0), x(1), Address::Offset(Reg::SP, 12)),
        Err(EncodeError::MisalignedOffset { .. })
    ));
    assert!(e.stp(x(0), x(1), Address::Offset(Reg::SP, 512)).is_err());
    assert!(e.ldp(x(0), w(1), Address::base(Reg::SP)).is_err());
}

// ---- Branches ----

#[test]
fn encode_register_branches() {
    let mut e = emitter();
    e.ret();
    e.ret_to(x(1)).unwrap();
    e.br(x(16)).unwrap();
    e.blr(x(8)).unwrap();
    e.brk(1);
    e.nop();
    assert_eq!(
        e.code(),
        &[0xD65F03C0, 0xD65F0020, 0xD61F0200, 0xD63F0100, 0xD4200020, 0xD503201F]
    );
    assert!(e.br(w(1)).is_err());
}

#[test]
fn encode_compare_and_test_branches() {
    let mut e = emitter();
    let fwd = e.new_label();
    let back = e.new_label();
    e.bind(back).unwrap();
    // CBZ W3, fwd (+8)
    e.cbz(w(3), fwd).unwrap();
    // CBNZ X0, back (-4)
    e.cbnz(x(0), back).unwrap();
    e.bind(fwd).unwrap();
    assert_eq!(e.code(), &[0x34000043, 0xB5FFFFE0]);

    let mut e = emitter();
    let l = e.new_label();
    // TBZ X0, #33, l (+16)
    e.tbz(x(0), 33, l).unwrap();
    for _ in 0..3 {
        e.nop();
    }
    e.bind(l).unwrap();
    assert_eq!(e.code()[0], 0xB6080080);
    assert!(e.tbnz(w(0), 33, l).is_err());
}

#[test]
fn backward_call() {
    let mut e = emitter();
    let f = e.new_label();
    e.bind(f).unwrap();
    e.nop();
    e.nop();
    // BL f (-8)
    e.bl(f).unwrap();
    assert_eq!(e.code()[2], 0x97FFFFFE);
}

#[test]
fn literal_load_from_label() {
    let mut e = emitter();
    let data = e.new_label();
    // LDR X0, data (+8)
    e.ldr_literal(x(0), data).unwrap();
    e.ret();
    e.bind(data).unwrap();
    e.emit(0xDEAD_BEEF);
    e.emit(0);
    assert_eq!(e.code()[0], 0x58000040);
}
