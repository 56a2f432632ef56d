//! Pipeline-simulating program generator.
//!
//! Instructions are drawn from weighted template slots as they would come out
//! of a 16-byte instruction decoder, then placed onto a simulated three-port
//! execution engine. Operand selection only considers registers whose values
//! are ready at the issue cycle, which forces long dependency chains without
//! ever exceeding the latency budget. Everything is driven by a single
//! [`BlakeGenerator`] stream, so the whole construction is deterministic.

use super::blake_gen::BlakeGenerator;
use super::{is_zero_or_power_of_two, reciprocal, Op, Program};

const LOOK_FORWARD_CYCLES: usize = 4;
const MAX_THROWAWAY_COUNT: usize = 256;
/// The register that carries a displacement in the address-shift template;
/// it may be a source but never the destination of that template.
const DISPLACEMENT_REG: usize = 5;

// =============================================================================
// EXECUTION PORTS AND MACRO-OPS
// =============================================================================

const P0: u8 = 1;
const P1: u8 = 2;
const P5: u8 = 4;
const P01: u8 = P0 | P1;
const P05: u8 = P0 | P5;
const P015: u8 = P0 | P1 | P5;

/// One x86-sized macro-op: its result latency and the execution ports of its
/// micro-ops. `uop1 == 0` marks a move eliminated in the rename stage;
/// `uop2 != 0` marks a two-uop instruction whose halves must issue in the
/// same cycle.
#[derive(Debug, Clone, Copy)]
struct MacroOp {
    latency: usize,
    uop1: u8,
    uop2: u8,
    dependent: bool,
}

const fn mop(latency: usize, uop1: u8) -> MacroOp {
    MacroOp {
        latency,
        uop1,
        uop2: 0,
        dependent: false,
    }
}

const SUB_RR: MacroOp = mop(1, P015);
const XOR_RR: MacroOp = mop(1, P015);
const LEA_SIB: MacroOp = mop(1, P01);
const IMUL_RR: MacroOp = mop(3, P1);
const ROR_RI: MacroOp = mop(1, P05);
const ADD_RI: MacroOp = mop(1, P015);
const XOR_RI: MacroOp = mop(1, P015);
const MOV_RR: MacroOp = mop(0, 0);
const MOV_RI64: MacroOp = mop(1, P015);
const MUL_R: MacroOp = MacroOp {
    latency: 4,
    uop1: P1,
    uop2: P5,
    dependent: false,
};
const IMUL_R: MacroOp = MacroOp {
    latency: 4,
    uop1: P1,
    uop2: P5,
    dependent: false,
};
const IMUL_RR_DEP: MacroOp = MacroOp {
    latency: 3,
    uop1: P1,
    uop2: 0,
    dependent: true,
};

// =============================================================================
// INSTRUCTION TEMPLATES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    SubR,
    XorR,
    AddRs,
    MulR,
    RorC,
    AddC7,
    AddC8,
    AddC9,
    XorC7,
    XorC8,
    XorC9,
    MulHR,
    SMulHR,
    MulRcp,
}

/// Dependency-chain group. Consecutive operations of the same group (with the
/// same group parameter) on one register would collapse under algebraic
/// simplification, so destination selection avoids them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    AddRs,
    XorR,
    MulR,
    RorC,
    AddC,
    XorC,
    MulH,
    SMulH,
    MulRcp,
}

struct Template {
    kind: Kind,
    ops: &'static [MacroOp],
    result_op: usize,
    dst_op: usize,
    src_op: Option<usize>,
}

static SUB_R_T: Template = Template {
    kind: Kind::SubR,
    ops: &[SUB_RR],
    result_op: 0,
    dst_op: 0,
    src_op: Some(0),
};
static XOR_R_T: Template = Template {
    kind: Kind::XorR,
    ops: &[XOR_RR],
    result_op: 0,
    dst_op: 0,
    src_op: Some(0),
};
static ADD_RS_T: Template = Template {
    kind: Kind::AddRs,
    ops: &[LEA_SIB],
    result_op: 0,
    dst_op: 0,
    src_op: Some(0),
};
static MUL_R_T: Template = Template {
    kind: Kind::MulR,
    ops: &[IMUL_RR],
    result_op: 0,
    dst_op: 0,
    src_op: Some(0),
};
static ROR_C_T: Template = Template {
    kind: Kind::RorC,
    ops: &[ROR_RI],
    result_op: 0,
    dst_op: 0,
    src_op: None,
};
static ADD_C7_T: Template = Template {
    kind: Kind::AddC7,
    ops: &[ADD_RI],
    result_op: 0,
    dst_op: 0,
    src_op: None,
};
static ADD_C8_T: Template = Template {
    kind: Kind::AddC8,
    ops: &[ADD_RI],
    result_op: 0,
    dst_op: 0,
    src_op: None,
};
static ADD_C9_T: Template = Template {
    kind: Kind::AddC9,
    ops: &[ADD_RI],
    result_op: 0,
    dst_op: 0,
    src_op: None,
};
static XOR_C7_T: Template = Template {
    kind: Kind::XorC7,
    ops: &[XOR_RI],
    result_op: 0,
    dst_op: 0,
    src_op: None,
};
static XOR_C8_T: Template = Template {
    kind: Kind::XorC8,
    ops: &[XOR_RI],
    result_op: 0,
    dst_op: 0,
    src_op: None,
};
static XOR_C9_T: Template = Template {
    kind: Kind::XorC9,
    ops: &[XOR_RI],
    result_op: 0,
    dst_op: 0,
    src_op: None,
};
static MULH_R_T: Template = Template {
    kind: Kind::MulHR,
    ops: &[MOV_RR, MUL_R, MOV_RR],
    result_op: 1,
    dst_op: 0,
    src_op: Some(1),
};
static SMULH_R_T: Template = Template {
    kind: Kind::SMulHR,
    ops: &[MOV_RR, IMUL_R, MOV_RR],
    result_op: 1,
    dst_op: 0,
    src_op: Some(1),
};
static MUL_RCP_T: Template = Template {
    kind: Kind::MulRcp,
    ops: &[MOV_RI64, IMUL_RR_DEP],
    result_op: 1,
    dst_op: 1,
    src_op: None,
};

static SLOT_3: [&Template; 2] = [&SUB_R_T, &XOR_R_T];
static SLOT_3L: [&Template; 4] = [&SUB_R_T, &XOR_R_T, &MULH_R_T, &SMULH_R_T];
static SLOT_4: [&Template; 2] = [&ROR_C_T, &ADD_RS_T];
static SLOT_7: [&Template; 2] = [&XOR_C7_T, &ADD_C7_T];
static SLOT_8: [&Template; 2] = [&XOR_C8_T, &ADD_C8_T];
static SLOT_9: [&Template; 2] = [&XOR_C9_T, &ADD_C9_T];

const fn is_mul(kind: Kind) -> bool {
    matches!(kind, Kind::MulR | Kind::MulHR | Kind::SMulHR | Kind::MulRcp)
}

// =============================================================================
// DECODE ROWS
// =============================================================================

/// One 16-byte decode group, split into instruction slots.
#[derive(Debug, Clone, Copy)]
struct DecodeRow {
    id: i32,
    slots: &'static [u32],
}

const ROW_484: DecodeRow = DecodeRow {
    id: 0,
    slots: &[4, 8, 4],
};
const ROW_7333: DecodeRow = DecodeRow {
    id: 1,
    slots: &[7, 3, 3, 3],
};
const ROW_3733: DecodeRow = DecodeRow {
    id: 2,
    slots: &[3, 7, 3, 3],
};
const ROW_493: DecodeRow = DecodeRow {
    id: 3,
    slots: &[4, 9, 3],
};
const ROW_4444: DecodeRow = DecodeRow {
    id: 4,
    slots: &[4, 4, 4, 4],
};
const ROW_3310: DecodeRow = DecodeRow {
    id: 5,
    slots: &[3, 3, 10],
};
// The 4-4-4-4 group is reachable only through the multiplication-saturation
// rule below, never from the random pick.
const DEFAULT_ROWS: [DecodeRow; 4] = [ROW_484, ROW_7333, ROW_3733, ROW_493];

fn fetch_next(
    gen: &mut BlakeGenerator,
    last_kind: Option<Kind>,
    decode_cycle: usize,
    mul_count: usize,
) -> DecodeRow {
    // A wide multiplication decodes to two uops, so the next group must be
    // 2-1-1 to stay within four uops per cycle.
    if matches!(last_kind, Some(Kind::MulHR | Kind::SMulHR)) {
        return ROW_3310;
    }
    // Keep at least one multiplication per decode cycle on average.
    if mul_count < decode_cycle + 1 {
        return ROW_4444;
    }
    // A reciprocal multiply leaves its 4-byte second macro-op for the next
    // group, which therefore has to start with a 4-byte slot.
    if last_kind == Some(Kind::MulRcp) {
        return if gen.byte() & 1 == 0 {
            ROW_493
        } else {
            ROW_484
        };
    }
    DEFAULT_ROWS[gen.byte() as usize & 3]
}

fn select_template(
    gen: &mut BlakeGenerator,
    slot_size: u32,
    row_id: i32,
    is_last_slot: bool,
) -> &'static Template {
    match slot_size {
        // The last slot of a group may carry a wide multiplication, whose
        // trailing macro-ops spill into the following 3-3-10 group.
        3 if is_last_slot => SLOT_3L[gen.byte() as usize & 3],
        3 => SLOT_3[gen.byte() as usize & 1],
        4 => {
            if row_id == ROW_4444.id && !is_last_slot {
                &MUL_R_T
            } else {
                SLOT_4[gen.byte() as usize & 1]
            }
        }
        7 => SLOT_7[gen.byte() as usize & 1],
        8 => SLOT_8[gen.byte() as usize & 1],
        9 => SLOT_9[gen.byte() as usize & 1],
        _ => &MUL_RCP_T,
    }
}

// =============================================================================
// INSTRUCTION STATE
// =============================================================================

struct Instr {
    template: &'static Template,
    dst: usize,
    src: Option<usize>,
    shift_mod: u8,
    imm: u32,
    group: Group,
    group_par: i32,
    can_reuse: bool,
    par_is_source: bool,
}

fn create(template: &'static Template, gen: &mut BlakeGenerator) -> Instr {
    let mut instr = Instr {
        template,
        dst: 0,
        src: None,
        shift_mod: 0,
        imm: 0,
        group: Group::AddRs,
        group_par: -1,
        can_reuse: false,
        par_is_source: false,
    };
    match template.kind {
        Kind::SubR => {
            instr.group = Group::AddRs;
            instr.par_is_source = true;
        }
        Kind::XorR => {
            instr.group = Group::XorR;
            instr.par_is_source = true;
        }
        Kind::AddRs => {
            instr.shift_mod = gen.byte();
            instr.group = Group::AddRs;
            instr.par_is_source = true;
        }
        Kind::MulR => {
            instr.group = Group::MulR;
            instr.par_is_source = true;
        }
        Kind::RorC => {
            loop {
                instr.imm = u32::from(gen.byte() & 63);
                if instr.imm != 0 {
                    break;
                }
            }
            instr.group = Group::RorC;
        }
        Kind::AddC7 | Kind::AddC8 | Kind::AddC9 => {
            instr.imm = gen.word();
            instr.group = Group::AddC;
        }
        Kind::XorC7 | Kind::XorC8 | Kind::XorC9 => {
            instr.imm = gen.word();
            instr.group = Group::XorC;
        }
        Kind::MulHR => {
            instr.can_reuse = true;
            instr.group = Group::MulH;
            instr.group_par = gen.word() as i32;
        }
        Kind::SMulHR => {
            instr.can_reuse = true;
            instr.group = Group::SMulH;
            instr.group_par = gen.word() as i32;
        }
        Kind::MulRcp => {
            loop {
                instr.imm = gen.word();
                if !is_zero_or_power_of_two(instr.imm) {
                    break;
                }
            }
            instr.group = Group::MulRcp;
        }
    }
    instr
}

fn emit(instr: &Instr) -> Op {
    let dst = instr.dst;
    let src = instr.src.unwrap_or(dst);
    match instr.template.kind {
        Kind::SubR => Op::Sub { dst, src },
        Kind::XorR => Op::Xor { dst, src },
        Kind::AddRs => Op::AddShift {
            dst,
            src,
            shift: u32::from(instr.shift_mod >> 2) & 3,
        },
        Kind::MulR => Op::Mul { dst, src },
        Kind::RorC => Op::RotateRight {
            dst,
            shift: instr.imm,
        },
        Kind::AddC7 | Kind::AddC8 | Kind::AddC9 => Op::AddImm {
            dst,
            imm: instr.imm as i32,
        },
        Kind::XorC7 | Kind::XorC8 | Kind::XorC9 => Op::XorImm {
            dst,
            imm: instr.imm as i32,
        },
        Kind::MulHR => Op::MulHigh { dst, src },
        Kind::SMulHR => Op::SignedMulHigh { dst, src },
        Kind::MulRcp => Op::MulReciprocal {
            dst,
            reciprocal: reciprocal(u64::from(instr.imm)),
        },
    }
}

// =============================================================================
// REGISTER AND PORT STATE
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct RegisterInfo {
    ready: usize,
    last_group: Option<Group>,
    last_par: i32,
}

impl Default for RegisterInfo {
    fn default() -> Self {
        Self {
            ready: 0,
            last_group: None,
            last_par: -1,
        }
    }
}

fn select_register(available: &[usize], gen: &mut BlakeGenerator) -> Option<usize> {
    match available.len() {
        0 => None,
        1 => Some(available[0]),
        n => Some(available[gen.word() as usize % n]),
    }
}

fn select_source(
    instr: &mut Instr,
    cycle: usize,
    registers: &[RegisterInfo; 8],
    gen: &mut BlakeGenerator,
) -> bool {
    let mut available = [0_usize; 8];
    let mut count = 0;
    for (i, reg) in registers.iter().enumerate() {
        if reg.ready <= cycle {
            available[count] = i;
            count += 1;
        }
    }
    // With exactly two candidates for an address-shift and one of them being
    // the displacement register, take it as the source; it can never be the
    // destination and would otherwise deadlock the selection.
    if count == 2
        && instr.template.kind == Kind::AddRs
        && (available[0] == DISPLACEMENT_REG || available[1] == DISPLACEMENT_REG)
    {
        instr.group_par = DISPLACEMENT_REG as i32;
        instr.src = Some(DISPLACEMENT_REG);
        return true;
    }
    if let Some(reg) = select_register(&available[..count], gen) {
        instr.src = Some(reg);
        if instr.par_is_source {
            instr.group_par = reg as i32;
        }
        return true;
    }
    false
}

fn select_destination(
    instr: &mut Instr,
    cycle: usize,
    allow_chained_mul: bool,
    registers: &[RegisterInfo; 8],
    gen: &mut BlakeGenerator,
) -> bool {
    let mut available = [0_usize; 8];
    let mut count = 0;
    for (i, reg) in registers.iter().enumerate() {
        let ok = reg.ready <= cycle
            && (instr.can_reuse || instr.src != Some(i))
            && (allow_chained_mul
                || instr.group != Group::MulR
                || reg.last_group != Some(Group::MulR))
            && (reg.last_group != Some(instr.group) || reg.last_par != instr.group_par)
            && (instr.template.kind != Kind::AddRs || i != DISPLACEMENT_REG);
        if ok {
            available[count] = i;
            count += 1;
        }
    }
    if let Some(reg) = select_register(&available[..count], gen) {
        instr.dst = reg;
        return true;
    }
    false
}

fn schedule_uop(busy: &mut [[u8; 3]], uop: u8, mut cycle: usize, commit: bool) -> Option<usize> {
    while cycle < busy.len() {
        // P5 is least contended, then P0, then P1.
        if uop & P5 != 0 && busy[cycle][2] == 0 {
            if commit {
                busy[cycle][2] = uop;
            }
            return Some(cycle);
        }
        if uop & P0 != 0 && busy[cycle][0] == 0 {
            if commit {
                busy[cycle][0] = uop;
            }
            return Some(cycle);
        }
        if uop & P1 != 0 && busy[cycle][1] == 0 {
            if commit {
                busy[cycle][1] = uop;
            }
            return Some(cycle);
        }
        cycle += 1;
    }
    None
}

fn schedule_mop(
    busy: &mut [[u8; 3]],
    mop: MacroOp,
    cycle: usize,
    dep_cycle: usize,
    commit: bool,
) -> Option<usize> {
    let mut cycle = if mop.dependent {
        cycle.max(dep_cycle)
    } else {
        cycle
    };
    // Eliminated moves retire without touching a port.
    if mop.uop1 == 0 {
        return Some(cycle);
    }
    if mop.uop2 == 0 {
        return schedule_uop(busy, mop.uop1, cycle, commit);
    }
    // Both halves of a fused pair must issue in the same cycle.
    while cycle < busy.len() {
        if schedule_uop(busy, mop.uop1, cycle, false) == Some(cycle)
            && schedule_uop(busy, mop.uop2, cycle, false) == Some(cycle)
        {
            if commit {
                schedule_uop(busy, mop.uop1, cycle, true);
                schedule_uop(busy, mop.uop2, cycle, true);
            }
            return Some(cycle);
        }
        cycle += 1;
    }
    None
}

// =============================================================================
// GENERATION
// =============================================================================

#[allow(clippy::too_many_lines)]
pub(super) fn generate(gen: &mut BlakeGenerator, latency: usize) -> Program {
    let max_size = 3 * latency + 2;
    let mut busy = vec![[0_u8; 3]; latency + LOOK_FORWARD_CYCLES];
    let mut registers = [RegisterInfo::default(); 8];

    let mut current: Option<Instr> = None;
    let mut last_kind: Option<Kind> = None;
    let mut macro_idx = 0_usize;
    let mut cycle = 0_usize;
    let mut dep_cycle = 0_usize;
    let mut mul_count = 0_usize;
    let mut throw_away = 0_usize;
    let mut ports_saturated = false;
    let mut ops: Vec<Op> = Vec::with_capacity(max_size);

    for decode_cycle in 0..latency {
        if ports_saturated || ops.len() >= max_size {
            break;
        }
        let row = fetch_next(gen, last_kind, decode_cycle, mul_count);

        let mut slot = 0;
        'slots: while slot < row.slots.len() {
            let top_cycle = cycle;

            let need_new = match &current {
                None => true,
                Some(instr) => macro_idx >= instr.template.ops.len(),
            };
            if need_new {
                if ports_saturated || ops.len() >= max_size {
                    break;
                }
                let template = select_template(
                    gen,
                    row.slots[slot],
                    row.id,
                    slot + 1 == row.slots.len(),
                );
                last_kind = Some(template.kind);
                current = Some(create(template, gen));
                macro_idx = 0;
            }
            let Some(instr) = current.as_mut() else {
                break;
            };
            let mop = instr.template.ops[macro_idx];

            let Some(mut schedule_cycle) = schedule_mop(&mut busy, mop, cycle, dep_cycle, false)
            else {
                ports_saturated = true;
                break;
            };

            if instr.template.src_op == Some(macro_idx) {
                let mut forward = 0;
                while forward < LOOK_FORWARD_CYCLES
                    && !select_source(instr, schedule_cycle, &registers, gen)
                {
                    schedule_cycle += 1;
                    cycle += 1;
                    forward += 1;
                }
                if forward == LOOK_FORWARD_CYCLES {
                    if throw_away < MAX_THROWAWAY_COUNT {
                        throw_away += 1;
                        current = None;
                        continue 'slots;
                    }
                    current = None;
                    last_kind = None;
                    break;
                }
            }

            if instr.template.dst_op == macro_idx {
                let mut forward = 0;
                while forward < LOOK_FORWARD_CYCLES
                    && !select_destination(instr, schedule_cycle, throw_away > 0, &registers, gen)
                {
                    schedule_cycle += 1;
                    cycle += 1;
                    forward += 1;
                }
                if forward == LOOK_FORWARD_CYCLES {
                    if throw_away < MAX_THROWAWAY_COUNT {
                        throw_away += 1;
                        current = None;
                        continue 'slots;
                    }
                    current = None;
                    last_kind = None;
                    break;
                }
            }
            throw_away = 0;

            let Some(committed) = schedule_mop(&mut busy, mop, schedule_cycle, schedule_cycle, true)
            else {
                ports_saturated = true;
                break;
            };
            schedule_cycle = committed;
            dep_cycle = schedule_cycle + mop.latency;

            if instr.template.result_op == macro_idx {
                let reg = &mut registers[instr.dst];
                reg.ready = dep_cycle;
                reg.last_group = Some(instr.group);
                reg.last_par = instr.group_par;
            }

            macro_idx += 1;
            if schedule_cycle >= latency {
                ports_saturated = true;
            }
            cycle = top_cycle;

            if macro_idx >= instr.template.ops.len() {
                mul_count += usize::from(is_mul(instr.template.kind));
                ops.push(emit(instr));
            }
            slot += 1;
        }

        cycle += 1;
    }

    Program {
        address_register: address_register(&ops),
        ops,
    }
}

/// The register with the longest simplified dependency chain addresses the
/// next cache line; a shortcut device would have to evaluate that chain
/// before it can even start the next program.
fn address_register(ops: &[Op]) -> usize {
    let mut chain = [0_u32; 8];
    for op in ops {
        let dst = op.dst();
        let src = op.src().unwrap_or(dst);
        let via_dst = chain[dst] + 1;
        let via_src = if dst == src { 0 } else { chain[src] + 1 };
        chain[dst] = via_dst.max(via_src);
    }
    let mut best = 0;
    for (i, &depth) in chain.iter().enumerate() {
        if depth > chain[best] {
            best = i;
        }
    }
    best
}
