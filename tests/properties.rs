//! Property-based tests for the execution engine.
//!
//! Uses proptest to check the string ownership rules and the conversion
//! opcodes across randomly generated programs.

use proptest::prelude::*;

use vmagick::vm::Str;
use vmagick::{Image, ImageBuilder, Opcode, Operand, VM, Value};

use vmagick::Operand::{Int, Literal};

/// Slots the generated programs touch; every other slot stays `Int(0)`.
const SLOTS: i64 = 8;

fn load(b: &ImageBuilder) -> Image {
    Image::from_bytes(b.build()).unwrap()
}

fn run(b: &ImageBuilder) -> Vec<u8> {
    let image = load(b);
    let mut vm = VM::new(&image);
    match vm.run().unwrap() {
        Value::Str(s) => s.as_bytes().to_vec(),
        Value::Int(n) => n.to_string().into_bytes(),
    }
}

fn run_int(b: &ImageBuilder) -> i64 {
    let image = load(b);
    let mut vm = VM::new(&image);
    vm.run().unwrap().as_int().unwrap()
}

fn shuffle_op() -> impl Strategy<Value = (Opcode, i64, i64)> {
    let op = prop_oneof![
        Just(Opcode::St),
        Just(Opcode::Ld),
        Just(Opcode::Swp),
        Just(Opcode::Mst),
        Just(Opcode::Mld),
    ];
    // Split the slot index across both operands to exercise i + j.
    (op, 0..SLOTS, 0..SLOTS).prop_map(|(op, slot, base)| (op, base, slot - base))
}

fn sentinel_op() -> impl Strategy<Value = (Opcode, Vec<Operand>)> {
    prop_oneof![
        (1i64..100).prop_map(|i| (Opcode::Ins, vec![Int(i), Literal(0)])),
        (1i64..100).prop_map(|i| (Opcode::Casi, vec![Int(i)])),
        (37i64..100).prop_map(|r| (Opcode::Stoi, vec![Int(r)])),
        (-5i64..2).prop_map(|r| (Opcode::Itos, vec![Int(r)])),
        Just((Opcode::Cls, vec![Literal(0)])),
        Just((Opcode::Put, vec![Literal(0)])),
        Just((Opcode::Mst, vec![Int(1), Int(0)])),
        Just((Opcode::Mld, vec![Int(1), Int(0)])),
    ]
}

/// Slots that hold a reference to the same dynamic string as `s`.
fn holders(vm: &VM<'_>, s: &Str<'_>) -> usize {
    vm.stack()[..SLOTS as usize]
        .iter()
        .filter(|v| matches!(v, Value::Str(other) if other.same_storage(s)))
        .count()
}

proptest! {
    /// Live references to a dynamic string always equal the number of
    /// slots holding it, and the string is freed once none do.
    #[test]
    fn prop_refcount_matches_holders(ops in prop::collection::vec(shuffle_op(), 1..40)) {
        let mut b = ImageBuilder::with_sentinel();
        let s = b.literal("ab");
        b.instr(Opcode::Put, &[Literal(s)]).instr(Opcode::Cat, &[Literal(s)]);
        for (op, i, j) in &ops {
            b.instr(*op, &[Int(*i), Int(*j)]);
        }
        let image = load(&b);
        let mut vm = VM::new(&image);
        vm.step().unwrap();
        vm.step().unwrap();

        let tracked = vm.accumulator().as_str().unwrap().clone();
        let weak = tracked.downgrade().unwrap();

        while vm.step().unwrap() {
            // `tracked` itself is one extra owner.
            prop_assert_eq!(tracked.ref_count(), Some(holders(&vm, &tracked) + 1));
        }

        drop(tracked);
        drop(vm);
        prop_assert_eq!(weak.strong_count(), 0);
    }

    /// Error paths that assign the sentinel never turn it into a counted
    /// string or change what it is.
    #[test]
    fn prop_sentinel_stays_immortal(ops in prop::collection::vec(sentinel_op(), 1..30)) {
        let mut b = ImageBuilder::with_sentinel();
        b.instr(Opcode::Put, &[Literal(0)]);
        for (op, operands) in &ops {
            b.instr(*op, operands);
        }
        b.instr(Opcode::Put, &[Literal(0)]);
        let image = load(&b);
        let mut vm = VM::new(&image);
        while vm.step().unwrap() {
            if let Value::Str(s) = vm.accumulator() {
                if s.is_sentinel() {
                    prop_assert!(s.is_immortal());
                    prop_assert_eq!(s.ref_count(), None);
                }
            }
        }
        prop_assert!(vm.accumulator().is_sentinel());
        prop_assert_eq!(vm.accumulator().type_code(), -1);
        prop_assert_eq!(image.literal(0), Some(&b""[..]));
    }

    /// SBS recovers both halves of a concatenation.
    #[test]
    fn prop_cat_sbs_round_trip(
        a in prop::collection::vec(any::<u8>(), 0..40),
        c in prop::collection::vec(any::<u8>(), 0..40),
    ) {
        let mut b = ImageBuilder::with_sentinel();
        let la = b.literal(&a);
        let lc = b.literal(&c);
        b.instr(Opcode::Put, &[Literal(la)])
            .instr(Opcode::Cat, &[Literal(lc)])
            .instr(Opcode::Sbs, &[Int(0), Int(a.len() as i64)]);
        prop_assert_eq!(run(&b), a.clone());

        let mut b = ImageBuilder::with_sentinel();
        let la = b.literal(&a);
        let lc = b.literal(&c);
        b.instr(Opcode::Put, &[Literal(la)])
            .instr(Opcode::Cat, &[Literal(lc)])
            .instr(Opcode::Sbs, &[Int(a.len() as i64), Int(c.len() as i64)]);
        prop_assert_eq!(run(&b), c);
    }

    /// ITOS followed by STOI in the same radix is the identity.
    #[test]
    fn prop_itos_stoi_inverse(n in any::<i64>(), radix in 2i64..=36) {
        let mut b = ImageBuilder::with_sentinel();
        b.instr(Opcode::Put, &[Int(n)])
            .instr(Opcode::Itos, &[Int(radix)])
            .instr(Opcode::Stoi, &[Int(radix)]);
        prop_assert_eq!(run_int(&b), n);
    }

    /// Arithmetic on a string operand uses its length.
    #[test]
    fn prop_intcast_is_length(s in "[0-9]{0,12}", n in -1000i64..1000) {
        let mut b = ImageBuilder::with_sentinel();
        let ls = b.literal(&s);
        b.instr(Opcode::Put, &[Literal(ls)]).instr(Opcode::Add, &[Int(n)]);
        prop_assert_eq!(run_int(&b), s.len() as i64 + n);
    }
}
