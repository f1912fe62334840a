use tcg_core::tb::*;

#[test]
fn tb_new() {
    let tb = TranslationBlock::new(0x1000, 0, 0);
    assert_eq!(tb.pc, 0x1000);
    assert_eq!(tb.size, 0);
    assert_eq!(tb.jmp_insn_offset, [None, None]);
    assert_eq!(tb.jmp_reset_offset, [None, None]);
    assert_eq!(tb.jmp_dest, [None, None]);
    assert!(tb.jmp_list.is_empty());
    assert_eq!(tb.hash_next, None);
    assert!(!tb.invalid);
}

#[test]
fn tb_hash_deterministic() {
    let h1 = TranslationBlock::hash(0x1000, 0);
    let h2 = TranslationBlock::hash(0x1000, 0);
    assert_eq!(h1, h2);
}

#[test]
fn tb_hash_in_range() {
    for pc in [0u64, 0x1000, 0xFFFF_FFFF, 0xFFFF_FFFF_FFFF_FFFF] {
        let h = TranslationBlock::hash(pc, 0);
        assert!(h < TB_HASH_SIZE);
    }
}

#[test]
fn tb_hash_different_flags() {
    let h1 = TranslationBlock::hash(0x1000, 0);
    let h2 = TranslationBlock::hash(0x1000, 1);
    assert_ne!(h1, h2);
}

#[test]
fn tb_jmp_offsets() {
    let mut tb = TranslationBlock::new(0x1000, 0, 0);
    tb.set_jmp_offsets(0, 100, 104);
    tb.set_jmp_offsets(1, 200, 204);

    assert_eq!(tb.jmp_insn_offset[0], Some(100));
    assert_eq!(tb.jmp_reset_offset[0], Some(104));
    assert_eq!(tb.jmp_insn_offset[1], Some(200));
    assert_eq!(tb.jmp_reset_offset[1], Some(204));
}

#[test]
fn tb_max_insns() {
    assert_eq!(TranslationBlock::max_insns(0), 512);
    assert_eq!(TranslationBlock::max_insns(100), 100);
    assert_eq!(TranslationBlock::max_insns(1), 1);
    assert_eq!(TranslationBlock::max_insns(cflags::CF_SINGLE_STEP | 10), 1);
}

#[test]
fn tb_exit_encoding() {
    assert_eq!(decode_tb_exit(0), TbExit::NoChain);
    assert_eq!(
        decode_tb_exit(encode_tb_exit(0, 0)),
        TbExit::Chain { tb: 0, slot: 0 }
    );
    assert_eq!(
        decode_tb_exit(encode_tb_exit(41, 1)),
        TbExit::Chain { tb: 41, slot: 1 }
    );
    assert_eq!(
        decode_tb_exit(encode_tb_exit(7, TB_EXIT_REQUESTED)),
        TbExit::Requested { tb: 7 }
    );
}

macro_rules! malformed_exit_cases {
    ($($name:ident: $raw:expr,)*) => {
        $(
            #[test]
            #[should_panic(expected = "tci: malformed exit value")]
            fn $name() {
                decode_tb_exit($raw);
            }
        )*
    };
}

malformed_exit_cases! {
    tb_exit_1_has_no_tb: 1,
    tb_exit_2_has_no_tb: 2,
    tb_exit_3_has_no_tb: 3,
    tb_exit_slot_2: encode_tb_exit(3, 2),
}

#[test]
fn tb_exit_never_zero() {
    for tb in [0usize, 1, 1000] {
        for slot in 0..4 {
            assert_ne!(encode_tb_exit(tb, slot), 0);
        }
    }
}

#[test]
fn jump_cache_basic() {
    let mut cache = JumpCache::new();
    assert_eq!(cache.lookup(0x1000), None);

    cache.insert(0x1000, 42);
    assert_eq!(cache.lookup(0x1000), Some(42));

    cache.remove(0x1000);
    assert_eq!(cache.lookup(0x1000), None);
}

#[test]
fn jump_cache_invalidate() {
    let mut cache = JumpCache::new();
    cache.insert(0x1000, 1);
    cache.insert(0x2000, 2);
    cache.invalidate();
    assert_eq!(cache.lookup(0x1000), None);
    assert_eq!(cache.lookup(0x2000), None);
}

#[test]
fn jump_cache_collision() {
    let mut cache = JumpCache::new();
    // Two PCs that map to the same index will overwrite each other
    let pc1 = 0x0000;
    let pc2 = pc1 + (TB_JMP_CACHE_SIZE as u64 * 4);
    cache.insert(pc1, 1);
    cache.insert(pc2, 2);
    assert_eq!(cache.lookup(pc1), Some(2));
}
