// End-to-end assembly tests over the library interface.

use std::io;

use asmf32::assembler::{Assembler, ListingWriter, Severity};

fn assemble(source: &str) -> Result<Assembler, String> {
    let mut assembler = Assembler::new();
    let mut listing = ListingWriter::new(io::sink());
    assembler
        .assemble(source, &mut listing)
        .map_err(|err| err.to_string())?;
    Ok(assembler)
}

fn assemble_bytes(source: &str) -> Vec<u8> {
    let assembler = assemble(source).expect("assemble");
    let mut entries = assembler.image().entries().to_vec();
    entries.sort_by_key(|(addr, _)| *addr);
    entries.into_iter().map(|(_, value)| value).collect()
}

#[test]
fn forward_reference_matches_the_backward_layout() {
    let assembler = assemble("  jmp target\n  nop\ntarget: nop\n").expect("assemble");
    let target = assembler.symbols().get("target").expect("label").value;
    assert_eq!(target, 6);
    // Branch offsets count from the end of the jmp.
    let offset = u16::from_be_bytes([
        assembler.image().byte_at(2).expect("imm hi"),
        assembler.image().byte_at(3).expect("imm lo"),
    ]);
    assert_eq!(offset as i16 as i64, target - 4);
}

#[test]
fn forcing_extra_resolution_passes_leaves_output_unchanged() {
    // An .if forces at least one extra pass without emitting anything,
    // so both programs must produce the same code bytes.
    let plain = assemble_bytes("  jmp target\ntarget: nop\n");
    let forced = assemble_bytes("  .if 1\n  .endif\n  jmp target\ntarget: nop\n");
    assert_eq!(plain, forced);

    let plain_passes = assemble("  jmp target\ntarget: nop\n")
        .expect("assemble")
        .resolution_passes();
    let forced_passes = assemble("  .if 1\n  .endif\n  jmp target\ntarget: nop\n")
        .expect("assemble")
        .resolution_passes();
    assert_eq!(plain_passes, 1);
    assert!(forced_passes > plain_passes);
}

#[test]
fn group2_encoding_round_trips_all_four_fields() {
    let bytes = assemble_bytes("  ldr r3, [r5, r9, 0x123]\n");
    assert_eq!(bytes.len(), 4);
    let word1 = u16::from_be_bytes([bytes[0], bytes[1]]);
    let word2 = u16::from_be_bytes([bytes[2], bytes[3]]);
    assert_eq!((word1 >> 4) & 0x0f, 3);
    assert_eq!(word1 & 0x0f, 5);
    assert_eq!(word2 >> 12, 9);
    assert_eq!(word2 & 0x0fff, 0x123);
}

#[test]
fn oversized_immediate_masks_and_warns_exactly_once() {
    let mut assembler = assemble("  cpyi r0, 0x10000\n").expect("assemble");
    let warnings = assembler.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].severity(), Severity::Warning);
    assert_eq!(assembler.image().byte_at(2), Some(0x00));
    assert_eq!(assembler.image().byte_at(3), Some(0x00));
}

#[test]
fn role_conflict_aborts_before_any_bytes_are_emitted() {
    let mut assembler = Assembler::new();
    let mut listing = ListingWriter::new(io::sink());
    let err = assembler
        .assemble("foo: .equate 5\nfoo: nop\n", &mut listing)
        .expect_err("role conflict");
    assert!(err.to_string().contains("Equate name"));
    assert!(assembler.image().is_empty());
}

#[test]
fn terms_chain_left_to_right_without_operator_precedence() {
    assert_eq!(assemble_bytes("  .db 3 + 4 * 2\n"), vec![14]);
    assert_eq!(assemble_bytes("  .db 3 + (4 * 2)\n"), vec![11]);
}

#[test]
fn origin_may_depend_on_a_forward_equate() {
    let assembler = assemble(
        "  jmp start\n  .org base\nstart: nop\nbase: .equate 0x100\n",
    )
    .expect("assemble");
    assert_eq!(assembler.symbols().get("start").expect("label").value, 0x100);
    assert_eq!(assembler.image().byte_at(2), Some(0x00));
    assert_eq!(assembler.image().byte_at(3), Some(0xfc));
    assert_eq!(assembler.image().byte_at(0x100), Some(0x00));
}

#[test]
fn oscillating_origin_is_rejected_not_hung() {
    let err = assemble("  .org after\n  nop\nafter: nop\n").expect_err("oscillating origin");
    assert!(err.contains("Cannot resolve references"));
}

#[test]
fn self_expanding_define_is_rejected_not_hung() {
    let err = assemble(".def again() again\n  again\n").expect_err("self reference");
    assert!(err.contains("Cannot resolve defines"));
}

#[test]
fn equates_may_reference_labels_defined_around_them() {
    let assembler = assemble(
        "start: nop\n  nop\nend: nop\nsize: .equate end - start\n  .db size\n",
    )
    .expect("assemble");
    assert_eq!(assembler.symbols().get("size").expect("equate").value, 4);
    assert_eq!(assembler.image().byte_at(6), Some(4));
}

#[test]
fn predefines_drive_conditional_assembly() {
    let source = "  .if DEBUG\n  .db 1\n  .else\n  .db 2\n  .endif\n";

    let mut debug = Assembler::new();
    debug.predefine("DEBUG", "1").expect("predefine");
    let mut listing = ListingWriter::new(io::sink());
    debug.assemble(source, &mut listing).expect("assemble");
    assert_eq!(debug.image().byte_at(0), Some(1));

    let mut release = Assembler::new();
    release.predefine("DEBUG", "0").expect("predefine");
    let mut listing = ListingWriter::new(io::sink());
    release.assemble(source, &mut listing).expect("assemble");
    assert_eq!(release.image().byte_at(0), Some(2));
}

#[test]
fn hex_output_covers_the_emitted_image() {
    let assembler = assemble("  .org 0x10\n  .db 0x41, 0x42\n").expect("assemble");
    let mut out = Vec::new();
    assembler.image().write_hex_file(&mut out).expect("hex");
    let text = String::from_utf8(out).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec![":0200100041426B", ":00000001FF"]);
}

#[test]
fn listing_reports_addresses_bytes_and_symbols() {
    let mut assembler = Assembler::new();
    let mut out = Vec::new();
    {
        let mut listing = ListingWriter::new(&mut out);
        assembler
            .assemble("start: cpyi r0, 5\n", &mut listing)
            .expect("assemble");
    }
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("00000000"));
    assert!(text.contains("40 00 00 05"));
    assert!(text.contains("SYMBOL TABLE"));
    assert!(text.contains("start"));
}
