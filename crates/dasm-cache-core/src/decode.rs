//! x86/x64 streaming decode and instruction-text assembly (§4.4 steps 7-8).
//!
//! A worker hands this module raw code bytes plus the caller's rendering
//! `Params`; it hands back a finalized [`InstArray`] and the joined text
//! blob the worker then submits to the hash store. Source-line and
//! symbol-name annotation is resolved through a [`ParsedDebugInfo`] handle
//! plus an optional [`LineTextProvider`] — this module has no text-service
//! or hash-store dependency of its own, keeping the decode step testable
//! without either collaborator mocked.

use iced_x86::{Decoder, DecoderOptions, Formatter, GasFormatter, Instruction, IntelFormatter};

use crate::collaborators::{LineInfo, ParsedDebugInfo};
use crate::inst::{Inst, InstArray, InstChunkList};
use crate::params::{Params, StyleFlags, Syntax};

/// Resolves a source line's literal text for `SOURCE_LINES` annotation.
/// The worker implements this by composing the text service and hash
/// store; decode.rs never touches either directly.
pub trait LineTextProvider {
    fn resolve(&self, line: &LineInfo) -> Option<Vec<u8>>;
}

fn make_formatter(syntax: Syntax) -> Box<dyn Formatter> {
    match syntax {
        Syntax::Intel => Box::new(IntelFormatter::new()),
        Syntax::Att => Box::new(GasFormatter::new()),
    }
}

fn normalize_path(path: &[u8]) -> Vec<u8> {
    path.iter()
        .map(|&b| if b == b'\\' { b'/' } else { b })
        .collect()
}

struct PendingLine {
    bytes: Vec<u8>,
    code_off: u64,
    jump_dst_vaddr: u64,
}

fn file_pseudo_line(line: &LineInfo) -> PendingLine {
    let mut bytes = vec![b'>'];
    if !line.unit_path.is_empty() {
        bytes.push(b' ');
        bytes.extend_from_slice(&normalize_path(&line.unit_path));
    }
    PendingLine {
        bytes,
        code_off: 0,
        jump_dst_vaddr: 0,
    }
}

fn text_pseudo_line(text: &[u8]) -> PendingLine {
    let mut bytes = Vec::with_capacity(text.len() + 2);
    bytes.extend_from_slice(b"> ");
    bytes.extend_from_slice(text);
    PendingLine {
        bytes,
        code_off: 0,
        jump_dst_vaddr: 0,
    }
}

/// §4.4 step 8, "Addresses" part: two leading spaces, 16 uppercase hex
/// digits, two trailing spaces — plus an extra two-space indent when
/// debug-info is present, so real instructions line up under `"> "`
/// pseudo-instructions.
fn push_address_prefix(bytes: &mut Vec<u8>, ip: u64, indent_for_debug_info: bool) {
    if indent_for_debug_info {
        bytes.extend_from_slice(b"  ");
    }
    bytes.extend_from_slice(format!("  {ip:016X}  ").as_bytes());
}

/// §4.4 step 8, "CodeBytes" part: `"{hh hh … hh} "` left-padded to 16
/// columns.
fn push_code_bytes_prefix(bytes: &mut Vec<u8>, raw: &[u8]) {
    let mut braces = String::from("{");
    for (i, b) in raw.iter().enumerate() {
        if i > 0 {
            braces.push(' ');
        }
        braces.push_str(&format!("{b:02x}"));
    }
    braces.push_str("} ");
    bytes.extend_from_slice(format!("{braces:<16}").as_bytes());
}

#[allow(clippy::too_many_arguments)]
fn build_real_instruction_line(
    code: &[u8],
    instr: &Instruction,
    formatter: &mut dyn Formatter,
    params: &Params,
    debug_info: Option<&dyn ParsedDebugInfo>,
    indent_for_debug_info: bool,
) -> PendingLine {
    let mut bytes = Vec::new();
    let code_off = instr.ip().wrapping_sub(params.vaddr);

    if params.style_flags.contains(StyleFlags::ADDRESSES) {
        push_address_prefix(&mut bytes, instr.ip(), indent_for_debug_info);
    }
    if params.style_flags.contains(StyleFlags::CODE_BYTES) {
        let off = code_off as usize;
        if let Some(raw) = code.get(off..off + instr.len()) {
            push_code_bytes_prefix(&mut bytes, raw);
        }
    }

    let mut rendered = String::new();
    formatter.format(instr, &mut rendered);
    bytes.extend_from_slice(rendered.as_bytes());

    let mut jump_dst_vaddr = 0u64;
    let is_branch =
        instr.is_call_near() || instr.is_jmp_short_or_near() || instr.is_jcc_short_or_near();
    if is_branch {
        let target = instr.near_branch_target();
        jump_dst_vaddr = target;
        if params.style_flags.contains(StyleFlags::SYMBOL_NAMES) {
            if let Some(dbg) = debug_info {
                let target_voff = target.wrapping_sub(params.base_vaddr);
                if let Some(name) = dbg.procedure_name_for_voff(target_voff) {
                    bytes.push(b' ');
                    bytes.push(b'(');
                    bytes.extend_from_slice(name.as_bytes());
                    bytes.push(b')');
                }
            }
        }
    }

    PendingLine {
        bytes,
        code_off,
        jump_dst_vaddr,
    }
}

/// Stream-decode `code` at `params.vaddr` and render every instruction
/// into one newline-joined text blob (no trailing newline), interleaving
/// pseudo-instructions that annotate source file/line transitions when
/// `debug_info` resolves one and the caller asked for it via
/// `SOURCE_FILES_NAMES`/`SOURCE_LINES` (§4.4 step 7).
///
/// Returns the finalized instruction array and the raw bytes of the
/// assembled text blob; the caller is responsible for submitting that
/// blob to the hash store and wiring the returned key into `Info`.
pub fn decode_and_render(
    code: &[u8],
    params: &Params,
    debug_info: Option<&dyn ParsedDebugInfo>,
    line_text: Option<&dyn LineTextProvider>,
) -> (InstArray, Vec<u8>) {
    let mut decoder = Decoder::with_ip(
        params.arch.bitness(),
        code,
        params.vaddr,
        DecoderOptions::NONE,
    );
    let mut formatter = make_formatter(params.syntax);
    let mut chunks = InstChunkList::new();
    let mut instr = Instruction::default();
    let mut pending: Vec<PendingLine> = Vec::new();

    let want_source_annotation = params.style_flags.contains(StyleFlags::SOURCE_LINES)
        || params.style_flags.contains(StyleFlags::SOURCE_FILES_NAMES);
    let indent_for_debug_info = debug_info.is_some();

    let mut last_file: Option<Vec<u8>> = None;
    let mut last_line_number: Option<u32> = None;

    while decoder.can_decode() {
        decoder.decode_out(&mut instr);
        let voff = instr.ip().wrapping_sub(params.base_vaddr);

        if want_source_annotation {
            if let Some(dbg) = debug_info {
                if let Some(line) = dbg.line_for_voff(voff) {
                    if last_file.as_deref() != Some(line.unit_path.as_slice()) {
                        pending.push(file_pseudo_line(&line));
                        last_file = Some(line.unit_path.clone());
                        last_line_number = None;
                    }
                    if params.style_flags.contains(StyleFlags::SOURCE_LINES)
                        && last_line_number != Some(line.line_number)
                    {
                        if let Some(provider) = line_text {
                            if let Some(text) = provider.resolve(&line) {
                                pending.push(text_pseudo_line(&text));
                            }
                        }
                        last_line_number = Some(line.line_number);
                    }
                }
            }
        }

        pending.push(build_real_instruction_line(
            code,
            &instr,
            formatter.as_mut(),
            params,
            debug_info,
            indent_for_debug_info,
        ));
    }

    let mut text = Vec::new();
    for (i, line) in pending.iter().enumerate() {
        if i > 0 {
            text.push(b'\n');
        }
        let start = text.len() as u32;
        text.extend_from_slice(&line.bytes);
        let end = text.len() as u32;
        chunks.push(Inst {
            code_off: line.code_off,
            jump_dst_vaddr: line.jump_dst_vaddr,
            text_range: (start, end),
        });
    }

    log::debug!(
        "decoded {} instructions ({} text bytes) at vaddr {:#x}",
        chunks.len(),
        text.len(),
        params.vaddr
    );

    (chunks.finalize(), text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Arch;

    // `nop` ; `nop` ; `ret`
    const NOP_NOP_RET: &[u8] = &[0x90, 0x90, 0xC3];

    fn params(flags: StyleFlags) -> Params {
        Params::new(0x1000, Arch::X64, flags, Syntax::Intel)
    }

    #[test]
    fn decodes_three_instructions_with_no_annotation() {
        let (insts, text) = decode_and_render(NOP_NOP_RET, &params(StyleFlags::empty()), None, None);
        assert_eq!(insts.count(), 3);
        assert!(!text.is_empty());
    }

    #[test]
    fn ret_has_no_jump_target() {
        let (insts, _) = decode_and_render(NOP_NOP_RET, &params(StyleFlags::empty()), None, None);
        let ret = insts.as_slice()[2];
        assert_eq!(ret.jump_dst_vaddr, 0);
    }

    /// §8 scenario 1.
    #[test]
    fn scenario_1_addresses_exact_text() {
        let (insts, text) =
            decode_and_render(NOP_NOP_RET, &params(StyleFlags::ADDRESSES), None, None);
        assert_eq!(insts.count(), 3);
        assert_eq!(
            String::from_utf8(text).unwrap(),
            "  0000000000001000  nop\n  0000000000001001  nop\n  0000000000001002  ret"
        );
    }

    /// §8 scenario 2.
    #[test]
    fn scenario_2_no_flags_exact_text() {
        let (_, text) = decode_and_render(NOP_NOP_RET, &params(StyleFlags::empty()), None, None);
        assert_eq!(String::from_utf8(text).unwrap(), "nop\nnop\nret");
    }

    /// §8 scenario 3.
    #[test]
    fn scenario_3_code_bytes_padded_to_16_columns() {
        let (_, text) = decode_and_render(NOP_NOP_RET, &params(StyleFlags::CODE_BYTES), None, None);
        let text = String::from_utf8(text).unwrap();
        let lines: Vec<&str> = text.split('\n').collect();
        assert_eq!(lines.len(), 3);
        let nop_prefix = format!("{:<16}", "{90} ");
        let ret_prefix = format!("{:<16}", "{c3} ");
        assert_eq!(lines[0], format!("{nop_prefix}nop"));
        assert_eq!(lines[1], format!("{nop_prefix}nop"));
        assert_eq!(lines[2], format!("{ret_prefix}ret"));
    }

    /// §8 scenario 4: nil debug-info means no pseudo-instructions, even
    /// with both source-annotation flags set.
    #[test]
    fn scenario_4_nil_debug_info_emits_no_pseudo_lines() {
        let flags = StyleFlags::SOURCE_FILES_NAMES | StyleFlags::SOURCE_LINES;
        let (insts, text) = decode_and_render(NOP_NOP_RET, &params(flags), None, None);
        assert_eq!(insts.count(), 3);
        assert_eq!(String::from_utf8(text).unwrap(), "nop\nnop\nret");
    }

    struct FixedDebugInfo {
        path: Vec<u8>,
    }
    impl ParsedDebugInfo for FixedDebugInfo {
        fn line_for_voff(&self, voff: u64) -> Option<LineInfo> {
            Some(LineInfo {
                unit_path: self.path.clone(),
                line_number: 1 + voff as u32,
            })
        }
        fn procedure_name_for_voff(&self, _voff: u64) -> Option<String> {
            Some("do_thing".to_string())
        }
    }

    struct FixedLineText;
    impl LineTextProvider for FixedLineText {
        fn resolve(&self, line: &LineInfo) -> Option<Vec<u8>> {
            Some(format!("line {}", line.line_number).into_bytes())
        }
    }

    #[test]
    fn file_and_line_pseudo_instructions_are_interleaved() {
        let dbg = FixedDebugInfo {
            path: b"src/main.c".to_vec(),
        };
        let provider = FixedLineText;
        let (insts, text) = decode_and_render(
            NOP_NOP_RET,
            &params(StyleFlags::SOURCE_FILES_NAMES | StyleFlags::SOURCE_LINES),
            Some(&dbg),
            Some(&provider),
        );
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("> src/main.c"));
        assert!(text.contains("> line 1"));
        // Every instruction offset resolves to a distinct line here, so
        // annotation repeats before each real instruction.
        assert!(insts.count() > 3);
    }

    #[test]
    fn symbol_names_appends_parenthesized_procedure_name() {
        // `call rel32` to an address the fake debug info resolves.
        let code = [0xE8, 0x00, 0x00, 0x00, 0x00];
        let dbg = FixedDebugInfo {
            path: Vec::new(),
        };
        let p = Params::new(0x1000, Arch::X64, StyleFlags::SYMBOL_NAMES, Syntax::Intel);
        let (_, text) = decode_and_render(&code, &p, Some(&dbg), None);
        let text = String::from_utf8(text).unwrap();
        assert!(text.ends_with(" (do_thing)"));
    }
}
