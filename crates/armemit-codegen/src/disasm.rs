use std::fmt::Write;

use crate::decode::{decode_a32, reference_target};
use crate::emit::{Code, Isa};
use crate::label::Label;

/// Render an annotated listing of finished code.
///
/// Bound labels appear as headers, markers as `;;` separators, and every
/// PC-relative word is annotated with the label (or offset) it refers to.
pub fn render_listing(code: &Code) -> String {
    let mut out = String::new();
    let total_words = code.words.len();
    let label_at = build_label_map(&code.labels, total_words);
    let mut marks = code.markers.iter().peekable();
    let mut mark_index = 0;

    for (word_idx, &word) in code.words.iter().enumerate() {
        let byte_off = word_idx * 4;

        while marks.next_if(|&&m| m <= byte_off).is_some() {
            writeln!(out, "  ;; mark {mark_index}").unwrap();
            mark_index += 1;
        }
        for label in label_at[word_idx].iter() {
            writeln!(out, "  {label}:").unwrap();
        }

        let mnemonic = decode_instruction(code.isa, word);
        match reference_target(code.isa, word, byte_off) {
            Some((_, target)) => {
                let name = label_at
                    .get(target / 4)
                    .and_then(|names| names.first().cloned())
                    .unwrap_or_else(|| format!("{target:#06x}"));
                writeln!(out, "    {byte_off:04x}: {word:08x}  {mnemonic:<30} ; -> {name}").unwrap();
            }
            None => writeln!(out, "    {byte_off:04x}: {word:08x}  {mnemonic}").unwrap(),
        }
    }

    // Labels bound at the very end of the code.
    for label in label_at[total_words].iter() {
        writeln!(out, "  {label}:").unwrap();
    }

    out
}

/// Render bare words with no label information.
pub fn render_words(isa: Isa, words: &[u32]) -> String {
    render_listing(&Code {
        isa,
        words: words.to_vec(),
        labels: Vec::new(),
        markers: Vec::new(),
    })
}

/// Decode a single instruction word: `disarm64` for A64, the local decoder
/// for the A32 forms it knows.
pub fn decode_instruction(isa: Isa, word: u32) -> String {
    match isa {
        Isa::A64 => match disarm64::decoder::decode(word) {
            Some(insn) => format!("{insn}"),
            None => format!(".word 0x{word:08x}"),
        },
        Isa::A32 => match decode_a32(word) {
            Some(insn) => insn.to_string(),
            None => format!(".word 0x{word:08x}"),
        },
    }
}

/// Map from word offset → label names bound there. One extra slot for
/// labels bound at the end of the code.
fn build_label_map(labels: &[(Label, usize)], total_words: usize) -> Vec<Vec<String>> {
    let mut map: Vec<Vec<String>> = vec![Vec::new(); total_words + 1];
    for &(label, offset) in labels {
        if let Some(slot) = map.get_mut(offset / 4) {
            slot.push(label.to_string());
        }
    }
    map
}
