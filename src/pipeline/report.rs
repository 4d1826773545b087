//! Report rendering: the raw answer as a paginated A4 PDF.
//!
//! Each non-blank line of the answer becomes a left-aligned paragraph in
//! 10 pt Helvetica, word-wrapped to the text column and flowed across as
//! many pages as needed. Text is drawn verbatim: markup such as `<b>` or
//! `**` is printed, not interpreted.
//!
//! The base-14 Helvetica font is referenced rather than embedded and drawn
//! through `WinAnsiEncoding`, so text is encoded to WinAnsi bytes: ASCII,
//! Latin-1 and the typographic specials in 0x80..=0x9F (`€`, `—`, `“`, `™`).
//! A few symbols outside that set are spelled out (`≤` → `<=`, `✓` → `[x]`)
//! and anything else becomes `?`.

use crate::error::AuditError;
use crate::model::AuditResult;
use chrono::Utc;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tracing::debug;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN_LEFT: f32 = 30.0;
const MARGIN_RIGHT: f32 = 30.0;
const MARGIN_TOP: f32 = 30.0;
const MARGIN_BOTTOM: f32 = 18.0;
const FONT_SIZE: f32 = 10.0;
const LEADING: f32 = 14.0;

/// Helvetica advance widths (1/1000 em) for ASCII 32..=126.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0-9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A-M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N-Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a-m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n-z
    334, 260, 334, 584, // {..~
];

/// Helvetica advance widths for WinAnsi 0x80..=0xFF. Unassigned codes use 556.
const HELVETICA_WIDTHS_HIGH: [u16; 128] = [
    556, 556, 222, 556, 333, 1000, 556, 556, 333, 1000, 667, 333, 1000, 556, 611, 556, // 0x80
    556, 222, 222, 333, 333, 350, 556, 1000, 333, 1000, 500, 333, 944, 556, 500, 667, // 0x90
    278, 333, 556, 556, 556, 556, 260, 556, 333, 737, 370, 556, 584, 333, 737, 333, // 0xA0
    400, 584, 333, 333, 333, 556, 537, 278, 333, 333, 365, 556, 834, 834, 834, 611, // 0xB0
    667, 667, 667, 667, 667, 667, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278, // 0xC0
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611, // 0xD0
    556, 556, 556, 556, 556, 556, 889, 500, 556, 556, 556, 556, 278, 278, 278, 278, // 0xE0
    556, 556, 556, 556, 556, 556, 556, 584, 611, 556, 556, 556, 556, 500, 556, 500, // 0xF0
];

/// Render `result` as a PDF document. Always produces at least one page.
pub fn render_report(result: &AuditResult) -> Result<Vec<u8>, AuditError> {
    let column_width = PAGE_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let lines: Vec<Vec<u8>> = result
        .as_str()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .flat_map(|l| wrap_line(&encode_winansi(l), column_width))
        .collect();

    let pages: Vec<&[Vec<u8>]> = if lines.is_empty() {
        vec![lines.as_slice()]
    } else {
        lines.chunks(lines_per_page()).collect()
    };
    debug!("Report: {} line(s) over {} page(s)", lines.len(), pages.len());

    build_pdf(&pages).map_err(|e| AuditError::RenderFailed {
        artifact: "PDF report",
        detail: e.to_string(),
    })
}

fn lines_per_page() -> usize {
    let first_baseline = PAGE_HEIGHT - MARGIN_TOP - FONT_SIZE;
    ((first_baseline - MARGIN_BOTTOM) / LEADING).floor() as usize + 1
}

fn build_pdf(pages: &[&[Vec<u8>]]) -> Result<Vec<u8>, lopdf::Error> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for lines in pages {
        let content = Content {
            operations: page_operations(lines),
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::from(page_id));
    }

    let count = kids.len() as i64;
    let media_box: Vec<Object> = vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()];
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => media_box,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal("PayShield Audit Report"),
        "Producer" => Object::string_literal(concat!("payshield ", env!("CARGO_PKG_VERSION"))),
        "CreationDate" => Object::string_literal(Utc::now().format("D:%Y%m%d%H%M%SZ").to_string()),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

fn page_operations(lines: &[Vec<u8>]) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]),
        Operation::new("TL", vec![LEADING.into()]),
        Operation::new(
            "Td",
            vec![MARGIN_LEFT.into(), (PAGE_HEIGHT - MARGIN_TOP - FONT_SIZE).into()],
        ),
    ];
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            ops.push(Operation::new("T*", vec![]));
        }
        ops.push(Operation::new(
            "Tj",
            vec![Object::string_literal(line.clone())],
        ));
    }
    ops.push(Operation::new("ET", vec![]));
    ops
}

/// Encode text as WinAnsi bytes for the `Tj` operator.
fn encode_winansi(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ' '..='~' => out.push(c as u8),
            '\t' | '\u{2007}' | '\u{202F}' => out.push(b' '),
            '\u{200B}' | '\u{FEFF}' | '\u{00AD}' => {}
            '\u{00A0}'..='\u{00FF}' => out.push(c as u32 as u8),
            _ => match winansi_special(c) {
                Some(b) => out.push(b),
                None => out.extend_from_slice(spell_out(c).as_bytes()),
            },
        }
    }
    out
}

/// Code points WinAnsi places in 0x80..=0x9F.
fn winansi_special(c: char) -> Option<u8> {
    let b = match c {
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(b)
}

fn spell_out(c: char) -> &'static str {
    match c {
        '≤' => "<=",
        '≥' => ">=",
        '≠' => "!=",
        '−' | '‐' => "-",
        '′' => "'",
        '″' => "\"",
        '✓' | '✔' => "[x]",
        '✗' | '✘' | '❌' => "[ ]",
        _ => "?",
    }
}

fn glyph_width(b: u8) -> u16 {
    match b {
        32..=126 => HELVETICA_WIDTHS[(b - 32) as usize],
        128..=255 => HELVETICA_WIDTHS_HIGH[(b - 128) as usize],
        _ => 556,
    }
}

fn text_width(text: &[u8]) -> f32 {
    text.iter().map(|&b| glyph_width(b) as f32).sum::<f32>() * FONT_SIZE / 1000.0
}

/// Greedy word wrap on spaces; words wider than the column are split.
fn wrap_line(text: &[u8], max_width: f32) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    let mut current: Vec<u8> = Vec::new();

    for word in text.split(|&b| b == b' ').filter(|w| !w.is_empty()) {
        let extra = if current.is_empty() { 0.0 } else { text_width(b" ") };
        if text_width(&current) + extra + text_width(word) <= max_width {
            if !current.is_empty() {
                current.push(b' ');
            }
            current.extend_from_slice(word);
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if text_width(word) <= max_width {
            current.extend_from_slice(word);
            continue;
        }
        for &b in word {
            let next = text_width(&current) + text_width(&[b]);
            if !current.is_empty() && next > max_width {
                lines.push(std::mem::take(&mut current));
            }
            current.push(b);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_count(pdf: &[u8]) -> usize {
        Document::load_mem(pdf).unwrap().get_pages().len()
    }

    #[test]
    fn produces_a_valid_pdf() {
        let pdf = render_report(&AuditResult::new("| Role | Rate |\n| Engineer | 50 |\n\nSummary")).unwrap();
        assert!(pdf.starts_with(b"%PDF-1.5"));
        assert_eq!(page_count(&pdf), 1);
    }

    #[test]
    fn empty_answer_still_has_one_page() {
        let pdf = render_report(&AuditResult::new("   \n\n")).unwrap();
        assert_eq!(page_count(&pdf), 1);
    }

    #[test]
    fn long_answer_paginates() {
        let text = (0..150).map(|i| format!("Finding {i}")).collect::<Vec<_>>().join("\n");
        let pdf = render_report(&AuditResult::new(text)).unwrap();
        let expected = 150usize.div_ceil(lines_per_page());
        assert!(expected > 1);
        assert_eq!(page_count(&pdf), expected);
    }

    #[test]
    fn lines_per_page_fits_a4() {
        // 802 pt first baseline, 18 pt bottom margin, 14 pt leading.
        assert_eq!(lines_per_page(), 57);
    }

    fn drawn_bytes(pdf: &[u8]) -> Vec<u8> {
        let doc = Document::load_mem(pdf).unwrap();
        let mut drawn = Vec::new();
        for page_id in doc.get_pages().values() {
            let content = Content::decode(&doc.get_page_content(*page_id).unwrap()).unwrap();
            for op in content.operations.iter().filter(|op| op.operator == "Tj") {
                drawn.extend_from_slice(op.operands[0].as_str().unwrap());
                drawn.push(b'\n');
            }
        }
        drawn
    }

    fn contains(hay: &[u8], needle: &[u8]) -> bool {
        hay.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn markup_is_printed_verbatim() {
        let text = "<b>Non-Compliant</b> (rate <i>exceeds</i> PO)";
        let ops = page_operations(&wrap_line(&encode_winansi(text), 535.0));
        let drawn: Vec<u8> = ops
            .iter()
            .filter(|op| op.operator == "Tj")
            .flat_map(|op| op.operands[0].as_str().unwrap().to_vec())
            .collect();
        assert_eq!(String::from_utf8(drawn).unwrap(), text);
    }

    #[test]
    fn latin1_text_reaches_the_page() {
        let pdf = render_report(&AuditResult::new("Supplier: Société Müller\nRoom at 40° for ½ shift")).unwrap();
        let drawn = drawn_bytes(&pdf);
        assert!(contains(&drawn, b"Soci\xE9t\xE9 M\xFCller"));
        assert!(contains(&drawn, b"40\xB0 for \xBD shift"));
        assert!(!drawn.contains(&b'?'));
    }

    #[test]
    fn winansi_encoding() {
        assert_eq!(encode_winansi("café ñ §"), b"caf\xE9 \xF1 \xA7".to_vec());
        assert_eq!(
            encode_winansi("€5 – “ok” • 3× …™"),
            b"\x805 \x96 \x93ok\x94 \x95 3\xD7 \x85\x99".to_vec()
        );
        assert_eq!(encode_winansi("hours ≤ 8, ≥ 4 ✓"), b"hours <= 8, >= 4 [x]".to_vec());
        assert_eq!(encode_winansi("✅ 漢"), b"? ?".to_vec());
        assert_eq!(encode_winansi("a\u{200B}b\tc"), b"ab c".to_vec());
    }

    #[test]
    fn high_glyphs_have_real_widths() {
        assert_eq!(glyph_width(b'e'), 556);
        assert_eq!(glyph_width(0xE9), 556); // é
        assert_eq!(glyph_width(0x97), 1000); // em dash
        assert_eq!(glyph_width(0xC6), 1000); // Æ
        assert_eq!(glyph_width(0xB0), 400); // degree
    }

    #[test]
    fn wrap_respects_column_width() {
        let text = encode_winansi(&"Follow up with the supplier for clarification ".repeat(20));
        let lines = wrap_line(&text, 535.0);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| text_width(l) <= 535.0));
        assert_eq!(lines.join(&b' '), text.trim_ascii_end());
    }

    #[test]
    fn overlong_word_is_hard_split() {
        let word = vec![b'W'; 200];
        let lines = wrap_line(&word, 100.0);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| text_width(l) <= 100.0));
        assert_eq!(lines.concat(), word);
    }
}
