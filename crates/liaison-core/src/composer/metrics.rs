//! Standard Helvetica metrics for layout and WinAnsi text encoding

use crate::directory::normalize::fold_accents;
use encoding_rs::WINDOWS_1252;

/// Advance widths in 1/1000 em for ASCII 32..=126
#[rustfmt::skip]
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

const DEFAULT_WIDTH: u16 = 556;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    /// Name under the page's /Font resources
    pub fn resource_name(&self) -> &'static str {
        match self {
            Self::Regular => "F1",
            Self::Bold => "F2",
        }
    }

    pub fn base_font(&self) -> &'static str {
        match self {
            Self::Regular => "Helvetica",
            Self::Bold => "Helvetica-Bold",
        }
    }

    pub fn from_resource_name(name: &[u8]) -> Option<Self> {
        match name {
            b"F1" => Some(Self::Regular),
            b"F2" => Some(Self::Bold),
            _ => None,
        }
    }

    fn table(&self) -> &'static [u16; 95] {
        match self {
            Self::Regular => &HELVETICA,
            Self::Bold => &HELVETICA_BOLD,
        }
    }
}

/// Advance width of one character in 1/1000 em
pub fn char_width(font: Font, c: char) -> u16 {
    let ascii_width = |c: char| {
        let code = c as u32;
        (32..=126).contains(&code).then(|| font.table()[(code - 32) as usize])
    };

    if let Some(width) = ascii_width(c) {
        return width;
    }

    match c {
        '\u{a0}' => 278,
        '\u{2018}' | '\u{2019}' => 222,
        '\u{201c}' | '\u{201d}' => 333,
        '\u{2013}' => 556,
        '\u{2014}' => 1000,
        '\u{b0}' => 400,
        // Accented letters share the base letter's advance
        _ => fold_accents(&c.to_string())
            .chars()
            .next()
            .and_then(ascii_width)
            .unwrap_or(DEFAULT_WIDTH),
    }
}

/// Width of `text` in points at `size`
pub fn text_width(font: Font, text: &str, size: f32) -> f32 {
    let units: u32 = text.chars().map(|c| u32::from(char_width(font, c))).sum();
    units as f32 * size / 1000.0
}

/// Greedy word wrap. A single word wider than `max_width` gets its own line.
pub fn wrap_text(text: &str, font: Font, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }

        let candidate = format!("{} {}", current, word);
        if text_width(font, &candidate, size) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Encode for a WinAnsiEncoding font; characters outside Windows-1252
/// become `?`, control characters become spaces
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut buf = [0u8; 4];

    for c in text.chars() {
        if c.is_control() {
            out.push(b' ');
            continue;
        }
        let (bytes, _, had_errors) = WINDOWS_1252.encode(c.encode_utf8(&mut buf));
        if had_errors || bytes.len() != 1 {
            out.push(b'?');
        } else {
            out.push(bytes[0]);
        }
    }
    out
}

/// Inverse of [`encode_win_ansi`], used when measuring text read back from a PDF
pub fn decode_win_ansi(bytes: &[u8]) -> String {
    WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_widths() {
        assert_eq!(char_width(Font::Regular, ' '), 278);
        assert_eq!(char_width(Font::Regular, 'W'), 944);
        assert_eq!(char_width(Font::Bold, 'b'), 611);
        assert_eq!(char_width(Font::Regular, '~'), 584);
        // é measures like e
        assert_eq!(char_width(Font::Regular, 'é'), char_width(Font::Regular, 'e'));
        assert_eq!(char_width(Font::Regular, '\u{2019}'), 222);
    }

    #[test]
    fn test_text_width_scales_with_size() {
        let w10 = text_width(Font::Regular, "Matricule", 10.0);
        let w20 = text_width(Font::Regular, "Matricule", 20.0);
        assert!((w20 - 2.0 * w10).abs() < 1e-3);
        assert!(text_width(Font::Bold, "Matricule", 10.0) > w10);
    }

    #[test]
    fn test_wrap_text_respects_width() {
        let text = "La facture de l'hôpital est à régler totalement par la société émettrice de cette lettre";
        let lines = wrap_text(text, Font::Regular, 10.0, 150.0);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(text_width(Font::Regular, line, 10.0) <= 150.0);
        }
        assert_eq!(lines.join(" "), text);
    }

    #[test]
    fn test_wrap_text_empty_and_long_word() {
        assert_eq!(wrap_text("", Font::Regular, 10.0, 100.0), vec![String::new()]);
        let lines = wrap_text("a Pneumo-phtisiologie b", Font::Regular, 10.0, 20.0);
        assert_eq!(lines, vec!["a", "Pneumo-phtisiologie", "b"]);
    }

    #[test]
    fn test_win_ansi_round_trip_and_replacement() {
        let encoded = encode_win_ansi("Hôpital d\u{2019}Été");
        assert_eq!(encoded.len(), 13);
        assert_eq!(decode_win_ansi(&encoded), "Hôpital d\u{2019}Été");
        assert_eq!(encode_win_ansi("Ω\t"), b"? ".to_vec());
    }
}
