// =============================================================================
// Recommendation parsing — best-effort extraction from analyst prose
// =============================================================================
//
// The analyst is asked for five labelled sections but answers in free text,
// so every field here is optional and extraction never fails.
// =============================================================================

use serde::Serialize;

/// Section labels, in the order the prompt asks for them.
pub const SECTION_LABELS: [&str; 5] = [
    "OPTION TYPE",
    "STRIKE PRICE",
    "ENTRY PRICE",
    "EXIT STRATEGY",
    "RATIONALE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    /// First standalone "long" or "short" in the text.
    pub direction: Option<Direction>,
    /// Every `$123` / `$123.45` mention, in order.
    pub prices: Vec<String>,
    /// Every `12%` / `12.5%` mention, in order.
    pub percentages: Vec<String>,
    pub option_type: Option<String>,
    pub strike_price: Option<String>,
    pub entry_price: Option<String>,
    pub exit_strategy: Option<String>,
    pub rationale: Option<String>,
}

impl Recommendation {
    pub fn parse(text: &str) -> Self {
        let mut sections = extract_sections(text).into_iter();
        let mut next = || sections.next().flatten();
        Self {
            direction: find_direction(text),
            prices: scan_numbers(text, Some(b'$'), None),
            percentages: scan_numbers(text, None, Some(b'%')),
            option_type: next(),
            strike_price: next(),
            entry_price: next(),
            exit_strategy: next(),
            rationale: next(),
        }
    }
}

fn find_direction(text: &str) -> Option<Direction> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .find_map(|word| {
            if word.eq_ignore_ascii_case("long") {
                Some(Direction::Long)
            } else if word.eq_ignore_ascii_case("short") {
                Some(Direction::Short)
            } else {
                None
            }
        })
}

/// Scan for `[prefix]<digits>[.<digits>][suffix]`, leftmost first, without
/// overlapping matches.
fn scan_numbers(text: &str, prefix: Option<u8>, suffix: Option<u8>) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match match_number(bytes, i, prefix, suffix) {
            Some(end) => {
                found.push(text[i..end].to_string());
                i = end;
            }
            None => i += 1,
        }
    }
    found
}

fn match_number(bytes: &[u8], start: usize, prefix: Option<u8>, suffix: Option<u8>) -> Option<usize> {
    let mut pos = start;
    if let Some(p) = prefix {
        if bytes.get(pos) != Some(&p) {
            return None;
        }
        pos += 1;
    }

    let int_end = digits_end(bytes, pos);
    if int_end == pos {
        return None;
    }
    pos = int_end;

    if bytes.get(pos) == Some(&b'.') {
        let frac_end = digits_end(bytes, pos + 1);
        if frac_end > pos + 1 {
            pos = frac_end;
        }
    }

    if let Some(s) = suffix {
        if bytes.get(pos) != Some(&s) {
            return None;
        }
        pos += 1;
    }
    Some(pos)
}

fn digits_end(bytes: &[u8], from: usize) -> usize {
    let mut end = from;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    end
}

/// Body of each labelled section, indexed like `SECTION_LABELS`.
fn extract_sections(text: &str) -> [Option<String>; 5] {
    // ASCII uppercasing keeps byte offsets aligned with `text`.
    let upper = text.to_ascii_uppercase();

    let mut hits: Vec<(usize, usize, usize)> = SECTION_LABELS
        .iter()
        .enumerate()
        .filter_map(|(idx, label)| upper.find(label).map(|at| (at, at + label.len(), idx)))
        .collect();
    hits.sort_unstable();

    let mut out: [Option<String>; 5] = Default::default();
    for (n, &(_, body_start, idx)) in hits.iter().enumerate() {
        let body_end = hits.get(n + 1).map(|h| h.0).unwrap_or(text.len());
        if body_end <= body_start {
            continue;
        }
        let body = clean_section(&text[body_start..body_end]);
        if !body.is_empty() {
            out[idx] = Some(body.to_string());
        }
    }
    out
}

fn clean_section(raw: &str) -> &str {
    let trimmed = raw
        .trim_start_matches(|c: char| c == ':' || c == '*' || c == '#' || c == '-' || c.is_whitespace())
        .trim_end_matches(|c: char| c == '*' || c == '#' || c.is_whitespace());

    // Drop the list number that introduces the next section ("...\n\n2.").
    let without_marker = match trimmed.strip_suffix('.') {
        Some(head) => {
            let stripped = head.trim_end_matches(|c: char| c.is_ascii_digit());
            if stripped.len() < head.len()
                && (stripped.is_empty() || stripped.ends_with(char::is_whitespace))
            {
                stripped
            } else {
                trimmed
            }
        }
        None => trimmed,
    };
    without_marker.trim_end_matches(|c: char| c == '*' || c == '#' || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1. **OPTION TYPE**: Call. The trend is long biased.\n\n\
        2. **STRIKE PRICE**: $185 strike.\n\n\
        3. **ENTRY PRICE**: Enter between $2.10 and $2.35.\n\n\
        4. **EXIT STRATEGY**: Take profit at 50% gain, stop at 25.5% loss.\n\n\
        5. **RATIONALE**: Breakout above resistance with rising volume.";

    #[test]
    fn extracts_direction_prices_and_percentages() {
        let rec = Recommendation::parse(SAMPLE);
        assert_eq!(rec.direction, Some(Direction::Long));
        assert_eq!(rec.prices, vec!["$185", "$2.10", "$2.35"]);
        assert_eq!(rec.percentages, vec!["50%", "25.5%"]);
    }

    #[test]
    fn extracts_sections() {
        let rec = Recommendation::parse(SAMPLE);
        assert_eq!(
            rec.option_type.as_deref(),
            Some("Call. The trend is long biased.")
        );
        assert_eq!(rec.strike_price.as_deref(), Some("$185 strike."));
        assert_eq!(rec.entry_price.as_deref(), Some("Enter between $2.10 and $2.35."));
        assert_eq!(
            rec.exit_strategy.as_deref(),
            Some("Take profit at 50% gain, stop at 25.5% loss.")
        );
        assert_eq!(
            rec.rationale.as_deref(),
            Some("Breakout above resistance with rising volume.")
        );
    }

    #[test]
    fn direction_needs_a_whole_word() {
        assert_eq!(find_direction("longer shortfall"), None);
        assert_eq!(find_direction("Go SHORT here, not long"), Some(Direction::Short));
    }

    #[test]
    fn number_scanning_edge_cases() {
        assert_eq!(scan_numbers("$ 5 and $7. and $8.x", Some(b'$'), None), vec!["$7", "$8"]);
        assert_eq!(scan_numbers("1.2.3% and 40 %", None, Some(b'%')), vec!["2.3%"]);
    }

    #[test]
    fn free_text_yields_empty_fields() {
        let rec = Recommendation::parse("No clear setup today.");
        assert_eq!(rec, Recommendation::default());
    }
}
