//! Query-side text preparation for the FTS index.
//!
//! The index tokenizer (unicode61, diacritics preserved) groups consecutive
//! CJK ideographs into a single token, so queries split CJK runs into
//! per-character prefix terms while latin/digit sequences stay intact.

/// Letter-class CJK codepoints; punctuation and fullwidth symbols excluded.
#[inline]
pub fn is_cjk_letter(c: char) -> bool {
    let code = c as u32;
    (0x4E00..=0x9FFF).contains(&code)       // CJK Unified Ideographs
        || (0x3400..=0x4DBF).contains(&code)   // Extension A
        || (0x20000..=0x2A6DF).contains(&code) // Extension B
        || (0x2A700..=0x2B73F).contains(&code) // Extension C
        || (0x2B740..=0x2B81F).contains(&code) // Extension D
        || (0x2B820..=0x2CEAF).contains(&code) // Extension E
        || (0x3040..=0x309F).contains(&code)   // Hiragana
        || (0x30A0..=0x30FF).contains(&code)   // Katakana
        || (0xAC00..=0xD7AF).contains(&code) // Hangul Syllables
}

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || is_cjk_letter(c)
}

/// Normalize free text: separators collapse to single spaces, ASCII is
/// case-folded. Underscores are kept so snake_case terms survive.
pub fn normalize_query(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = true;

    for c in text.chars() {
        if is_token_char(c) {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            prev_space = false;
        } else if !prev_space {
            out.push(' ');
            prev_space = true;
        }
    }

    out.trim_end().to_string()
}

/// Tokenize text for the FTS index by inserting spaces between CJK letters
/// while keeping latin/digit sequences intact.
///
/// `"Hello世界"` becomes `"hello 世 界"`.
pub fn tokenize_for_fts(text: &str) -> String {
    let normalized = normalize_query(text);
    if normalized.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(normalized.len() * 2);
    let mut prev_space = true;

    for c in normalized.chars() {
        if c == ' ' {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else if is_cjk_letter(c) {
            if !prev_space {
                out.push(' ');
            }
            out.push(c);
            out.push(' ');
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }

    out.trim().to_string()
}

/// Build a safe FTS5 MATCH expression from free text.
///
/// Double-quoted spans become phrase matches; everything else becomes a
/// disjunction of quoted prefix terms, so MATCH syntax in user input cannot
/// break the query.
pub fn build_match_query(user_query: &str) -> String {
    let trimmed = user_query.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut units: Vec<String> = Vec::new();

    for (i, segment) in trimmed.split('"').enumerate() {
        let tokenized = tokenize_for_fts(segment);
        if tokenized.is_empty() {
            continue;
        }
        if i % 2 == 1 {
            // Inside quotes: one phrase unit.
            units.push(format!("\"{tokenized}\""));
        } else {
            for token in tokenized.split(' ') {
                units.push(format!("\"{token}\"*"));
            }
        }
    }

    units.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_and_separators() {
        assert_eq!(normalize_query("Hello,  World!"), "hello world");
        assert_eq!(normalize_query("EIP-1559升级"), "eip 1559升级");
    }

    #[test]
    fn normalize_keeps_snake_case() {
        assert_eq!(normalize_query("my_var name"), "my_var name");
    }

    #[test]
    fn cjk_letters_become_single_tokens() {
        assert_eq!(tokenize_for_fts("链表是空节点"), "链 表 是 空 节 点");
        assert_eq!(tokenize_for_fts("Hello世界"), "hello 世 界");
        assert_eq!(tokenize_for_fts("0xabc123转账"), "0xabc123 转 账");
    }

    #[test]
    fn diacritics_are_preserved() {
        assert_eq!(tokenize_for_fts("Café au lait"), "café au lait");
    }

    #[test]
    fn match_query_is_a_disjunction_of_prefix_terms() {
        assert_eq!(
            build_match_query("deadlock java"),
            "\"deadlock\"* OR \"java\"*"
        );
    }

    #[test]
    fn quoted_phrases_become_phrase_matches() {
        assert_eq!(
            build_match_query("\"linked list\" pointers"),
            "\"linked list\" OR \"pointers\"*"
        );
    }

    #[test]
    fn match_syntax_in_input_is_neutralized() {
        let q = build_match_query("NEAR(a AND b) OR *");
        assert!(!q.contains("NEAR("));
        assert_eq!(q, "\"near\"* OR \"a\"* OR \"and\"* OR \"b\"* OR \"or\"*");
    }

    #[test]
    fn empty_input_yields_empty_query() {
        assert_eq!(build_match_query("   "), "");
        assert_eq!(build_match_query("!!!"), "");
    }
}
