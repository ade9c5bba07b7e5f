//! 检索分词
//!
//! 含 CJK 字符的文本交给 jieba（搜索引擎模式）；其余按非字母数字切分、转小写。
//! 单字符词与常见停用词（英 / 葡）不参与打分。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

const STOPWORDS: &[&str] = &[
    // en
    "the", "and", "for", "with", "to", "of", "in", "on", "at", "an", "is", "are", "be", "by",
    "from", "this", "that", "it", "my", "me", "please", "can", "you", "your", "our",
    // pt
    "de", "da", "do", "das", "dos", "para", "com", "um", "uma", "os", "as", "no", "na", "em",
    "por", "que", "se", "meu", "minha",
];

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}' |
        '\u{3040}'..='\u{309F}' |
        '\u{30A0}'..='\u{30FF}'
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn keep(token: &str) -> bool {
    let first_cjk = token.chars().next().map(is_cjk).unwrap_or(false);
    (first_cjk || token.chars().count() > 1) && !STOPWORDS.contains(&token)
}

/// 分词，保留顺序与重复
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if contains_cjk(text) {
        jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| s.chars().any(char::is_alphanumeric))
            .filter(|s| keep(s))
            .collect()
    } else {
        text.split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .filter(|s| keep(s))
            .collect()
    }
}

/// 去重后的词集合
pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// 交集大小
pub fn overlap_score(a: &HashSet<String>, b: &HashSet<String>) -> usize {
    a.intersection(b).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_english_strips_punctuation_and_stopwords() {
        let tokens = tokenize("Pay the invoice, from Amazon!");
        assert_eq!(tokens, vec!["pay", "invoice", "amazon"]);
    }

    #[test]
    fn test_tokenize_portuguese() {
        let tokens = tokenize_to_set("Agendar reunião para segunda-feira");
        assert!(tokens.contains("agendar"));
        assert!(tokens.contains("reunião"));
        assert!(tokens.contains("segunda"));
        assert!(!tokens.contains("para"));
    }

    #[test]
    fn test_tokenize_chinese() {
        let tokens = tokenize("请帮我支付发票");
        assert!(!tokens.is_empty());
        assert!(tokens.iter().any(|t| t.contains("发票") || t.contains("支付")));
    }

    #[test]
    fn test_contains_cjk() {
        assert!(contains_cjk("Hello 世界"));
        assert!(!contains_cjk("Hello World"));
    }

    #[test]
    fn test_overlap_score() {
        let a = tokenize_to_set("invoice from Amazon");
        let b = tokenize_to_set("Amazon invoice overdue");
        assert_eq!(overlap_score(&a, &b), 2);
        assert_eq!(overlap_score(&a, &HashSet::new()), 0);
    }

    #[test]
    fn test_empty() {
        assert!(tokenize("   ").is_empty());
    }
}
