//! Text preparation ahead of embedding.
//!
//! Input text is whitespace-normalized and then segmented into words before
//! it reaches the sentence-embedding model. For syllable-spaced languages
//! such as Vietnamese a word is often several space-separated syllables;
//! the segmenter joins those with `_` ("đại học" becomes "đại_học"), which is
//! the form the embedding models for these languages were trained on.

use crate::vector::VectorError;
use std::collections::HashSet;
use std::path::Path;

/// Multi-syllable words recognised without any extra dictionary.
const BUILTIN_COMPOUNDS: &[&str] = &[
    "bài tập",
    "bảo lưu",
    "bằng cấp",
    "bằng tốt nghiệp",
    "cao học",
    "chương trình",
    "chương trình đào tạo",
    "chuẩn đầu ra",
    "chứng chỉ",
    "cơ sở",
    "cố vấn học tập",
    "công nghệ thông tin",
    "đại học",
    "đăng ký",
    "đào tạo",
    "điểm danh",
    "điểm rèn luyện",
    "điểm trung bình",
    "điều kiện",
    "đồ án",
    "giảng viên",
    "giáo trình",
    "hạn chót",
    "học bổng",
    "học kỳ",
    "học phần",
    "học phí",
    "học vụ",
    "hồ sơ",
    "khen thưởng",
    "khóa luận",
    "kiểm tra",
    "kỷ luật",
    "ký túc xá",
    "lịch thi",
    "luận văn",
    "miễn giảm",
    "nghiên cứu",
    "ngoại ngữ",
    "nhà trường",
    "phòng đào tạo",
    "quy chế",
    "quy định",
    "sinh viên",
    "sinh hoạt",
    "thạc sĩ",
    "thi lại",
    "thông báo",
    "thời gian",
    "thời khóa biểu",
    "thực tập",
    "tiến sĩ",
    "tín chỉ",
    "tốt nghiệp",
    "trường đại học",
    "tuyển sinh",
    "văn bằng",
    "xét tuyển",
];

/// Collapses every run of whitespace to one space and trims both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word segmenter applied to normalized text.
pub trait Segmenter: Send + Sync {
    /// Returns the segmented form of already-normalized text.
    fn segment(&self, text: &str) -> String;
}

/// Greedy longest-match segmenter over a dictionary of compound words.
#[derive(Debug, Clone)]
pub struct DictionarySegmenter {
    compounds: HashSet<String>,
    max_len: usize,
}

impl Default for DictionarySegmenter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl DictionarySegmenter {
    /// Creates a segmenter seeded with the built-in compound list.
    pub fn new(max_len: usize) -> Self {
        let mut segmenter = Self {
            compounds: HashSet::new(),
            max_len: max_len.max(2),
        };
        segmenter.extend(BUILTIN_COMPOUNDS.iter().copied());
        segmenter
    }

    /// Creates a segmenter with no compounds at all; it only normalizes.
    pub fn empty() -> Self {
        Self {
            compounds: HashSet::new(),
            max_len: 2,
        }
    }

    /// Adds compounds; blank lines and `#` comments are ignored.
    pub fn extend<'a>(&mut self, words: impl IntoIterator<Item = &'a str>) {
        for word in words {
            let word = word.trim();
            if word.is_empty() || word.starts_with('#') {
                continue;
            }
            let key = normalize_whitespace(&word.replace('_', " ")).to_lowercase();
            let syllables = key.split(' ').count();
            if syllables < 2 {
                continue;
            }
            self.max_len = self.max_len.max(syllables);
            self.compounds.insert(key);
        }
    }

    /// Loads extra compounds from a file with one compound per line.
    pub fn with_dictionary_file(mut self, path: &Path) -> Result<Self, VectorError> {
        let content = std::fs::read_to_string(path)?;
        self.extend(content.lines());
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.compounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty()
    }

    /// Finds the longest compound starting at `start`, returning its length.
    fn longest_match(&self, tokens: &[&str], start: usize) -> Option<usize> {
        let upper = self.max_len.min(tokens.len() - start);
        (2..=upper).rev().find(|&len| {
            let window = &tokens[start..start + len];
            window_is_joinable(window) && self.compounds.contains(&window_key(window))
        })
    }
}

impl Segmenter for DictionarySegmenter {
    fn segment(&self, text: &str) -> String {
        let tokens: Vec<&str> = text.split(' ').filter(|t| !t.is_empty()).collect();
        let mut words: Vec<String> = Vec::with_capacity(tokens.len());

        let mut i = 0;
        while i < tokens.len() {
            match self.longest_match(&tokens, i) {
                Some(len) => {
                    words.push(tokens[i..i + len].join("_"));
                    i += len;
                }
                None => {
                    words.push(tokens[i].to_string());
                    i += 1;
                }
            }
        }

        words.join(" ")
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

/// Punctuation may open the first syllable and close the last one, nothing else.
fn window_is_joinable(window: &[&str]) -> bool {
    let last = window.len() - 1;
    window.iter().enumerate().all(|(idx, token)| {
        let core = token.trim_matches(|c: char| !is_word_char(c));
        if core.is_empty() || !core.chars().all(is_word_char) {
            return false;
        }
        let leading_ok = idx == 0 || token.starts_with(is_word_char);
        let trailing_ok = idx == last || token.ends_with(is_word_char);
        leading_ok && trailing_ok
    })
}

fn window_key(window: &[&str]) -> String {
    window
        .iter()
        .map(|token| token.trim_matches(|c: char| !is_word_char(c)).to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
