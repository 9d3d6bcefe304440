// ============================================================
// Layer 4 — Charset (text ⇄ class indices)
// ============================================================
// Maps transcriptions to the integer labels the CTC loss
// consumes, and maps decoded class paths back to text.
//
// Class layout of the network output (d_model classes):
//
//   0               padding (never a target; fills short labels)
//   1               unknown character
//   2 ..= n + 1     the n charset characters, in order
//   n + 2           CTC blank (always the LAST class)
//
// So d_model = n + 3 and every real label index is ≥ 1.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PAD_INDEX: usize = 0;
pub const UNK_INDEX: usize = 1;
const FIRST_CHAR_INDEX: usize = 2;

const DIGITS: &str = "0123456789";
const LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const PUNCTUATION: &str = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;

/// Character vocabulary of the recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Charset {
    chars: Vec<char>,
    index: HashMap<char, usize>,
}

impl Charset {
    /// Build a charset from the characters of `chars`.
    /// Duplicates are dropped, first occurrence wins.
    pub fn new(chars: &str) -> Self {
        let mut list  = Vec::new();
        let mut index = HashMap::new();
        for c in chars.chars() {
            if !index.contains_key(&c) {
                index.insert(c, FIRST_CHAR_INDEX + list.len());
                list.push(c);
            }
        }
        Self { chars: list, index }
    }

    /// The 95 printable ASCII characters: digits, letters,
    /// punctuation and the space.
    pub fn printable() -> Self {
        Self::new(&format!("{DIGITS}{LETTERS}{PUNCTUATION} "))
    }

    /// Number of characters (excluding pad / unk / blank).
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Output width of the network: characters + pad + unk + blank.
    pub fn num_classes(&self) -> usize {
        self.chars.len() + 3
    }

    pub fn blank_index(&self) -> usize {
        self.num_classes() - 1
    }

    pub fn as_string(&self) -> String {
        self.chars.iter().collect()
    }

    /// Class index of every character; unknown characters map to UNK_INDEX.
    pub fn encode(&self, text: &str) -> Vec<usize> {
        text.chars()
            .map(|c| self.index.get(&c).copied().unwrap_or(UNK_INDEX))
            .collect()
    }

    /// Encode and zero-pad (or truncate) to exactly `max_len` entries.
    pub fn encode_padded(&self, text: &str, max_len: usize) -> Vec<i64> {
        let mut ids: Vec<i64> = self.encode(text)
            .into_iter()
            .take(max_len)
            .map(|i| i as i64)
            .collect();
        ids.resize(max_len, PAD_INDEX as i64);
        ids
    }

    /// Map label indices back to text. Padding and blank are skipped,
    /// unknown becomes U+FFFD.
    pub fn decode(&self, indices: &[usize]) -> String {
        indices
            .iter()
            .filter_map(|&i| match i {
                PAD_INDEX => None,
                UNK_INDEX => Some(char::REPLACEMENT_CHARACTER),
                i if i == self.blank_index() => None,
                i => self.chars.get(i - FIRST_CHAR_INDEX).copied(),
            })
            .collect()
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::printable()
    }
}

impl From<String> for Charset {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<Charset> for String {
    fn from(c: Charset) -> Self {
        c.as_string()
    }
}
