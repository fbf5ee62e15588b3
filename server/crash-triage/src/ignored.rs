//! Parser for the ignored-signature list: `'a', 'b', "c"` with tolerant quoting.
//!
//! Entries are comma separated and optionally quoted with `'` or `"`. A quote only
//! closes an entry when followed by optional whitespace and then a comma or the end
//! of input, so signatures may carry embedded quote characters (`'b'c''` -> `b'c'`).

use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;

pub fn parse(input: &str) -> BTreeSet<String> {
  let chars: Vec<char> = input.chars().collect();
  let mut out = BTreeSet::new();
  let mut i = 0;

  while i < chars.len() {
    while i < chars.len() && chars[i].is_whitespace() {
      i += 1;
    }
    if i >= chars.len() {
      break;
    }

    let entry: String = if chars[i] == '\'' || chars[i] == '"' {
      let quote = chars[i];
      let start = i + 1;
      let close = (start..chars.len()).find(|&j| chars[j] == quote && closes_entry(&chars, j + 1));
      match close {
        Some(end) => {
          i = end + 1;
          chars[start..end].iter().collect()
        }
        None => {
          // Unterminated quote: the rest of the input is the entry.
          i = chars.len();
          chars[start..].iter().collect::<String>().trim_end().to_string()
        }
      }
    } else {
      let start = i;
      while i < chars.len() && chars[i] != ',' {
        i += 1;
      }
      chars[start..i].iter().collect::<String>().trim().to_string()
    };

    // Skip to the separator.
    while i < chars.len() && chars[i] != ',' {
      i += 1;
    }
    i += 1;

    if !entry.trim().is_empty() {
      out.insert(entry);
    }
  }

  out
}

fn closes_entry(chars: &[char], from: usize) -> bool {
  let mut k = from;
  while k < chars.len() && chars[k].is_whitespace() {
    k += 1;
  }
  k == chars.len() || chars[k] == ','
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIgnored {
  Quoted(String),
  Items(Vec<String>),
}

/// Serde adapter: accepts the quoted-list string or a plain array of signatures.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeSet<String>, D::Error> {
  Ok(match RawIgnored::deserialize(deserializer)? {
    RawIgnored::Quoted(raw) => parse(&raw),
    RawIgnored::Items(items) => items
      .into_iter()
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty())
      .collect(),
  })
}
