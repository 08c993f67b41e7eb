// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! TXT record codec (RFC 6763 §6)
//!
//! A TXT record is a sequence of length-prefixed strings, each of the form
//! `key=value`. An entry without `=` is a boolean attribute whose value is
//! empty.

use crate::{Error, Result};

/// Maximum length of a single encoded entry (`name=value`), excluding the length byte
pub const MAX_TXT_ENTRY_LENGTH: usize = 255;

/// A single TXT key/value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxtEntry {
    /// Attribute name
    pub name: String,

    /// Attribute value, arbitrary bytes
    pub value: Vec<u8>,
}

impl TxtEntry {
    /// Create an entry from a name and a value
    ///
    /// # Example
    ///
    /// ```
    /// use otbr_mdns::TxtEntry;
    ///
    /// let entry = TxtEntry::new("rv", "1");
    /// assert_eq!(entry.value, b"1");
    /// ```
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    fn encoded_len(&self) -> usize {
        self.name.len() + 1 + self.value.len()
    }
}

/// An ordered list of TXT entries
pub type TxtList = Vec<TxtEntry>;

/// Encode a list of entries into TXT wire format.
///
/// Entries are emitted in the given order; sort them first with
/// [`sort_txt_list`] if a canonical form is needed. An empty list encodes as a
/// single zero-length string, the smallest legal TXT record.
///
/// # Errors
///
/// Returns [`Error::InvalidArgs`] if any entry is longer than
/// [`MAX_TXT_ENTRY_LENGTH`]. Nothing is returned in that case.
pub fn encode_txt_data(entries: &[TxtEntry]) -> Result<Vec<u8>> {
    if entries.is_empty() {
        return Ok(vec![0]);
    }

    let mut data = Vec::with_capacity(entries.iter().map(|e| e.encoded_len() + 1).sum());
    for entry in entries {
        let len = entry.encoded_len();
        if len > MAX_TXT_ENTRY_LENGTH {
            log::debug!("TXT entry {} is {len} bytes, too long", entry.name);
            return Err(Error::InvalidArgs);
        }

        // Checked above, fits in one byte.
        data.push(len as u8);
        data.extend_from_slice(entry.name.as_bytes());
        data.push(b'=');
        data.extend_from_slice(&entry.value);
    }

    Ok(data)
}

/// Decode TXT wire format into a list of entries.
///
/// Empty strings and strings with an empty key (leading `=`) are skipped.
///
/// # Errors
///
/// Returns [`Error::Parse`] if a length byte runs past the end of the buffer or
/// a key is not valid UTF-8.
pub fn decode_txt_data(data: &[u8]) -> Result<TxtList> {
    let mut entries = TxtList::new();
    let mut rest = data;

    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len);
        if len > tail.len() {
            return Err(Error::Parse);
        }

        let (entry, tail) = tail.split_at(len);
        rest = tail;

        let (name, value) = match entry.iter().position(|&b| b == b'=') {
            Some(pos) => (&entry[..pos], &entry[pos + 1..]),
            None => (entry, &[][..]),
        };
        if name.is_empty() {
            continue;
        }

        let name = core::str::from_utf8(name).map_err(|_| Error::Parse)?;
        entries.push(TxtEntry::new(name, value));
    }

    Ok(entries)
}

/// Sort entries by name, keeping the relative order of equal names.
pub fn sort_txt_list(entries: &mut TxtList) {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
}
