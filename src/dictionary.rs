//! Bidirectional value-to-dense-index mapping
//!
//! A `Dictionary` grows while a training set is encoded, then is frozen so
//! prediction-time lookups can be shared across threads without locking.

use crate::core::{Result, TrainError};
use std::collections::HashMap;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Maps values to dense non-negative integers, preserving insertion order
/// for indices. Lookups of unseen items allocate the next index unless the
/// dictionary is frozen, in which case they report `None`.
#[derive(Debug, Clone, Default)]
pub struct Dictionary<T> {
    by_element: HashMap<T, usize>,
    elements: Vec<T>,
    frozen: bool,
}

impl<T: Eq + Hash + Clone> Dictionary<T> {
    pub fn new() -> Self {
        Self {
            by_element: HashMap::new(),
            elements: Vec::new(),
            frozen: false,
        }
    }

    /// Index of `item`, allocating the next integer for unseen items when
    /// the dictionary is mutable. Frozen dictionaries report unseen items
    /// as `None` instead of failing.
    pub fn index_for(&mut self, item: &T) -> Option<usize> {
        if let Some(&idx) = self.by_element.get(item) {
            return Some(idx);
        }
        if self.frozen {
            return None;
        }
        let idx = self.elements.len();
        self.elements.push(item.clone());
        self.by_element.insert(item.clone(), idx);
        Some(idx)
    }

    /// Read-only lookup, never grows
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.by_element.get(item).copied()
    }

    /// Reverse lookup. An out-of-range index is an error, distinguishable
    /// from an unseen item.
    pub fn element_for(&self, index: usize) -> Result<&T> {
        self.elements.get(index).ok_or(TrainError::IndexOutOfRange {
            index,
            len: self.elements.len(),
        })
    }

    /// Mark the dictionary frozen: lookups stop allocating indices
    pub fn freeze(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements in index order
    pub fn elements(&self) -> &[T] {
        &self.elements
    }
}

impl Dictionary<String> {
    /// Write in text format: one element per line, index implied by the
    /// line number. Elements must not contain line breaks.
    pub fn write_text<W: Write>(&self, mut writer: W) -> Result<()> {
        for element in &self.elements {
            writeln!(writer, "{element}")?;
        }
        Ok(())
    }

    /// Read the text format produced by [`write_text`](Self::write_text).
    /// The result is mutable; call [`freeze`](Self::freeze) before sharing.
    pub fn read_text<R: BufRead>(reader: R) -> Result<Self> {
        let mut dict = Dictionary::new();
        for line in reader.lines() {
            let line = line?;
            dict.index_for(&line);
        }
        Ok(dict)
    }

    /// Write in length-prefixed binary record format: u64 element count,
    /// then per element a u32 byte length and the UTF-8 bytes.
    pub fn write_binary<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&(self.elements.len() as u64).to_le_bytes())?;
        for element in &self.elements {
            let bytes = element.as_bytes();
            writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
            writer.write_all(bytes)?;
        }
        Ok(())
    }

    /// Read the binary record format
    pub fn read_binary<R: Read>(mut reader: R) -> Result<Self> {
        let mut count_buf = [0u8; 8];
        reader.read_exact(&mut count_buf)?;
        let count = u64::from_le_bytes(count_buf);

        let mut dict = Dictionary::new();
        for _ in 0..count {
            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf)?;
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut bytes = vec![0u8; len];
            reader.read_exact(&mut bytes)?;
            let element = String::from_utf8(bytes)
                .map_err(|e| TrainError::Parse(format!("invalid dictionary entry: {e}")))?;
            dict.index_for(&element);
        }
        Ok(dict)
    }

    /// Save to a file, choosing the format from the file name: a `bin`
    /// extension selects the binary record format, anything else the
    /// line-oriented text format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        if is_binary_name(path) {
            self.write_binary(&mut writer)?;
        } else {
            self.write_text(&mut writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load from a file, choosing the format as in [`save`](Self::save)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        if is_binary_name(path) {
            Self::read_binary(reader)
        } else {
            Self::read_text(reader)
        }
    }
}

fn is_binary_name(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "bin")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_grows_with_insertion_order() {
        let mut dict = Dictionary::new();
        assert_eq!(dict.index_for(&"a".to_string()), Some(0));
        assert_eq!(dict.index_for(&"b".to_string()), Some(1));
        assert_eq!(dict.index_for(&"a".to_string()), Some(0));
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.element_for(1).unwrap(), "b");
    }

    #[test]
    fn test_frozen_reports_none_without_growth() {
        let mut dict = Dictionary::new();
        dict.index_for(&"a".to_string());
        let mut frozen = dict.freeze();
        assert!(frozen.is_frozen());
        assert_eq!(frozen.index_for(&"a".to_string()), Some(0));
        assert_eq!(frozen.index_for(&"new".to_string()), None);
        assert_eq!(frozen.len(), 1);
    }

    #[test]
    fn test_out_of_range_is_an_error() {
        let dict: Dictionary<String> = Dictionary::new();
        assert!(matches!(
            dict.element_for(0),
            Err(TrainError::IndexOutOfRange { index: 0, len: 0 })
        ));
    }

    #[test]
    fn test_text_round_trip() {
        let mut dict = Dictionary::new();
        dict.index_for(&"alpha".to_string());
        dict.index_for(&"beta".to_string());

        let mut buf = Vec::new();
        dict.write_text(&mut buf).unwrap();
        let loaded = Dictionary::read_text(Cursor::new(buf)).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.index_of(&"beta".to_string()), Some(1));
    }

    #[test]
    fn test_binary_round_trip() {
        let mut dict = Dictionary::new();
        dict.index_for(&"one".to_string());
        dict.index_for(&"two".to_string());
        dict.index_for(&"three".to_string());

        let mut buf = Vec::new();
        dict.write_binary(&mut buf).unwrap();
        let loaded = Dictionary::read_binary(Cursor::new(buf)).unwrap();

        assert_eq!(loaded.elements(), dict.elements());
    }

    #[test]
    fn test_save_load_format_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut dict = Dictionary::new();
        dict.index_for(&"x".to_string());
        dict.index_for(&"y".to_string());

        let text_path = dir.path().join("dictionary");
        dict.save(&text_path).unwrap();
        let text = std::fs::read_to_string(&text_path).unwrap();
        assert_eq!(text, "x\ny\n");
        assert_eq!(Dictionary::load(&text_path).unwrap().len(), 2);

        let bin_path = dir.path().join("dictionary.bin");
        dict.save(&bin_path).unwrap();
        let loaded = Dictionary::load(&bin_path).unwrap();
        assert_eq!(loaded.elements(), dict.elements());
    }
}
