use serde::{Deserialize, Serialize};

use crate::search::{Result, SearchError};

/// Special token ids and size of the target vocabulary.
///
/// Fixed for the lifetime of a strategy and every job it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyInfo {
    pub size: usize,
    pub bos: u32,
    pub eos: u32,
    pub unk: u32,
    pub pad: u32,
}

impl VocabularyInfo {
    /// Build a vocabulary description, rejecting ids that collide or fall
    /// outside `[0, size)`.
    pub fn new(size: usize, bos: u32, eos: u32, unk: u32, pad: u32) -> Result<Self> {
        let info = Self {
            size,
            bos,
            eos,
            unk,
            pad,
        };
        info.validate()?;
        Ok(info)
    }

    pub fn validate(&self) -> Result<()> {
        let ids = [
            ("bos", self.bos),
            ("eos", self.eos),
            ("unk", self.unk),
            ("pad", self.pad),
        ];
        for (name, id) in ids {
            if id as usize >= self.size {
                return Err(SearchError::InvalidArgument(format!(
                    "{name} id {id} is outside the vocabulary of size {}",
                    self.size
                )));
            }
        }
        for (i, (name_a, a)) in ids.iter().enumerate() {
            for (name_b, b) in &ids[i + 1..] {
                if a == b {
                    return Err(SearchError::InvalidArgument(format!(
                        "{name_a} and {name_b} share token id {a}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_distinct_ids() {
        let vocab = VocabularyInfo::new(8, 1, 2, 0, 3).unwrap();
        assert_eq!(vocab.size, 8);
        assert_eq!(vocab.eos, 2);
    }

    #[test]
    fn rejects_out_of_range_id() {
        let err = VocabularyInfo::new(4, 0, 1, 2, 4).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("pad id 4"));
    }

    #[test]
    fn rejects_shared_id() {
        let err = VocabularyInfo::new(8, 0, 1, 1, 3).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("eos and unk"));
    }

    #[test]
    fn deserializes_from_json() {
        let vocab: VocabularyInfo =
            serde_json::from_str(r#"{"size": 8, "bos": 0, "eos": 1, "unk": 2, "pad": 3}"#)
                .expect("failed to parse vocab");
        assert_eq!(vocab, VocabularyInfo::new(8, 0, 1, 2, 3).unwrap());
    }
}
