//! Employee directory: loaded once from the personnel export, read-only afterwards

pub mod normalize;
mod source;

pub use source::{SourceEncoding, SourceOptions};

use crate::error::{LiaisonError, Result};
use liaison_types::EmployeeRecord;
use normalize::normalize_for_match;
use std::collections::HashMap;
use std::path::Path;

/// How well a record matched a search query, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchRank {
    IdExact,
    IdPrefix,
    IdContains,
    NamePrefix,
    NameContains,
}

/// Precomputed normalized forms of one record
#[derive(Debug, Clone)]
struct SearchKey {
    id: String,
    /// "last first"
    name: String,
    /// "first last"
    reversed_name: String,
}

impl SearchKey {
    fn new(record: &EmployeeRecord) -> Self {
        let last = normalize_for_match(&record.last_name);
        let first = normalize_for_match(&record.first_name);
        let join = |a: &str, b: &str| {
            [a, b]
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(" ")
        };

        Self {
            id: normalize_for_match(&record.id),
            name: join(&last, &first),
            reversed_name: join(&first, &last),
        }
    }

    fn rank(&self, query: &str) -> Option<MatchRank> {
        if self.id == query {
            Some(MatchRank::IdExact)
        } else if self.id.starts_with(query) {
            Some(MatchRank::IdPrefix)
        } else if self.id.contains(query) {
            Some(MatchRank::IdContains)
        } else if self.name.starts_with(query) || self.reversed_name.starts_with(query) {
            Some(MatchRank::NamePrefix)
        } else if self.name.contains(query) || self.reversed_name.contains(query) {
            Some(MatchRank::NameContains)
        } else {
            None
        }
    }
}

pub struct EmployeeDirectory {
    records: Vec<EmployeeRecord>,
    index: HashMap<String, usize>,
    keys: Vec<SearchKey>,
}

impl EmployeeDirectory {
    /// Load the personnel export from disk
    pub fn load<P: AsRef<Path>>(path: P, options: &SourceOptions) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            LiaisonError::DataFormat(format!(
                "Failed to read employee table {}: {}",
                path.display(),
                e
            ))
        })?;

        let directory = Self::from_bytes(&bytes, options)?;
        log::info!("Loaded {} employees from {}", directory.len(), path.display());
        Ok(directory)
    }

    /// Load from raw export bytes, detecting encoding and delimiter as configured
    pub fn from_bytes(bytes: &[u8], options: &SourceOptions) -> Result<Self> {
        let text = source::decode_source(bytes, options.encoding)?;
        let delimiter = options
            .delimiter
            .unwrap_or_else(|| source::detect_delimiter(&text));
        log::debug!("Reading employee table with delimiter {:?}", delimiter as char);

        let records = source::read_records(&text, delimiter)?;
        Self::from_records(records)
    }

    /// Build from already-typed records; ids must be non-empty and unique
    pub fn from_records(records: Vec<EmployeeRecord>) -> Result<Self> {
        let mut index = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            if record.id.trim().is_empty() {
                return Err(LiaisonError::DataFormat(format!(
                    "Employee at position {} has no matricule",
                    position + 1
                )));
            }
            if index.insert(record.id.clone(), position).is_some() {
                return Err(LiaisonError::DataFormat(format!(
                    "Matricule {} appears more than once",
                    record.id
                )));
            }
        }

        let keys = records.iter().map(SearchKey::new).collect();
        Ok(Self {
            records,
            index,
            keys,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exact matricule lookup
    pub fn find_by_id(&self, id: &str) -> Option<&EmployeeRecord> {
        self.index.get(id.trim()).map(|&i| &self.records[i])
    }

    /// Records whose matricule or name contains the query, best match first.
    ///
    /// Matching ignores case, accents and extra whitespace. Id matches rank
    /// above name matches; equal ranks are ordered by name, then matricule.
    pub fn search(&self, query: &str) -> Vec<&EmployeeRecord> {
        let query = normalize_for_match(query);
        if query.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<(MatchRank, usize)> = self
            .keys
            .iter()
            .enumerate()
            .filter_map(|(i, key)| key.rank(&query).map(|rank| (rank, i)))
            .collect();

        hits.sort_by(|(rank_a, a), (rank_b, b)| {
            rank_a
                .cmp(rank_b)
                .then_with(|| self.keys[*a].name.cmp(&self.keys[*b].name))
                .then_with(|| self.records[*a].id.cmp(&self.records[*b].id))
        });

        hits.into_iter().map(|(_, i)| &self.records[i]).collect()
    }

    /// Best search hit, or `NotFound` when nothing matches
    pub fn lookup(&self, query: &str) -> Result<&EmployeeRecord> {
        self.search(query)
            .into_iter()
            .next()
            .ok_or_else(|| LiaisonError::NotFound(format!("No employee matches '{}'", query.trim())))
    }
}
