use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

/// Inclusive range of unsigned integers, used for badge ids, ownership times,
/// timeline times and empty-block heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UintRange {
    #[serde(deserialize_with = "deserialize_uint")]
    pub start: u64,
    #[serde(deserialize_with = "deserialize_uint")]
    pub end: u64,
}

impl UintRange {
    pub const FULL: UintRange = UintRange {
        start: 1,
        end: u64::MAX,
    };

    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn single(value: u64) -> Self {
        Self::new(value, value)
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, value: u64) -> bool {
        self.start <= value && value <= self.end
    }

    /// Number of integers covered by the range.
    pub fn len(&self) -> u128 {
        if !self.is_valid() {
            return 0;
        }
        u128::from(self.end) - u128::from(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn intersection(&self, other: &UintRange) -> Option<UintRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(UintRange { start, end })
    }
}

/// Sorts ranges and merges the ones that overlap or touch.
pub fn sort_and_merge(mut ranges: Vec<UintRange>) -> Vec<UintRange> {
    ranges.retain(UintRange::is_valid);
    ranges.sort();

    let mut merged: Vec<UintRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Returns the parts of `from` that are not covered by `to_remove`.
pub fn remove_ranges(to_remove: &[UintRange], from: &[UintRange]) -> Vec<UintRange> {
    let to_remove = sort_and_merge(to_remove.to_vec());
    let mut remaining = Vec::new();

    for range in sort_and_merge(from.to_vec()) {
        let mut cursor = Some(range);
        for removal in &to_remove {
            let Some(current) = cursor else { break };
            if removal.end < current.start || removal.start > current.end {
                continue;
            }
            if removal.start > current.start {
                remaining.push(UintRange::new(current.start, removal.start - 1));
            }
            cursor = (removal.end < current.end)
                .then(|| UintRange::new(removal.end + 1, current.end));
        }
        if let Some(current) = cursor {
            remaining.push(current);
        }
    }

    remaining
}

/// Returns the ranges covered by both inputs.
pub fn intersect_ranges(lhs: &[UintRange], rhs: &[UintRange]) -> Vec<UintRange> {
    let mut overlap = Vec::new();
    for left in lhs {
        for right in rhs {
            if let Some(shared) = left.intersection(right) {
                overlap.push(shared);
            }
        }
    }
    sort_and_merge(overlap)
}

pub fn ranges_contain(ranges: &[UintRange], value: u64) -> bool {
    ranges.iter().any(|range| range.contains(value))
}

/// Accepts either a JSON number or a decimal string. Chain payloads encode
/// integers as strings; empty strings and `"null"` read as zero.
pub(crate) fn deserialize_uint<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawUint {
        Number(u64),
        Text(String),
        Null(()),
    }

    match RawUint::deserialize(deserializer)? {
        RawUint::Number(value) => Ok(value),
        RawUint::Null(()) => Ok(0),
        RawUint::Text(text) => parse_uint_or_zero(&text).map_err(D::Error::custom),
    }
}

pub(crate) fn parse_uint_or_zero(text: &str) -> Result<u64, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(0);
    }
    trimmed
        .parse::<u64>()
        .map_err(|err| format!("invalid unsigned integer {trimmed:?}: {err}"))
}
