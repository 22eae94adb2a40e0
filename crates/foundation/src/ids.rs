use serde::{Deserialize, Serialize};

/// Identifies one independently readable row group of the remote dataset.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartitionId(pub u64);

impl PartitionId {
    pub fn new(n: u64) -> Self {
        PartitionId(n)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifying one fetch/query cycle.
///
/// Generations are handed out in strictly increasing order; `Generation(0)`
/// is never issued and stands for "nothing started yet".
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    pub const NONE: Generation = Generation(0);

    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Generation, PartitionId};

    #[test]
    fn generations_order_by_value() {
        let a = Generation::NONE.next();
        let b = a.next();
        assert!(b > a);
        assert_eq!(b, Generation(2));
    }

    #[test]
    fn partition_id_serializes_as_integer() {
        let text = serde_json::to_string(&PartitionId(7)).unwrap();
        assert_eq!(text, "7");
    }
}
