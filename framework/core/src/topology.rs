use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::command::VolumeKey;

/// A volume on a specific array.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VolumeRef {
    pub array: String,
    pub volume: u32,
}

impl Display for VolumeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/VOL{}", self.array, self.volume)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayVolumes {
    pub name: String,
    pub volumes: Vec<u32>,
}

/// The arrays of the storage target and the volumes on each of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topology {
    arrays: Vec<ArrayVolumes>,
}

impl Topology {
    pub fn new(arrays: Vec<ArrayVolumes>) -> Self {
        Self { arrays }
    }

    pub fn with_array(mut self, name: impl Into<String>, volumes: impl IntoIterator<Item = u32>) -> Self {
        self.arrays.push(ArrayVolumes {
            name: name.into(),
            volumes: volumes.into_iter().collect(),
        });
        self
    }

    pub fn arrays(&self) -> &[ArrayVolumes] {
        &self.arrays
    }

    /// The array that per-volume limits are applied to.
    pub fn primary_array(&self) -> Option<&str> {
        self.arrays.first().map(|a| a.name.as_str())
    }

    pub fn volume_count(&self) -> usize {
        self.arrays.iter().map(|a| a.volumes.len()).sum()
    }

    pub fn volumes(&self) -> impl Iterator<Item = VolumeRef> + '_ {
        self.arrays.iter().flat_map(|array| {
            array.volumes.iter().map(move |volume| VolumeRef {
                array: array.name.clone(),
                volume: *volume,
            })
        })
    }
}

/// Parses `ARRAY:VOLUMES` where volumes is a comma separated list of ids and inclusive ranges,
/// for example `ARR0:1-4,7`.
impl FromStr for ArrayVolumes {
    type Err = TopologyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, volumes) = s
            .split_once(':')
            .ok_or_else(|| TopologyParseError(s.to_string()))?;
        if name.trim().is_empty() {
            return Err(TopologyParseError(s.to_string()));
        }

        let mut ids = Vec::new();
        for key in volumes.split(',').filter(|k| !k.trim().is_empty()) {
            let key = key
                .parse::<VolumeKey>()
                .map_err(|_| TopologyParseError(s.to_string()))?;
            ids.extend(key.ids());
        }

        Ok(Self {
            name: name.trim().to_string(),
            volumes: ids,
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("`{0}` is not a valid array definition, expected ARRAY:VOLUMES such as ARR0:1-4")]
pub struct TopologyParseError(pub String);
