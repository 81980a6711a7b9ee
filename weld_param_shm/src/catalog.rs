//! Parameter catalog: identifier → array slot resolution
//!
//! Parameter identifiers form one flat space in catalog order:
//!
//! ```text
//! 0 .. JS                 job settings      (f32)
//! JS .. JS+JC             job control       (u32)
//! JS+JC .. JS+JC+DOKU     documentation     (f32)
//! ```
//!
//! The bounds are const generics defaulting to the build-time constants in
//! `weld_common::consts`, so a target build can swap its catalog without
//! touching the synchronization code. Writer and readers must agree on them;
//! a region of a different size is rejected like a version mismatch.

use crate::error::{ShmError, ShmResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use weld::consts::{DOKU_PAR_N, JC_PAR_N, JS_PAR_N};

/// Flat parameter identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterId(pub u32);

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which value array a parameter lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArraySelector {
    /// Job settings
    Settings,
    /// Job control
    Control,
    /// Documentation / measurement
    Doku,
}

impl ArraySelector {
    /// Element type stored by this array
    pub const fn element_type(self) -> ElementType {
        match self {
            Self::Settings | Self::Doku => ElementType::F32,
            Self::Control => ElementType::U32,
        }
    }
}

/// Element type of a value slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// 32-bit float
    F32,
    /// 32-bit unsigned
    U32,
}

/// Typed parameter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Settings or doku value
    F32(f32),
    /// Control value
    U32(u32),
}

impl ParameterValue {
    /// Element type of this value
    pub const fn element_type(&self) -> ElementType {
        match self {
            Self::F32(_) => ElementType::F32,
            Self::U32(_) => ElementType::U32,
        }
    }

    /// Raw 32-bit word as stored in the segment
    pub fn to_bits(self) -> u32 {
        match self {
            Self::F32(v) => v.to_bits(),
            Self::U32(v) => v,
        }
    }

    /// Decode a stored word
    pub fn from_bits(element: ElementType, bits: u32) -> Self {
        match element {
            ElementType::F32 => Self::F32(f32::from_bits(bits)),
            ElementType::U32 => Self::U32(bits),
        }
    }

    /// Value as `f32`, if this is a float slot
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            Self::U32(_) => None,
        }
    }

    /// Value as `u32`, if this is a control slot
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            Self::F32(_) => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
        }
    }
}

/// Resolved location of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSlot {
    /// Value array
    pub array: ArraySelector,
    /// Index within the array
    pub index: usize,
    /// Element type of the slot
    pub element: ElementType,
}

/// One `[[parameter]]` entry of a catalog file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Value array
    pub array: ArraySelector,
    /// Index within the array
    pub index: usize,
    /// Symbolic name
    pub name: String,
}

/// Catalog description loaded from TOML
///
/// ```toml
/// [[parameter]]
/// array = "settings"
/// index = 0
/// name = "wire_feed_speed"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Parameters present in the active configuration
    #[serde(default, rename = "parameter")]
    pub parameters: Vec<CatalogEntry>,
}

/// Catalog construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Index exceeds the compiled array bound
    #[error("{array:?}[{index}] is outside the compiled bound {bound}")]
    IndexOutOfRange {
        /// Value array
        array: ArraySelector,
        /// Offending index
        index: usize,
        /// Compiled bound
        bound: usize,
    },

    /// Two entries name the same slot
    #[error("{array:?}[{index}] is declared twice")]
    DuplicateSlot {
        /// Value array
        array: ArraySelector,
        /// Index within the array
        index: usize,
    },

    /// Two entries share a name
    #[error("Parameter name '{name}' is declared twice")]
    DuplicateName {
        /// Duplicated name
        name: String,
    },
}

/// Catalog of parameters compiled for one layout
#[derive(Debug, Clone)]
pub struct ParameterCatalog<
    const JS: usize = JS_PAR_N,
    const JC: usize = JC_PAR_N,
    const DK: usize = DOKU_PAR_N,
> {
    present: Vec<bool>,
    names: Vec<Option<String>>,
    by_name: HashMap<String, ParameterId>,
}

/// Catalog with the build-time bounds
pub type WeldCatalog = ParameterCatalog;

impl<const JS: usize, const JC: usize, const DK: usize> ParameterCatalog<JS, JC, DK> {
    /// Number of addressable parameters
    pub const LEN: usize = JS + JC + DK;

    /// Catalog with no parameter present
    pub fn empty() -> Self {
        Self {
            present: vec![false; Self::LEN],
            names: vec![None; Self::LEN],
            by_name: HashMap::new(),
        }
    }

    /// Catalog with every slot present and unnamed
    pub fn full() -> Self {
        Self {
            present: vec![true; Self::LEN],
            ..Self::empty()
        }
    }

    /// Build a catalog from a configuration file description
    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let mut catalog = Self::empty();
        for entry in &config.parameters {
            let id = Self::id_for(entry.array, entry.index).ok_or(CatalogError::IndexOutOfRange {
                array: entry.array,
                index: entry.index,
                bound: Self::bound(entry.array),
            })?;
            let pos = id.0 as usize;
            if catalog.present[pos] {
                return Err(CatalogError::DuplicateSlot {
                    array: entry.array,
                    index: entry.index,
                });
            }
            if catalog.by_name.contains_key(&entry.name) {
                return Err(CatalogError::DuplicateName {
                    name: entry.name.clone(),
                });
            }
            catalog.present[pos] = true;
            catalog.names[pos] = Some(entry.name.clone());
            catalog.by_name.insert(entry.name.clone(), id);
        }
        Ok(catalog)
    }

    /// Compiled bound of one array
    pub const fn bound(array: ArraySelector) -> usize {
        match array {
            ArraySelector::Settings => JS,
            ArraySelector::Control => JC,
            ArraySelector::Doku => DK,
        }
    }

    /// Location of `id`, or `None` outside the compiled range
    pub const fn locate(id: ParameterId) -> Option<ParameterSlot> {
        let raw = id.0 as usize;
        let (array, index) = if raw < JS {
            (ArraySelector::Settings, raw)
        } else if raw < JS + JC {
            (ArraySelector::Control, raw - JS)
        } else if raw < JS + JC + DK {
            (ArraySelector::Doku, raw - JS - JC)
        } else {
            return None;
        };
        Some(ParameterSlot {
            array,
            index,
            element: array.element_type(),
        })
    }

    /// Identifier of `array[index]`
    pub const fn id_for(array: ArraySelector, index: usize) -> Option<ParameterId> {
        if index >= Self::bound(array) {
            return None;
        }
        let base = match array {
            ArraySelector::Settings => 0,
            ArraySelector::Control => JS,
            ArraySelector::Doku => JS + JC,
        };
        Some(ParameterId((base + index) as u32))
    }

    /// Resolve `id` to its slot; absent parameters are unknown to this catalog
    pub fn resolve(&self, id: ParameterId) -> ShmResult<ParameterSlot> {
        match Self::locate(id) {
            Some(slot) if self.is_present(id) => Ok(slot),
            _ => Err(ShmError::UnknownParameterId { id }),
        }
    }

    /// Every identifier in catalog order
    pub fn ids() -> impl Iterator<Item = ParameterId> {
        (0..Self::LEN as u32).map(ParameterId)
    }

    /// Identifiers present in the active configuration, in catalog order
    pub fn present_ids(&self) -> impl Iterator<Item = ParameterId> + '_ {
        self.present
            .iter()
            .enumerate()
            .filter(|(_, present)| **present)
            .map(|(pos, _)| ParameterId(pos as u32))
    }

    /// Whether `id` is present in the active configuration
    pub fn is_present(&self, id: ParameterId) -> bool {
        self.present.get(id.0 as usize).copied().unwrap_or(false)
    }

    /// Number of present parameters
    pub fn present_count(&self) -> usize {
        self.present.iter().filter(|p| **p).count()
    }

    /// Identifier registered under `name`
    pub fn id_of(&self, name: &str) -> Option<ParameterId> {
        self.by_name.get(name).copied()
    }

    /// Name registered for `id`
    pub fn name_of(&self, id: ParameterId) -> Option<&str> {
        self.names.get(id.0 as usize)?.as_deref()
    }
}

impl<const JS: usize, const JC: usize, const DK: usize> Default for ParameterCatalog<JS, JC, DK> {
    fn default() -> Self {
        Self::full()
    }
}
