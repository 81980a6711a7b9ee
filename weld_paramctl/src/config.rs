//! Tool configuration: segment settings plus the parameter catalog
//!
//! ```toml
//! [shared]
//! service_name = "weld-paramctl"
//!
//! [segment]
//! segment_name = "params"
//!
//! [[parameter]]
//! array = "settings"
//! index = 0
//! name = "wire_feed_speed"
//! value = 8.5
//! extended = { min = 0.5, max = 25.0, default = 8.0, scale = 1.0, unit = 4, precision = 1 }
//! ```

use serde::Deserialize;
use weld_common::config::{ConfigError, ParamShmConfig, SharedConfig};
use weld_param_shm::{
    CatalogConfig, CatalogEntry, ElementType, ExtendedInfo, ParameterId, ParameterValue,
    WeldCatalog,
};

/// One declared parameter
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterDecl {
    /// Catalog position and name
    #[serde(flatten)]
    pub entry: CatalogEntry,
    /// Value published by `serve`
    #[serde(default)]
    pub value: Option<f64>,
    /// Metadata published by `serve`
    #[serde(default)]
    pub extended: Option<ExtendedInfo>,
}

/// Top-level tool configuration
#[derive(Debug, Deserialize)]
pub struct ParamctlConfig {
    /// Common process settings
    pub shared: SharedConfig,
    /// Segment settings
    #[serde(default)]
    pub segment: ParamShmConfig,
    /// Declared parameters
    #[serde(default, rename = "parameter")]
    pub parameters: Vec<ParameterDecl>,
}

impl ParamctlConfig {
    /// Validate all sections, including the catalog.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.segment.validate()?;
        self.catalog()?;
        self.initial_values()?;
        Ok(())
    }

    /// Catalog description
    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            parameters: self.parameters.iter().map(|p| p.entry.clone()).collect(),
        }
    }

    /// Catalog built from the declared parameters
    pub fn catalog(&self) -> Result<WeldCatalog, ConfigError> {
        WeldCatalog::from_config(&self.catalog_config())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Declared values, typed for their arrays
    pub fn initial_values(&self) -> Result<Vec<(ParameterId, ParameterValue)>, ConfigError> {
        self.parameters
            .iter()
            .filter_map(|decl| decl.value.map(|raw| (decl, raw)))
            .map(|(decl, raw)| {
                let id = declared_id(&decl.entry)?;
                let value = typed_value(decl.entry.array.element_type(), raw).ok_or_else(|| {
                    ConfigError::ValidationError(format!(
                        "value {raw} of '{}' does not fit its array",
                        decl.entry.name
                    ))
                })?;
                Ok((id, value))
            })
            .collect()
    }

    /// Declared metadata
    pub fn initial_extended(&self) -> Result<Vec<(ParameterId, ExtendedInfo)>, ConfigError> {
        self.parameters
            .iter()
            .filter_map(|decl| decl.extended.map(|info| (decl, info)))
            .map(|(decl, info)| Ok((declared_id(&decl.entry)?, info)))
            .collect()
    }
}

fn declared_id(entry: &CatalogEntry) -> Result<ParameterId, ConfigError> {
    WeldCatalog::id_for(entry.array, entry.index).ok_or_else(|| {
        ConfigError::ValidationError(format!(
            "'{}' is outside the {:?} array",
            entry.name, entry.array
        ))
    })
}

/// Convert a configured number to the element type of its array.
fn typed_value(element: ElementType, raw: f64) -> Option<ParameterValue> {
    match element {
        ElementType::F32 => Some(ParameterValue::F32(raw as f32)),
        ElementType::U32 => {
            let in_range = raw >= 0.0 && raw <= f64::from(u32::MAX) && raw.fract() == 0.0;
            in_range.then(|| ParameterValue::U32(raw as u32))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use weld_common::config::ConfigLoader;
    use weld_param_shm::ArraySelector;

    fn load(body: &str) -> Result<ParamctlConfig, ConfigError> {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{body}").unwrap();
        file.flush().unwrap();
        ParamctlConfig::load(file.path())
    }

    const SAMPLE: &str = r#"
[shared]
service_name = "weld-paramctl"

[segment]
segment_name = "cell3"

[[parameter]]
array = "settings"
index = 2
name = "wire_feed_speed"
value = 8.5
extended = { min = 0.5, max = 25.0, unit = 4 }

[[parameter]]
array = "control"
index = 0
name = "job_number"
value = 12

[[parameter]]
array = "doku"
index = 1
name = "measured_current"
"#;

    #[test]
    fn sample_config_loads() {
        let config = load(SAMPLE).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.segment.segment_name, "cell3");
        assert_eq!(config.parameters.len(), 3);

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.present_count(), 3);
        assert_eq!(
            catalog.id_of("job_number"),
            WeldCatalog::id_for(ArraySelector::Control, 0)
        );
    }

    #[test]
    fn initial_values_are_typed_per_array() {
        let config = load(SAMPLE).unwrap();
        let values = config.initial_values().unwrap();
        assert_eq!(
            values,
            vec![
                (ParameterId(2), ParameterValue::F32(8.5)),
                (
                    WeldCatalog::id_for(ArraySelector::Control, 0).unwrap(),
                    ParameterValue::U32(12)
                ),
            ]
        );

        let extended = config.initial_extended().unwrap();
        assert_eq!(extended.len(), 1);
        assert_eq!(extended[0].1.max, 25.0);
        assert_eq!(extended[0].1.precision, 0);
    }

    #[test]
    fn fractional_control_value_is_rejected() {
        let config = load(
            r#"
[shared]
service_name = "weld-paramctl"

[[parameter]]
array = "control"
index = 1
name = "job_mode"
value = 1.5
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let config = load(
            r#"
[shared]
service_name = "weld-paramctl"

[[parameter]]
array = "doku"
index = 4096
name = "too_far"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn typed_value_bounds() {
        assert_eq!(
            typed_value(ElementType::U32, 4_294_967_295.0),
            Some(ParameterValue::U32(u32::MAX))
        );
        assert_eq!(typed_value(ElementType::U32, -1.0), None);
        assert_eq!(
            typed_value(ElementType::F32, -1.0),
            Some(ParameterValue::F32(-1.0))
        );
    }
}
