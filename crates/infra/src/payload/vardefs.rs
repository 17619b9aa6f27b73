//! Variable definitions export, built from the device network configuration.
//!
//! Document layout:
//!
//! ```text
//! FORMAT_VERSION<TAB>1
//! CREATION_DATE<TAB>2024-03-02T01:00:00Z
//! ID_SITE<TAB><site_code>
//! FEEDBACK_TO<TAB><contact>
//!
//! varname<TAB>label<TAB>type<TAB>value_type<TAB>units<TAB>lower_bound<TAB>upper_bound<TAB>delta_min<TAB>delta_max
//! <one line per variable>
//! ```

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};

use super::devices::{DeviceNetworkConfig, ExposedVariable};
use super::{BuildError, FORMAT_VERSION, Payload, PayloadBuilder, TIMESTAMP_FORMAT};
use crate::portal::UploadBody;

pub const COLUMNS: [&str; 9] = [
    "varname",
    "label",
    "type",
    "value_type",
    "units",
    "lower_bound",
    "upper_bound",
    "delta_min",
    "delta_max",
];

/// Variable types whose values are logical.
const LOGICAL_TYPES: [&str; 4] = ["opened", "motion_detection", "motion", "presence"];

/// Value type code of a variable type: `L` (logical) or `N` (numeric).
pub fn value_type(vartype: &str) -> &'static str {
    if LOGICAL_TYPES.contains(&vartype) {
        "L"
    } else {
        "N"
    }
}

/// One line of the definitions document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDefinition {
    pub varname: String,
    pub label: String,
    pub var_type: String,
    pub value_type: &'static str,
    pub units: String,
}

impl VariableDefinition {
    fn from_exposed(var: &ExposedVariable<'_>) -> Result<Self, BuildError> {
        let var_type = var.vartype.filter(|t| !t.is_empty()).ok_or_else(|| {
            BuildError::Devices(format!(
                "variable {} of device {} has no type",
                var.varname, var.device_id
            ))
        })?;
        Ok(Self {
            varname: var.varname.to_string(),
            label: var.varname.to_string(),
            var_type: var_type.to_string(),
            value_type: value_type(var_type),
            units: var.units.unwrap_or_default().to_string(),
        })
    }

    /// Tab separated line. Bounds and deltas are not supported and left empty.
    pub fn line(&self) -> String {
        [
            self.varname.as_str(),
            self.label.as_str(),
            self.var_type.as_str(),
            self.value_type,
            self.units.as_str(),
            "",
            "",
            "",
            "",
        ]
        .join("\t")
    }
}

/// Builds the variable definitions document, in memory.
pub struct VariableDefinitionsBuilder {
    site_code: String,
    contact: String,
}

impl VariableDefinitionsBuilder {
    pub fn new(site_code: impl Into<String>, contact: impl Into<String>) -> Self {
        Self {
            site_code: site_code.into(),
            contact: contact.into(),
        }
    }

    /// Definitions of every exposed variable. A variable name used twice is
    /// an error.
    pub fn definitions(
        &self,
        network: &DeviceNetworkConfig,
    ) -> Result<Vec<VariableDefinition>, BuildError> {
        let mut seen = HashSet::new();
        let mut definitions = Vec::new();
        for var in network.exposed_variables() {
            if !seen.insert(var.varname) {
                return Err(BuildError::DuplicateVariable(var.varname.to_string()));
            }
            definitions.push(VariableDefinition::from_exposed(&var)?);
        }
        Ok(definitions)
    }

    pub fn document(&self, definitions: &[VariableDefinition], created: DateTime<Utc>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "FORMAT_VERSION\t{FORMAT_VERSION}");
        let _ = writeln!(out, "CREATION_DATE\t{}", created.format(TIMESTAMP_FORMAT));
        let _ = writeln!(out, "ID_SITE\t{}", self.site_code);
        let _ = writeln!(out, "FEEDBACK_TO\t{}", self.contact);
        out.push('\n');
        let _ = writeln!(out, "{}", COLUMNS.join("\t"));
        for definition in definitions {
            let _ = writeln!(out, "{}", definition.line());
        }
        out
    }
}

impl PayloadBuilder for VariableDefinitionsBuilder {
    type Params = DeviceNetworkConfig;

    fn build(
        &self,
        network: &DeviceNetworkConfig,
        _staging_dir: &Path,
    ) -> Result<Option<Payload>, BuildError> {
        let definitions = self.definitions(network)?;
        if definitions.is_empty() {
            tracing::info!("no variable to declare");
            return Ok(None);
        }

        let document = self.document(&definitions, Utc::now());
        tracing::info!(variables = definitions.len(), "variable definitions built");

        Ok(Some(Payload {
            record_count: definitions.len(),
            body: UploadBody::Bytes {
                file_name: format!("{}-variables.tsv", self.site_code),
                content: document.into_bytes(),
            },
            artifact: None,
        }))
    }
}
