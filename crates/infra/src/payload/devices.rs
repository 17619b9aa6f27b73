//! Device network configuration: coordinators, their devices and the
//! variables attached to device outputs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::BuildError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNetworkConfig {
    /// Coordinator id -> device id -> device.
    #[serde(default)]
    pub coordinators: BTreeMap<String, BTreeMap<String, DeviceConfig>>,
}

/// A device. Single-output devices carry their variable directly,
/// multi-output devices list it per output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(flatten)]
    pub variable: VariableBinding,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, OutputConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub variable: VariableBinding,
}

/// Variable attached to an output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub varname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vartype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

/// A variable exposed by an enabled output of an enabled device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposedVariable<'a> {
    pub device_id: &'a str,
    pub output_id: Option<&'a str>,
    pub varname: &'a str,
    pub vartype: Option<&'a str>,
    pub units: Option<&'a str>,
}

impl DeviceNetworkConfig {
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let text = std::fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(json: &str) -> Result<Self, BuildError> {
        serde_json::from_str(json).map_err(|e| BuildError::Devices(e.to_string()))
    }

    /// Variables of enabled devices and outputs, coordinators and devices
    /// taken in id order. Outputs without a variable name are skipped.
    pub fn exposed_variables(&self) -> Vec<ExposedVariable<'_>> {
        let mut exposed = Vec::new();
        let devices = self
            .coordinators
            .values()
            .flat_map(|devices| devices.iter())
            .filter(|(_, device)| device.enabled);

        for (device_id, device) in devices {
            if !device.outputs.is_empty() {
                let outputs = device.outputs.iter().filter(|(_, o)| o.enabled);
                exposed.extend(outputs.filter_map(|(output_id, output)| {
                    exposed_variable(device_id, Some(output_id.as_str()), &output.variable)
                }));
            } else if let Some(var) = exposed_variable(device_id, None, &device.variable) {
                exposed.push(var);
            }
        }
        exposed
    }
}

fn exposed_variable<'a>(
    device_id: &'a str,
    output_id: Option<&'a str>,
    binding: &'a VariableBinding,
) -> Option<ExposedVariable<'a>> {
    let varname = binding.varname.as_deref().filter(|n| !n.is_empty())?;
    Some(ExposedVariable {
        device_id,
        output_id,
        varname,
        vartype: binding.vartype.as_deref(),
        units: binding.units.as_deref(),
    })
}
