//! The fixed catalogue of devices a server can front.

use serde::{Deserialize, Serialize};

/// Device kind behind a server.
///
/// Serialised with the upper-case wire names (`"MOTOR"`, `"CAMERA"`, `"GAS"`,
/// `"OPT"`), which is also how INFO replies report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    #[serde(rename = "MOTOR")]
    Motor,
    #[serde(rename = "CAMERA")]
    Camera,
    #[serde(rename = "GAS")]
    Gas,
    #[serde(rename = "OPT")]
    Opt,
}

impl Device {
    /// Every supported device, in catalogue order.
    pub const ALL: [Device; 4] = [Device::Motor, Device::Camera, Device::Gas, Device::Opt];

    /// Returns the wire name of this device.
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Motor => "MOTOR",
            Device::Camera => "CAMERA",
            Device::Gas => "GAS",
            Device::Opt => "OPT",
        }
    }
}

impl TryFrom<&str> for Device {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "MOTOR" => Ok(Device::Motor),
            "CAMERA" => Ok(Device::Camera),
            "GAS" => Ok(Device::Gas),
            "OPT" => Ok(Device::Opt),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
