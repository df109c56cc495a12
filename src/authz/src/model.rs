//! Clearance levels, layers, devices and the token addressing scheme

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device identifier (16-bit)
pub type DeviceId = u16;

/// Token address derived from a device ID
pub type TokenId = u16;

/// First token address; device `n` owns `TOKEN_BASE + 3n .. TOKEN_BASE + 3n + 2`
pub const TOKEN_BASE: TokenId = 0x8000;

/// Number of token addresses owned by each device
pub const TOKENS_PER_DEVICE: u16 = 3;

/// Largest device ID whose three tokens still fit in 16 bits
pub const MAX_DEVICE_ID: DeviceId = (u16::MAX - TOKEN_BASE - (TOKENS_PER_DEVICE - 1)) / TOKENS_PER_DEVICE;

/// Security clearance encoded as a repeating-byte pattern
///
/// Level `L` is stored as four repetitions of byte `L`, so level 5 is
/// `0x05050505`. Numeric order matches trust order, which lets clearances be
/// compared directly as unsigned integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Clearance(u32);

impl Clearance {
    /// No clearance supplied; never satisfies a non-zero requirement
    pub const NONE: Clearance = Clearance(0);
    pub const LEVEL_2: Clearance = Clearance(0x0202_0202);
    pub const LEVEL_3: Clearance = Clearance(0x0303_0303);
    pub const LEVEL_4: Clearance = Clearance(0x0404_0404);
    pub const LEVEL_5: Clearance = Clearance(0x0505_0505);
    pub const LEVEL_6: Clearance = Clearance(0x0606_0606);
    pub const LEVEL_7: Clearance = Clearance(0x0707_0707);
    pub const LEVEL_8: Clearance = Clearance(0x0808_0808);
    pub const LEVEL_9: Clearance = Clearance(0x0909_0909);

    /// Wrap a raw 32-bit clearance value
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Encode a level as its repeating-byte pattern
    pub const fn from_level(level: u8) -> Self {
        Self(u32::from_be_bytes([level; 4]))
    }

    /// Raw 32-bit value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Security level held in the top byte
    pub const fn level(self) -> u8 {
        self.0.to_be_bytes()[0]
    }

    /// Valid clearances carry a level in 2..=9
    pub const fn is_valid(self) -> bool {
        matches!(self.level(), 2..=9)
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_higher_than(self, other: Clearance) -> bool {
        self.0 > other.0
    }

    pub const fn is_higher_or_equal(self, other: Clearance) -> bool {
        self.0 >= other.0
    }

    /// Parse a clearance header value
    ///
    /// The value is read as hexadecimal with an optional `0x`/`0X` prefix.
    /// Only the format is checked here; use [`Clearance::is_valid`] for the level.
    pub fn parse(value: &str) -> Result<Self, ModelError> {
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);

        u32::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| ModelError::InvalidClearance(value.to_string()))
    }
}

impl From<u32> for Clearance {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Clearance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X} (Level {})", self.0, self.level())
    }
}

/// Network segment layer, ordered bottom to top
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Data,
    Transport,
    Control,
    Application,
}

impl Layer {
    /// All layers in flow order
    pub const ALL: [Layer; 4] = [Layer::Data, Layer::Transport, Layer::Control, Layer::Application];

    /// Position in the flow order (Data = 1 .. Application = 4)
    pub const fn order(self) -> u8 {
        match self {
            Layer::Data => 1,
            Layer::Transport => 2,
            Layer::Control => 3,
            Layer::Application => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Layer::Data => "data",
            Layer::Transport => "transport",
            Layer::Control => "control",
            Layer::Application => "application",
        }
    }

    /// Information may stay on a layer or move upward, never downward
    pub const fn can_flow_to(self, target: Layer) -> bool {
        self.order() <= target.order()
    }
}

impl FromStr for Layer {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(Layer::Data),
            "transport" => Ok(Layer::Transport),
            "control" => Ok(Layer::Control),
            "application" => Ok(Layer::Application),
            other => Err(ModelError::InvalidLayer(other.to_string())),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether data may flow from `source` to `target`
pub fn can_access_layer(source: Layer, target: Layer) -> bool {
    source.can_flow_to(target)
}

/// Tag-based flow check; unknown tags fail closed
pub fn can_access_layer_tags(source: &str, target: &str) -> bool {
    match (source.parse::<Layer>(), target.parse::<Layer>()) {
        (Ok(source), Ok(target)) => source.can_flow_to(target),
        _ => false,
    }
}

/// Kind of registered endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Sensor,
    Actuator,
    Gateway,
    Controller,
}

impl DeviceClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Sensor => "sensor",
            DeviceClass::Actuator => "actuator",
            DeviceClass::Gateway => "gateway",
            DeviceClass::Controller => "controller",
        }
    }
}

impl FromStr for DeviceClass {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensor" => Ok(DeviceClass::Sensor),
            "actuator" => Ok(DeviceClass::Actuator),
            "gateway" => Ok(DeviceClass::Gateway),
            "controller" => Ok(DeviceClass::Controller),
            other => Err(ModelError::InvalidDeviceClass(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel addressed by a token, as an offset from the device's token base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenOffset {
    Status = 0,
    Config = 1,
    Data = 2,
}

impl TokenOffset {
    pub const ALL: [TokenOffset; 3] = [TokenOffset::Status, TokenOffset::Config, TokenOffset::Data];

    pub const fn value(self) -> u16 {
        self as u16
    }

    /// Offset of a token given its distance from the owning device's base
    pub const fn from_delta(delta: u16) -> Self {
        match delta % TOKENS_PER_DEVICE {
            0 => TokenOffset::Status,
            1 => TokenOffset::Config,
            _ => TokenOffset::Data,
        }
    }
}

/// Token base of a device: `0x8000 + id * 3`
///
/// Returns `None` when the device's three tokens would overflow 16 bits.
pub fn token_base(device_id: DeviceId) -> Option<TokenId> {
    if device_id > MAX_DEVICE_ID {
        return None;
    }
    device_id
        .checked_mul(TOKENS_PER_DEVICE)
        .and_then(|scaled| scaled.checked_add(TOKEN_BASE))
}

/// Token address of one of a device's channels
pub fn compute_token(device_id: DeviceId, offset: TokenOffset) -> Option<TokenId> {
    token_base(device_id).map(|base| base + offset.value())
}

/// Registered network endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique device identifier
    #[serde(rename = "device_id")]
    pub id: DeviceId,

    /// Layer the device lives on
    pub layer: Layer,

    /// Device kind
    pub class: DeviceClass,

    /// Clearance granted to the device
    pub clearance: Clearance,

    /// Human-readable name
    pub name: String,

    /// First token address; written by the registry at registration time
    #[serde(default)]
    pub token_base: TokenId,
}

impl Device {
    /// Create an unregistered device record
    pub fn new(
        id: DeviceId,
        layer: Layer,
        class: DeviceClass,
        clearance: Clearance,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            layer,
            class,
            clearance,
            name: name.into(),
            token_base: 0,
        }
    }

    pub fn compute_token(&self, offset: TokenOffset) -> Option<TokenId> {
        compute_token(self.id, offset)
    }

    pub fn status_token(&self) -> Option<TokenId> {
        self.compute_token(TokenOffset::Status)
    }

    pub fn config_token(&self) -> Option<TokenId> {
        self.compute_token(TokenOffset::Config)
    }

    pub fn data_token(&self) -> Option<TokenId> {
        self.compute_token(TokenOffset::Data)
    }
}
