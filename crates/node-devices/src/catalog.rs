//! Supported hardware, described as data.
//!
//! Each model lists the identity string its nodes report, how many channels it has,
//! and the registers a channel reads, writes and configures. One generic [`Channel`]
//! interprets these tables.

use crate::codec::{RegisterType, RegisterValue};
use crate::{Channel, Node, NodeError, NodeInfo, Result, Session};
use node_transport::NodeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Vpe6010,
    Vpe6030,
    Vpe6040,
    Vpe6050,
    Vpe6060,
    Vpe6070,
    Vpe6080,
    Vpe6090,
    Vpe6180,
    Vpe6190,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Scope {
    /// `ch{n}.<field>`
    Channel,
    /// bare `<field>`
    Device,
}

/// One register a model touches, with its wire type and accepted values.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RegisterSpec {
    pub field: &'static str,
    pub scope: Scope,
    pub ty: RegisterType,
    pub min: u32,
    pub max: u32,
}

impl RegisterSpec {
    /// Validate `value` and build the single-element request for it.
    pub fn value(&self, register: &str, value: u32) -> Result<RegisterValue> {
        if value < self.min || value > self.max {
            return Err(NodeError::InvalidArgument {
                register: register.to_string(),
                value,
                min: self.min,
                max: self.max,
            });
        }
        RegisterValue::unsigned(self.ty, &[value])
            .ok_or(NodeError::Unsupported("setting is not an unsigned register"))
    }
}

#[derive(Debug)]
pub struct DeviceModel {
    pub kind: DeviceKind,
    pub identity: &'static str,
    pub channels: u8,
    pub input: Option<RegisterSpec>,
    pub output: Option<RegisterSpec>,
    pub settings: &'static [RegisterSpec],
    pub sample_interval: bool,
}

const U8_MAX: u32 = u8::MAX as u32;
const U16_MAX: u32 = u16::MAX as u32;

const fn ch(field: &'static str, ty: RegisterType, min: u32, max: u32) -> RegisterSpec {
    RegisterSpec {
        field,
        scope: Scope::Channel,
        ty,
        min,
        max,
    }
}

const fn input(ty: RegisterType) -> Option<RegisterSpec> {
    Some(ch("input", ty, 0, u32::MAX))
}

const fn output(ty: RegisterType, max: u32) -> Option<RegisterSpec> {
    Some(ch("output", ty, 0, max))
}

pub const SAMPLE_INTERVAL: RegisterSpec = RegisterSpec {
    field: "sample_interval",
    scope: Scope::Device,
    ty: RegisterType::Uint16,
    min: 0,
    max: U16_MAX,
};

pub static MODELS: [DeviceModel; 10] = [
    DeviceModel {
        kind: DeviceKind::Vpe6010,
        identity: "com.widgetlords.mio.6010",
        channels: 1,
        input: Some(RegisterSpec {
            field: "input",
            scope: Scope::Device,
            ty: RegisterType::Uint16,
            min: 0,
            max: U16_MAX,
        }),
        output: None,
        settings: &[],
        sample_interval: true,
    },
    DeviceModel {
        kind: DeviceKind::Vpe6030,
        identity: "com.widgetlords.mio.6030",
        channels: 4,
        input: None,
        output: output(RegisterType::Uint8, 1),
        settings: &[],
        sample_interval: false,
    },
    DeviceModel {
        kind: DeviceKind::Vpe6040,
        identity: "com.widgetlords.mio.6040",
        channels: 4,
        input: input(RegisterType::Uint16),
        output: None,
        settings: &[ch("mode", RegisterType::Uint8, 0, 2)],
        sample_interval: true,
    },
    DeviceModel {
        kind: DeviceKind::Vpe6050,
        identity: "com.widgetlords.mio.6050",
        channels: 4,
        input: None,
        output: output(RegisterType::Uint16, U16_MAX),
        settings: &[ch("mode", RegisterType::Uint8, 0, 1)],
        sample_interval: false,
    },
    DeviceModel {
        kind: DeviceKind::Vpe6060,
        identity: "com.widgetlords.mio.6060",
        channels: 4,
        input: input(RegisterType::Uint32),
        output: None,
        settings: &[
            ch("mode", RegisterType::Uint8, 0, 2),
            ch("polarity", RegisterType::Uint8, 0, 1),
            ch("bias", RegisterType::Uint8, 0, 2),
        ],
        sample_interval: true,
    },
    DeviceModel {
        kind: DeviceKind::Vpe6070,
        identity: "com.widgetlords.mio.6070",
        channels: 4,
        input: None,
        output: output(RegisterType::Uint16, U16_MAX),
        settings: &[],
        sample_interval: false,
    },
    DeviceModel {
        kind: DeviceKind::Vpe6080,
        identity: "com.widgetlords.mio.6080",
        channels: 8,
        input: input(RegisterType::Uint16),
        output: None,
        settings: &[
            ch("enabled", RegisterType::Uint8, 0, 1),
            ch("beta", RegisterType::Uint16, 0, U16_MAX),
            ch("t0", RegisterType::Uint16, 0, U16_MAX),
        ],
        sample_interval: true,
    },
    DeviceModel {
        kind: DeviceKind::Vpe6090,
        identity: "com.widgetlords.mio.6090",
        channels: 6,
        input: input(RegisterType::Uint16),
        output: None,
        settings: &[ch("type", RegisterType::Uint8, 0, U8_MAX)],
        sample_interval: false,
    },
    DeviceModel {
        kind: DeviceKind::Vpe6180,
        identity: "com.widgetlords.mio.6180",
        channels: 8,
        input: input(RegisterType::Uint16),
        output: None,
        settings: &[],
        sample_interval: true,
    },
    DeviceModel {
        kind: DeviceKind::Vpe6190,
        identity: "com.widgetlords.mio.6190",
        channels: 3,
        input: input(RegisterType::Uint32),
        output: None,
        settings: &[ch("enabled", RegisterType::Uint8, 0, U8_MAX)],
        sample_interval: true,
    },
];

impl DeviceKind {
    pub fn model(self) -> &'static DeviceModel {
        let index = match self {
            DeviceKind::Vpe6010 => 0,
            DeviceKind::Vpe6030 => 1,
            DeviceKind::Vpe6040 => 2,
            DeviceKind::Vpe6050 => 3,
            DeviceKind::Vpe6060 => 4,
            DeviceKind::Vpe6070 => 5,
            DeviceKind::Vpe6080 => 6,
            DeviceKind::Vpe6090 => 7,
            DeviceKind::Vpe6180 => 8,
            DeviceKind::Vpe6190 => 9,
        };
        &MODELS[index]
    }

    /// Model whose nodes report `identity` as their name.
    pub fn from_identity(identity: &str) -> Option<Self> {
        MODELS.iter().find(|m| m.identity == identity).map(|m| m.kind)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Vpe6040Mode {
    Volt5 = 0,
    MilliAmp = 1,
    Volt10 = 2,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Vpe6050Mode {
    Source = 0,
    Sink = 1,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Vpe6060Mode {
    Basic = 0,
    Frequency = 1,
    PulseCounter = 2,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Vpe6060Polarity {
    Rising = 0,
    Falling = 1,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Vpe6060Bias {
    None = 0,
    Pnp = 1,
    Npn = 2,
}

/// Counter input settings, in the 6060 settings table order.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Vpe6060Config {
    pub mode: Vpe6060Mode,
    pub polarity: Vpe6060Polarity,
    pub bias: Vpe6060Bias,
}

impl Vpe6060Config {
    pub fn settings(&self) -> [u32; 3] {
        [self.mode as u32, self.polarity as u32, self.bias as u32]
    }
}

/// Thermistor parameters for a 6080 channel. `t0_kelvin` is sent in centi-kelvin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vpe6080Thermistor {
    pub enabled: bool,
    pub beta: u16,
    pub t0_kelvin: f64,
}

impl Default for Vpe6080Thermistor {
    fn default() -> Self {
        Self {
            enabled: true,
            beta: 3380,
            t0_kelvin: 298.15,
        }
    }
}

impl Vpe6080Thermistor {
    pub fn settings(&self) -> [u32; 3] {
        // whole centi-kelvin, truncated: 298.15 K goes out as 29814
        let t0 = (self.t0_kelvin * 100.0) as u32;
        [u32::from(self.enabled), u32::from(self.beta), t0]
    }
}

/// Supply monitor readings of a 6010.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Vpe6010Input {
    pub ma_5v: u16,
    pub mv_5v: u16,
    pub mv_24v1: u16,
    pub mv_24v2: u16,
    pub mv_24v: u16,
    pub ma_24v: u16,
}

impl Vpe6010Input {
    pub fn from_values(values: &[u32]) -> Option<Self> {
        let v = |i: usize| values.get(i).map(|&x| x as u16);
        Some(Self {
            ma_5v: v(0)?,
            mv_5v: v(1)?,
            mv_24v1: v(2)?,
            mv_24v2: v(3)?,
            mv_24v: v(4)?,
            ma_24v: v(5)?,
        })
    }
}

/// A catalog device: one node and its channels (numbered from 1).
pub struct Device {
    model: &'static DeviceModel,
    node: Arc<Node>,
    channels: Vec<Channel>,
}

impl Device {
    pub fn new(kind: DeviceKind, id: NodeId, session: &Session) -> Self {
        let model = kind.model();
        let node = Node::new(id, session);
        let channels = (1..=model.channels)
            .map(|n| Channel::new(node.clone(), model, n))
            .collect();
        Self {
            model,
            node,
            channels,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.model.kind
    }

    pub fn model(&self) -> &'static DeviceModel {
        self.model
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, number: u8) -> Option<&Channel> {
        self.channels.get(usize::from(number).checked_sub(1)?)
    }

    fn first_channel(&self) -> Result<&Channel> {
        self.channels
            .first()
            .ok_or(NodeError::Unsupported("device has no channels"))
    }

    pub async fn check_identity(&self) -> Result<NodeInfo> {
        self.first_channel()?.check_identity().await
    }

    pub async fn configure_sample_interval(&self, interval: u16) -> Result<()> {
        if !self.model.sample_interval {
            return Err(NodeError::Unsupported("device has no sample interval"));
        }
        let value = SAMPLE_INTERVAL.value(SAMPLE_INTERVAL.field, u32::from(interval))?;
        self.check_identity().await?;
        self.node
            .register_access(SAMPLE_INTERVAL.field, Some(&value))
            .await?;
        Ok(())
    }

    pub async fn read_supply(&self) -> Result<Vpe6010Input> {
        if self.model.kind != DeviceKind::Vpe6010 {
            return Err(NodeError::Unsupported("supply readings are 6010 only"));
        }
        let values = self.first_channel()?.read().await?;
        Vpe6010Input::from_values(&values).ok_or(NodeError::Encoding(
            crate::EncodingError::Length {
                expected: 6,
                actual: values.len(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::SessionConfig;
    use node_transport::{MockIdentity, MockTransport};

    fn id(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    fn device(kind: DeviceKind) -> (Arc<MockTransport>, Device) {
        let bus = Arc::new(MockTransport::new());
        bus.add_node(id(10), &MockIdentity::named(kind.model().identity));
        let session = Session::new(bus.clone(), SessionConfig::default());
        (bus, Device::new(kind, id(10), &session))
    }

    #[test]
    fn table_is_consistent() {
        let kinds = [
            DeviceKind::Vpe6010,
            DeviceKind::Vpe6030,
            DeviceKind::Vpe6040,
            DeviceKind::Vpe6050,
            DeviceKind::Vpe6060,
            DeviceKind::Vpe6070,
            DeviceKind::Vpe6080,
            DeviceKind::Vpe6090,
            DeviceKind::Vpe6180,
            DeviceKind::Vpe6190,
        ];
        for kind in kinds {
            let model = kind.model();
            assert_eq!(model.kind, kind);
            assert!((1..=8).contains(&model.channels));
            assert!(model.input.is_some() || model.output.is_some());
            assert_eq!(DeviceKind::from_identity(model.identity), Some(kind));
            for spec in model.settings {
                assert!(RegisterValue::unsigned(spec.ty, &[spec.max]).is_some());
            }
        }
        assert_eq!(DeviceKind::from_identity("com.example.other"), None);
    }

    #[test]
    fn channel_register_names() {
        let (_, dev) = device(DeviceKind::Vpe6080);
        assert_eq!(dev.channels().len(), 8);
        let ch8 = dev.channel(8).unwrap();
        assert_eq!(ch8.register_name(&dev.model().settings[2]), "ch8.t0");
        assert!(dev.channel(0).is_none());
        assert!(dev.channel(9).is_none());
        assert_eq!(
            dev.channel(1).unwrap().register_name(&SAMPLE_INTERVAL),
            "sample_interval"
        );
    }

    #[test]
    fn typed_settings() {
        let cfg = Vpe6060Config {
            mode: Vpe6060Mode::PulseCounter,
            polarity: Vpe6060Polarity::Falling,
            bias: Vpe6060Bias::Npn,
        };
        assert_eq!(cfg.settings(), [2, 1, 2]);
        assert_eq!(Vpe6080Thermistor::default().settings(), [1, 3380, 29814]);
        assert_eq!(Vpe6040Mode::Volt10 as u32, 2);
        assert_eq!(Vpe6050Mode::Sink as u32, 1);
    }

    #[tokio::test]
    async fn sample_interval_is_device_wide() {
        let (bus, dev) = device(DeviceKind::Vpe6180);
        dev.configure_sample_interval(250).await.unwrap();
        let stored = codec::decode(&bus.register(id(10), "sample_interval").unwrap()).unwrap();
        assert_eq!(stored, RegisterValue::Uint16(vec![250]));

        let (_, no_interval) = device(DeviceKind::Vpe6030);
        assert!(matches!(
            no_interval.configure_sample_interval(250).await,
            Err(NodeError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn thermistor_configure_round_trip() {
        let (bus, dev) = device(DeviceKind::Vpe6080);
        let settings = Vpe6080Thermistor {
            enabled: true,
            beta: 3950,
            t0_kelvin: 300.0,
        }
        .settings();
        dev.channel(5).unwrap().configure(&settings).await.unwrap();
        let stored = codec::decode(&bus.register(id(10), "ch5.t0").unwrap()).unwrap();
        assert_eq!(stored, RegisterValue::Uint16(vec![30000]));
    }

    #[tokio::test]
    async fn supply_readings() {
        let (bus, dev) = device(DeviceKind::Vpe6010);
        let record = codec::encode(&RegisterValue::Uint16(vec![100, 5000, 24000, 23900, 24100, 300]))
            .unwrap();
        bus.set_register(id(10), "input", record.to_vec());
        let supply = dev.read_supply().await.unwrap();
        assert_eq!(supply.mv_5v, 5000);
        assert_eq!(supply.ma_24v, 300);
    }
}
