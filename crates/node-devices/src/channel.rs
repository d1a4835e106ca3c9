use crate::catalog::{DeviceModel, RegisterSpec, Scope};
use crate::codec::RegisterValue;
use crate::{EncodingError, Node, NodeError, NodeInfo, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

/// One physical I/O line of a catalog device.
///
/// Every operation verifies the node's identity against the model first, so a
/// device-specific register name is never sent to a different kind of hardware.
#[derive(Clone)]
pub struct Channel {
    node: Arc<Node>,
    model: &'static DeviceModel,
    number: u8,
}

impl Channel {
    pub fn new(node: Arc<Node>, model: &'static DeviceModel, number: u8) -> Self {
        Self {
            node,
            model,
            number,
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn expected_identity(&self) -> &'static str {
        self.model.identity
    }

    pub fn register_name(&self, spec: &RegisterSpec) -> String {
        match spec.scope {
            Scope::Channel => format!("ch{}.{}", self.number, spec.field),
            Scope::Device => spec.field.to_string(),
        }
    }

    pub async fn check_identity(&self) -> Result<NodeInfo> {
        let info = self.node.get_info().await?;
        if info.name != self.model.identity {
            return Err(NodeError::WrongNode {
                expected: self.model.identity.to_string(),
                actual: info.name,
            });
        }
        Ok(info)
    }

    /// Current value of the channel's input, or of its output for output-only models.
    pub async fn read(&self) -> Result<Vec<u32>> {
        let spec = self
            .model
            .input
            .as_ref()
            .or(self.model.output.as_ref())
            .ok_or(NodeError::Unsupported("channel has no readable register"))?;
        self.check_identity().await?;
        let register = self.register_name(spec);
        let value = self.node.register_access(&register, None).await?;
        if value.ty() != spec.ty {
            return Err(NodeError::UnexpectedType {
                register,
                expected: spec.ty,
                actual: value.ty(),
            });
        }
        value.as_unsigned().ok_or(NodeError::UnexpectedType {
            register,
            expected: spec.ty,
            actual: value.ty(),
        })
    }

    pub async fn read_one(&self) -> Result<u32> {
        self.read().await?.first().copied().ok_or(NodeError::Encoding(
            EncodingError::Length {
                expected: 1,
                actual: 0,
            },
        ))
    }

    pub async fn write(&self, value: u32) -> Result<()> {
        let spec = self
            .model
            .output
            .as_ref()
            .ok_or(NodeError::Unsupported("channel has no output"))?;
        let register = self.register_name(spec);
        let request = spec.value(&register, value)?;
        self.check_identity().await?;
        self.node.register_access(&register, Some(&request)).await?;
        Ok(())
    }

    /// Apply the model's channel settings, `values` in table order. All values are
    /// validated before anything is sent; the writes then go out concurrently and the
    /// first failure is reported. Writes that succeeded stay applied.
    pub async fn configure(&self, values: &[u32]) -> Result<()> {
        let settings = self.model.settings;
        if settings.is_empty() {
            return Err(NodeError::Unsupported("channel has no settings"));
        }
        if values.len() != settings.len() {
            return Err(NodeError::Unsupported("wrong number of channel settings"));
        }
        let requests = settings
            .iter()
            .zip(values)
            .map(|(spec, &v)| {
                let register = self.register_name(spec);
                let value = spec.value(&register, v)?;
                Ok((register, value))
            })
            .collect::<Result<Vec<(String, RegisterValue)>>>()?;

        self.check_identity().await?;
        debug!(node = %self.node.id(), channel = self.number, "configuring channel");
        let results = join_all(
            requests
                .iter()
                .map(|(register, value)| self.node.register_access(register, Some(value))),
        )
        .await;
        for result in results {
            result?;
        }
        Ok(())
    }
}
