use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use node_devices as nd;
use node_devices::{
    codec, Fleet, FleetConfig, Node, NodeEntry, RegisterType, RegisterValue, SubscriberKey,
};
use node_transport::{MockIdentity, MockTransport, NodeId, Status};

#[derive(Parser, Debug)]
#[command(
    name = "nodectl",
    version,
    about = "Field node operator CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Fleet descriptor (YAML or JSON); a built-in demo fleet is used otherwise
    #[arg(long, global = true)]
    fleet: Option<String>,

    /// Print Prometheus metrics after the command
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show a node's identity
    Info {
        #[arg(long)]
        node: u8,
        /// Emit JSON instead of text
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// List a node's register names
    Registers {
        #[arg(long)]
        node: u8,
    },
    /// Read a raw register
    Read {
        #[arg(long)]
        node: u8,
        #[arg(long)]
        register: String,
    },
    /// Write a channel output through the device catalog
    Write {
        #[arg(long)]
        node: u8,
        /// Channel number, starting at 1
        #[arg(long)]
        channel: u8,
        #[arg(long)]
        value: u32,
    },
    /// Write a raw typed register
    WriteRegister {
        #[arg(long)]
        node: u8,
        #[arg(long)]
        register: String,
        #[arg(long = "type", value_enum)]
        ty: TypeArg,
        /// Element values; integers accept a 0x prefix, float16 takes raw bits
        #[arg(long = "value", num_args = 1.., required = true, allow_hyphen_values = true)]
        values: Vec<String>,
    },
    /// Persist the node's current settings
    Store {
        #[arg(long)]
        node: u8,
    },
    /// Restore the node's factory settings
    FactoryReset {
        #[arg(long)]
        node: u8,
    },
    /// Restart a node
    Reboot {
        #[arg(long)]
        node: u8,
        /// Delay before the restart, in seconds
        #[arg(long)]
        delay: Option<u64>,
    },
    /// Print status changes as they arrive
    Monitor {
        /// Number of changes to print before exiting
        #[arg(long, default_value_t = 6usize)]
        count: usize,
    },
    /// Validate a fleet descriptor and check it against the nodes on the bus
    FleetValidate {
        #[arg(long)]
        file: String,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum TypeArg {
    String,
    Unstructured,
    Bit,
    Int64,
    Int32,
    Int16,
    Int8,
    Uint64,
    Uint32,
    Uint16,
    Uint8,
    Float64,
    Float32,
    Float16,
}

impl From<TypeArg> for RegisterType {
    fn from(ty: TypeArg) -> Self {
        match ty {
            TypeArg::String => RegisterType::String,
            TypeArg::Unstructured => RegisterType::Unstructured,
            TypeArg::Bit => RegisterType::Bit,
            TypeArg::Int64 => RegisterType::Int64,
            TypeArg::Int32 => RegisterType::Int32,
            TypeArg::Int16 => RegisterType::Int16,
            TypeArg::Int8 => RegisterType::Int8,
            TypeArg::Uint64 => RegisterType::Uint64,
            TypeArg::Uint32 => RegisterType::Uint32,
            TypeArg::Uint16 => RegisterType::Uint16,
            TypeArg::Uint8 => RegisterType::Uint8,
            TypeArg::Float64 => RegisterType::Float64,
            TypeArg::Float32 => RegisterType::Float32,
            TypeArg::Float16 => RegisterType::Float16,
        }
    }
}

#[derive(Serialize)]
struct InfoView {
    node: u8,
    name: String,
    protocol_version: String,
    hardware_version: String,
    software_version: String,
    software_vcs_revision_id: u64,
    unique_id: String,
    software_image_crc: u64,
}

#[derive(Serialize)]
struct ChangeRecord {
    ts: String,
    node: u8,
    old_uptime: u32,
    new_uptime: u32,
    mode: u8,
    health: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let config = match cli.fleet.as_deref() {
        Some(path) => nd::load_fleet_file(path)?,
        None => demo_fleet(),
    };
    let bus = Arc::new(MockTransport::new());
    seed_mock(&bus, &config)?;
    let hub = nd::MetricsHub::new().map_err(|e| anyhow!(e))?;
    let fleet = Fleet::with_metrics(bus.clone(), &config, hub)?;

    match cli.command {
        Commands::Info { node, json } => cmd_info(&fleet, node, json).await?,
        Commands::Registers { node } => cmd_registers(&fleet, node).await?,
        Commands::Read { node, register } => cmd_read(&fleet, node, &register).await?,
        Commands::Write {
            node,
            channel,
            value,
        } => cmd_write(&fleet, node, channel, value).await?,
        Commands::WriteRegister {
            node,
            register,
            ty,
            values,
        } => cmd_write_register(&fleet, node, &register, ty.into(), &values).await?,
        Commands::Store { node } => {
            node_handle(&fleet, node)?.store_persistent_states().await?;
            println!("ok: node {node} settings stored");
        }
        Commands::FactoryReset { node } => {
            node_handle(&fleet, node)?.factory_reset().await?;
            println!("ok: node {node} reset to factory settings");
        }
        Commands::Reboot { node, delay } => cmd_reboot(&fleet, node, delay).await?,
        Commands::Monitor { count } => cmd_monitor(&fleet, &bus, count).await?,
        Commands::FleetValidate { file, json } => fleet_validate(&file, json).await?,
    }

    if cli.metrics {
        if let Some(hub) = fleet.session.metrics() {
            print!("{}", hub.encode_text());
        }
    }
    Ok(())
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn demo_fleet() -> FleetConfig {
    let entry = |id, kind, label: &str| NodeEntry {
        id,
        kind,
        label: Some(label.to_string()),
    };
    FleetConfig {
        list_registers_limit: None,
        nodes: vec![
            entry(3, nd::DeviceKind::Vpe6060, "pump counters"),
            entry(12, nd::DeviceKind::Vpe6080, "tank thermistors"),
            entry(20, nd::DeviceKind::Vpe6030, "valve relays"),
        ],
    }
}

/// Populate the mock bus with every configured node reporting its catalog identity,
/// plus a plausible input reading on each channel.
fn seed_mock(bus: &MockTransport, config: &FleetConfig) -> Result<()> {
    for entry in &config.nodes {
        let id = node_id(entry.id)?;
        let model = entry.kind.model();
        bus.add_node(id, &MockIdentity::named(model.identity));
        let Some(input) = model.input else { continue };
        for ch in 1..=model.channels {
            let sample = 1000 + u32::from(entry.id) * 10 + u32::from(ch);
            let name = match input.scope {
                nd::catalog::Scope::Channel => format!("ch{ch}.{}", input.field),
                nd::catalog::Scope::Device => input.field.to_string(),
            };
            let value = RegisterValue::unsigned(input.ty, &[sample])
                .ok_or_else(|| anyhow!("input of {:?} is not unsigned", entry.kind))?;
            bus.set_register(id, &name, codec::encode(&value)?.to_vec());
        }
    }
    Ok(())
}

fn node_id(raw: u8) -> Result<NodeId> {
    NodeId::new(raw).ok_or_else(|| anyhow!("node id {raw} out of range 0..={}", NodeId::MAX))
}

fn device(fleet: &Fleet, raw: u8) -> Result<&nd::Device> {
    fleet
        .get(node_id(raw)?)
        .map(|entry| &entry.device)
        .ok_or_else(|| anyhow!("node {raw} is not in the fleet"))
}

/// The fleet's node for `raw`, or a bare node for ids outside the fleet.
fn node_handle(fleet: &Fleet, raw: u8) -> Result<Arc<Node>> {
    let id = node_id(raw)?;
    Ok(match fleet.get(id) {
        Some(entry) => entry.device.node().clone(),
        None => Node::new(id, &fleet.session),
    })
}

async fn cmd_info(fleet: &Fleet, raw: u8, json: bool) -> Result<()> {
    let info = node_handle(fleet, raw)?.get_info().await?;
    let version = |v: nd::Version| format!("{}.{}", v.major, v.minor);
    let view = InfoView {
        node: raw,
        name: info.name.clone(),
        protocol_version: version(info.protocol_version),
        hardware_version: version(info.hardware_version),
        software_version: version(info.software_version),
        software_vcs_revision_id: info.software_vcs_revision_id,
        unique_id: hex(&info.unique_id),
        software_image_crc: info.software_image_crc,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("node {}\t{}", view.node, view.name);
        println!("  protocol {}", view.protocol_version);
        println!("  hardware {}", view.hardware_version);
        println!("  software {} (rev {:x})", view.software_version, view.software_vcs_revision_id);
        println!("  unique id {}", view.unique_id);
    }
    Ok(())
}

async fn cmd_registers(fleet: &Fleet, raw: u8) -> Result<()> {
    let names = node_handle(fleet, raw)?.list_registers().await?;
    for name in &names {
        println!("{name}");
    }
    info!(node = raw, count = names.len(), "registers listed");
    Ok(())
}

async fn cmd_read(fleet: &Fleet, raw: u8, register: &str) -> Result<()> {
    let value = node_handle(fleet, raw)?
        .register_access(register, None)
        .await
        .with_context(|| format!("reading {register} on node {raw}"))?;
    println!("{register}\t{}\t{}", value.ty(), format_value(&value));
    Ok(())
}

async fn cmd_write(fleet: &Fleet, raw: u8, channel: u8, value: u32) -> Result<()> {
    let dev = device(fleet, raw)?;
    let ch = dev
        .channel(channel)
        .ok_or_else(|| anyhow!("{:?} has no channel {channel}", dev.kind()))?;
    ch.write(value).await?;
    println!("ok: node {raw} ch{channel} <- {value}");
    Ok(())
}

async fn cmd_write_register(
    fleet: &Fleet,
    raw: u8,
    register: &str,
    ty: RegisterType,
    values: &[String],
) -> Result<()> {
    let value = parse_value(ty, values)?;
    let echoed = node_handle(fleet, raw)?
        .register_access(register, Some(&value))
        .await
        .with_context(|| format!("writing {register} on node {raw}"))?;
    println!("{register}\t{}\t{}", echoed.ty(), format_value(&echoed));
    Ok(())
}

async fn cmd_reboot(fleet: &Fleet, raw: u8, delay: Option<u64>) -> Result<()> {
    let reply = node_handle(fleet, raw)?
        .reboot(delay.map(Duration::from_secs))
        .await;
    if reply.is_err() {
        return Err(anyhow!("node {raw} refused restart: code {}", reply.code));
    }
    println!("ok: node {raw} restarting");
    Ok(())
}

/// Subscribe to every node and replay a short status history through the mock bus,
/// ending with a restart of the first node.
async fn cmd_monitor(fleet: &Fleet, bus: &MockTransport, count: usize) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    fleet.session.registry().subscribe(
        SubscriberKey::Any,
        nd::subscriber_fn(move |change| {
            let tx = tx.clone();
            async move {
                tx.send(change).map_err(|_| anyhow!("monitor closed"))?;
                Ok(())
            }
        }),
    );
    let delivery = fleet
        .session
        .start()
        .ok_or_else(|| anyhow!("status stream already taken"))?;

    let ids: Vec<NodeId> = fleet.devices.keys().copied().collect();
    if ids.is_empty() {
        return Ok(());
    }
    let mut uptime = vec![0u32; ids.len()];
    for round in 0..count {
        let slot = round % ids.len();
        let old = Status {
            uptime: uptime[slot],
            ..Status::default()
        };
        let restart = round + 1 == count;
        let new = Status {
            uptime: if restart { 0 } else { uptime[slot] + 10 },
            ..Status::default()
        };
        uptime[slot] = new.uptime;
        bus.push_status(ids[slot], old, new)?;
    }

    let mut printed = 0;
    while printed < count {
        let recv = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        let Ok(Some(change)) = recv else {
            warn!(printed, "monitor ended early");
            break;
        };
        let record = ChangeRecord {
            ts: change
                .received
                .0
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            node: change.node_id.raw(),
            old_uptime: change.old.uptime,
            new_uptime: change.new.uptime,
            mode: change.new.mode,
            health: change.new.health,
        };
        println!("{}", serde_json::to_string(&record)?);
        printed += 1;
    }
    delivery.abort();
    Ok(())
}

/// Load `file`, then bring its nodes up on a fresh mock bus and check every identity
/// through the catalog.
async fn fleet_validate(file: &str, json: bool) -> Result<()> {
    let config = nd::load_fleet_file(file)?;
    println!("ok: {} nodes", config.nodes.len());
    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    }
    let bus = Arc::new(MockTransport::new());
    seed_mock(&bus, &config)?;
    let fleet = Fleet::from_config(bus, &config)?;
    let mut failed = 0;
    for (id, result) in fleet.verify().await {
        match result {
            Ok(()) => println!("{id}\tok"),
            Err(e) => {
                failed += 1;
                println!("{id}\t{e}");
            }
        }
    }
    if failed > 0 {
        return Err(anyhow!("{failed} nodes failed identity check"));
    }
    Ok(())
}

/// Integer in decimal or `0x` hex, optionally negative.
fn parse_int<T: TryFrom<i128>>(s: &str) -> Result<T> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i128::from_str_radix(hex, 16),
        None => digits.parse::<i128>(),
    }
    .with_context(|| format!("invalid value {s:?}"))?;
    let value = if negative { -magnitude } else { magnitude };
    T::try_from(value).map_err(|_| anyhow!("value {s} out of range"))
}

fn parse_float<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.parse::<T>()
        .map_err(|_| anyhow!("invalid value {s:?}"))
}

fn parse_bit(s: &str) -> Result<bool> {
    match s {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(anyhow!("invalid bit {other:?}")),
    }
}

fn parse_value(ty: RegisterType, values: &[String]) -> Result<RegisterValue> {
    fn all<T>(values: &[String], parse: fn(&str) -> Result<T>) -> Result<Vec<T>> {
        values.iter().map(|s| parse(s)).collect()
    }
    Ok(match ty {
        RegisterType::Empty => RegisterValue::Empty,
        RegisterType::String => RegisterValue::String(values.join(" ")),
        RegisterType::Unstructured => RegisterValue::Unstructured(all(values, parse_int::<u8>)?),
        RegisterType::Bit => RegisterValue::Bit(all(values, parse_bit)?),
        RegisterType::Int64 => RegisterValue::Int64(all(values, parse_int::<i64>)?),
        RegisterType::Int32 => RegisterValue::Int32(all(values, parse_int::<i32>)?),
        RegisterType::Int16 => RegisterValue::Int16(all(values, parse_int::<i16>)?),
        RegisterType::Int8 => RegisterValue::Int8(all(values, parse_int::<i8>)?),
        RegisterType::Uint64 => RegisterValue::Uint64(all(values, parse_int::<u64>)?),
        RegisterType::Uint32 => RegisterValue::Uint32(all(values, parse_int::<u32>)?),
        RegisterType::Uint16 => RegisterValue::Uint16(all(values, parse_int::<u16>)?),
        RegisterType::Uint8 => RegisterValue::Uint8(all(values, parse_int::<u8>)?),
        RegisterType::Float64 => RegisterValue::Float64(all(values, parse_float::<f64>)?),
        RegisterType::Float32 => RegisterValue::Float32(all(values, parse_float::<f32>)?),
        RegisterType::Float16 => RegisterValue::Float16(all(values, parse_int::<u16>)?),
    })
}

fn format_value(value: &RegisterValue) -> String {
    fn join<T: ToString>(items: &[T]) -> String {
        items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
    match value {
        RegisterValue::Empty => String::new(),
        RegisterValue::String(s) => format!("{s:?}"),
        RegisterValue::Unstructured(b) => hex(b),
        RegisterValue::Bit(v) => join(v),
        RegisterValue::Int64(v) => join(v),
        RegisterValue::Int32(v) => join(v),
        RegisterValue::Int16(v) => join(v),
        RegisterValue::Int8(v) => join(v),
        RegisterValue::Uint64(v) => join(v),
        RegisterValue::Uint32(v) => join(v),
        RegisterValue::Uint16(v) => join(v),
        RegisterValue::Uint8(v) => join(v),
        RegisterValue::Float64(v) => join(v),
        RegisterValue::Float32(v) => join(v),
        RegisterValue::Float16(v) => join(v),
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = core::fmt::Write::write_fmt(&mut out, format_args!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_values() {
        assert_eq!(format_value(&RegisterValue::Uint16(vec![1, 2, 3])), "1 2 3");
        assert_eq!(format_value(&RegisterValue::Bit(vec![true, false])), "true false");
        assert_eq!(format_value(&RegisterValue::Unstructured(vec![0xab, 1])), "ab01");
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_typed_values() {
        assert_eq!(
            parse_value(RegisterType::Uint16, &strings(&["1", "0x10", "65535"])).unwrap(),
            RegisterValue::Uint16(vec![1, 16, 65535])
        );
        assert_eq!(
            parse_value(RegisterType::Int8, &strings(&["-128", "-0x1"])).unwrap(),
            RegisterValue::Int8(vec![-128, -1])
        );
        assert_eq!(
            parse_value(RegisterType::String, &strings(&["hello", "node"])).unwrap(),
            RegisterValue::String("hello node".into())
        );
        assert_eq!(
            parse_value(RegisterType::Bit, &strings(&["1", "false"])).unwrap(),
            RegisterValue::Bit(vec![true, false])
        );
        assert_eq!(
            parse_value(RegisterType::Float32, &strings(&["2.5"])).unwrap(),
            RegisterValue::Float32(vec![2.5])
        );
        assert!(parse_value(RegisterType::Uint8, &strings(&["256"])).is_err());
        assert!(parse_value(RegisterType::Uint32, &strings(&["-1"])).is_err());
        assert!(parse_value(RegisterType::Uint32, &strings(&["ten"])).is_err());
    }

    #[tokio::test]
    async fn raw_register_write_and_commands_reach_the_node() {
        let bus = Arc::new(MockTransport::new());
        let config = demo_fleet();
        seed_mock(&bus, &config).unwrap();
        bus.add_node(NodeId::new(77).unwrap(), &MockIdentity::named("other"));
        let fleet = Fleet::from_config(bus.clone(), &config).unwrap();

        cmd_write_register(&fleet, 77, "gain", RegisterType::Int16, &strings(&["-3"]))
            .await
            .unwrap();
        let stored = bus.register(NodeId::new(77).unwrap(), "gain").unwrap();
        assert_eq!(codec::decode(&stored).unwrap(), RegisterValue::Int16(vec![-3]));

        let node = node_handle(&fleet, 3).unwrap();
        node.store_persistent_states().await.unwrap();
        node.factory_reset().await.unwrap();
        let codes: Vec<u16> = bus.commands().iter().map(|(_, code, _)| *code).collect();
        assert_eq!(codes, vec![65530, 65532]);
    }

    #[tokio::test]
    async fn fleet_file_is_checked_on_its_own_bus() {
        let path = std::env::temp_dir().join(format!("nodectl-fleet-{}.yaml", std::process::id()));
        std::fs::write(&path, "nodes:\n  - {id: 50, kind: vpe6030}\n").unwrap();
        let result = fleet_validate(path.to_str().unwrap(), false).await;
        std::fs::remove_file(&path).unwrap();
        result.unwrap();
    }

    #[tokio::test]
    async fn demo_fleet_checks_out() {
        let bus = Arc::new(MockTransport::new());
        let config = demo_fleet();
        seed_mock(&bus, &config).unwrap();
        let fleet = Fleet::from_config(bus, &config).unwrap();
        assert!(fleet.verify().await.iter().all(|(_, r)| r.is_ok()));
        let counters = device(&fleet, 3).unwrap();
        assert_eq!(counters.channel(2).unwrap().read_one().await.unwrap(), 1032);
    }
}
