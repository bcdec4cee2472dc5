use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use acu_control::{
    ControlState, Device, DeviceIdentity, FrameBuilder, MetricsHub, ParseController, PortMap,
};
use acu_protocol::{fixed, CodecKind, FrameProtocol, TemplateLoader, TemplateSource};
use udp_transport::CommunicationController;

mod session;
use session::SessionConfig;

#[derive(Parser, Debug)]
#[command(
    name = "acu",
    version,
    about = "Auxiliary converter control unit simulator",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Codec {
    Template,
    Fixed,
}

impl From<Codec> for CodecKind {
    fn from(c: Codec) -> Self {
        match c {
            Codec::Template => CodecKind::Template,
            Codec::Fixed => CodecKind::Fixed,
        }
    }
}

/// Operator commands applied to the control state before building.
#[derive(Args, Debug, Default)]
struct CommandArgs {
    /// Command bit as BYTE:BIT (repeatable)
    #[arg(long = "bit")]
    bits: Vec<String>,
    /// Frequency in Hz as OFFSET=VALUE (repeatable)
    #[arg(long)]
    frequency: Vec<String>,
    /// Start time in seconds as OFFSET=VALUE (repeatable)
    #[arg(long)]
    start_time: Vec<String>,
    /// Voltage in volts as OFFSET=VALUE (repeatable)
    #[arg(long)]
    voltage: Vec<String>,
    /// Isolation flag index to set (repeatable)
    #[arg(long)]
    isolation: Vec<u8>,
    /// Start flag index to set (repeatable)
    #[arg(long)]
    start: Vec<u8>,
    /// CHU flag index to set (repeatable)
    #[arg(long)]
    chu: Vec<u8>,
    /// Redundant flag index to set (repeatable)
    #[arg(long)]
    redundant: Vec<u8>,
    /// Battery temperature in °C
    #[arg(long)]
    battery_temp: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a frame template and list its categories
    TemplateValidate {
        /// Template file; defaults to the embedded template
        #[arg(long)]
        file: Option<PathBuf>,
        /// Print the validated template as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Build one send frame and print it as hex
    FrameBuild {
        /// Device category (INV, CHU, BCC, DUMMY)
        #[arg(long)]
        category: String,
        #[arg(long, value_enum, default_value_t = Codec::Template)]
        codec: Codec,
        /// Template file for the template codec
        #[arg(long)]
        template: Option<PathBuf>,
        /// Life signal carried by the frame
        #[arg(long, default_value_t = 1u16)]
        life: u16,
        #[command(flatten)]
        commands: CommandArgs,
    },
    /// Decode a receive frame as if it arrived from PORT
    FrameDecode {
        /// Source port of the datagram
        #[arg(long)]
        port: u16,
        /// Frame bytes in hex, compact (0A0B..) or one byte per argument
        #[arg(long, num_args = 1.., required = true)]
        data: Vec<String>,
        #[arg(long, value_enum, default_value_t = Codec::Template)]
        codec: Codec,
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Run a live UDP session: build and send frames, decode what comes back
    Run {
        /// Session YAML file
        #[arg(long)]
        session: Option<PathBuf>,
        #[arg(long)]
        target_ip: Option<IpAddr>,
        #[arg(long)]
        target_port: Option<u16>,
        #[arg(long)]
        send_port: Option<u16>,
        #[arg(long)]
        receive_port: Option<u16>,
        /// Category of the simulated device
        #[arg(long)]
        category: Option<String>,
        #[arg(long, value_enum)]
        codec: Option<Codec>,
        #[arg(long)]
        template: Option<PathBuf>,
        /// Milliseconds between send cycles
        #[arg(long)]
        period_ms: Option<u64>,
        /// Number of send cycles
        #[arg(long)]
        cycles: Option<u32>,
        /// Print Prometheus metrics when the session ends
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
        #[command(flatten)]
        commands: CommandArgs,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::TemplateValidate { file, json } => template_validate(file, json),
        Commands::FrameBuild {
            category,
            codec,
            template,
            life,
            commands,
        } => frame_build(&category, codec, template, life, &commands),
        Commands::FrameDecode {
            port,
            data,
            codec,
            template,
        } => frame_decode(port, &data, codec, template),
        Commands::Run {
            session,
            target_ip,
            target_port,
            send_port,
            receive_port,
            category,
            codec,
            template,
            period_ms,
            cycles,
            metrics,
            commands,
        } => {
            let mut cfg = match session {
                Some(path) => SessionConfig::load(&path)?,
                None => SessionConfig::default(),
            };
            if let Some(ip) = target_ip {
                cfg.device.ip = ip;
            }
            if let Some(port) = target_port {
                cfg.device.send_port = port;
            }
            if let Some(port) = send_port {
                cfg.transport.send_port = port;
            }
            if let Some(port) = receive_port {
                cfg.transport.receive_port = port;
            }
            if let Some(category) = category {
                cfg.device.category = category;
            }
            if let Some(codec) = codec {
                cfg.codec = codec.into();
            }
            if template.is_some() {
                cfg.template = template;
            }
            if let Some(ms) = period_ms {
                cfg.period_ms = ms;
            }
            if let Some(n) = cycles {
                cfg.cycles = n;
            }
            run_session(&cfg, &commands, metrics)
        }
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn loader_for(template: Option<PathBuf>) -> TemplateLoader {
    match template {
        Some(path) => TemplateLoader::new(TemplateSource::File(path)),
        None => TemplateLoader::embedded(),
    }
}

fn protocol_for(
    codec: CodecKind,
    category: &str,
    loader: &TemplateLoader,
) -> Result<Arc<dyn FrameProtocol>> {
    match codec {
        CodecKind::Template => {
            let protocol: Arc<dyn FrameProtocol> = loader.protocol(category)?;
            Ok(protocol)
        }
        CodecKind::Fixed => fixed::protocol_for(category)
            .ok_or_else(|| anyhow!("no fixed codec for category '{category}'")),
    }
}

fn parse_controller(
    ports: PortMap,
    codec: CodecKind,
    loader: &TemplateLoader,
    metrics: Option<&MetricsHub>,
) -> Result<ParseController> {
    let mut parser = ParseController::new(ports);
    if let Some(hub) = metrics {
        parser = parser.with_metrics(hub.clone());
    }
    match codec {
        CodecKind::Template => {
            parser.register_template_categories(loader)?;
        }
        CodecKind::Fixed => {
            for category in ["INV", "CHU", "BCC", "DUMMY"] {
                if let Some(protocol) = fixed::protocol_for(category) {
                    parser.register(protocol);
                }
            }
        }
    }
    Ok(parser)
}

fn template_validate(file: Option<PathBuf>, json: bool) -> Result<()> {
    let source = match &file {
        Some(path) => path.display().to_string(),
        None => "embedded".to_string(),
    };
    let loader = loader_for(file);
    let spec = loader
        .spec()
        .with_context(|| format!("validating template ({source})"))?;
    println!(
        "ok: {} v{} (send={} receive={} ops={})",
        spec.name,
        spec.version,
        spec.frame_length_send,
        spec.frame_length_receive,
        spec.send_operations.len()
    );
    for (id, cat) in &spec.categories {
        println!(
            "{id}\t{}\treceive={}\tparams={}\tflags={}\tfault_bytes={}",
            cat.name,
            spec.receive_length(cat),
            cat.run_parameters.len(),
            cat.status_flags.len(),
            cat.faults.len()
        );
    }
    if json {
        println!("{}", serde_json::to_string_pretty(spec.as_ref())?);
    }
    Ok(())
}

fn frame_build(
    category: &str,
    codec: Codec,
    template: Option<PathBuf>,
    life: u16,
    commands: &CommandArgs,
) -> Result<()> {
    let loader = loader_for(template);
    let protocol = protocol_for(codec.into(), category, &loader)?;
    let state = Arc::new(ControlState::new());
    commands.apply(&state)?;
    let identity = DeviceIdentity {
        name: format!("{category}1"),
        ip: IpAddr::from([127, 0, 0, 1]),
        send_port: 0,
        receive_port: 0,
        category: category.to_string(),
    };
    // update_life() increments before encoding
    let device = Arc::new(Device::resume(identity, life.wrapping_sub(1)));
    let builder = FrameBuilder::new(state, device, protocol);
    let frame = builder.build()?;
    println!("{} bytes, life={life}", frame.len());
    print!("{}", hex_dump(&frame));
    Ok(())
}

fn frame_decode(port: u16, data: &[String], codec: Codec, template: Option<PathBuf>) -> Result<()> {
    let bytes = parse_hex(data)?;
    let loader = loader_for(template);
    let parser = parse_controller(PortMap::default(), codec.into(), &loader, None)?;
    let report = parser.parse(&bytes, port)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_session(cfg: &SessionConfig, commands: &CommandArgs, metrics: bool) -> Result<()> {
    let loader = loader_for(cfg.template.clone());
    let hub = if metrics {
        Some(MetricsHub::new().map_err(|e| anyhow!("metrics init error: {e}"))?)
    } else {
        None
    };

    let state = Arc::new(ControlState::new());
    commands.apply(&state)?;
    let device = Arc::new(Device::new(cfg.device.clone()));
    let protocol = protocol_for(cfg.codec, &cfg.device.category, &loader)?;
    let mut builder = FrameBuilder::new(Arc::clone(&state), Arc::clone(&device), protocol);
    if let Some(hub) = &hub {
        builder = builder.with_metrics(hub.clone());
    }

    let ports = if cfg.devices.is_empty() {
        PortMap::default()
    } else {
        PortMap::from_devices(&cfg.devices)
    };
    let parser = parse_controller(ports, cfg.codec, &loader, hub.as_ref())?;

    let ctl = CommunicationController::new(cfg.comm_config());
    let addrs = ctl.setup().context("setting up UDP sockets")?;
    ctl.start_receive_loop()?;
    info!(
        send = %addrs.send,
        receive = %addrs.receive,
        target = %ctl.config().target_addr(),
        device = device.name(),
        "session started"
    );

    let rx = ctl.receiver();
    let period = Duration::from_millis(cfg.period_ms.max(1));
    for _ in 0..cfg.cycles {
        let deadline = Instant::now() + period;
        let frame = builder.build()?;
        if let Err(e) = ctl.send(&frame) {
            warn!("send failed, retrying next cycle: {e}");
        }
        while let Ok(datagram) = rx.recv_deadline(deadline) {
            let report = parser.parse(&datagram.data, datagram.from.port())?;
            if report.device == device.name() {
                device.touch();
            }
            println!("{}", serde_json::to_string(&report)?);
        }
    }
    ctl.stop();

    info!(
        life = device.life_signal(),
        dropped = ctl.dropped_datagrams(),
        "session finished"
    );
    if let Some(hub) = &hub {
        print!("{}", hub.encode_text());
    }
    Ok(())
}

impl CommandArgs {
    fn apply(&self, state: &ControlState) -> Result<()> {
        let bits = self
            .bits
            .iter()
            .map(|s| parse_bit(s))
            .collect::<Result<Vec<_>>>()?;
        let frequency = parse_assignments(&self.frequency)?;
        let start_time = parse_assignments(&self.start_time)?;
        let voltage = parse_assignments(&self.voltage)?;
        state.update(|cmds| {
            for (byte, bit) in bits {
                cmds.command_bits.insert((byte, bit), true);
            }
            cmds.frequency.extend(frequency);
            cmds.start_time.extend(start_time);
            cmds.voltage.extend(voltage);
            cmds.isolation.extend(self.isolation.iter().map(|i| (*i, true)));
            cmds.start.extend(self.start.iter().map(|i| (*i, true)));
            cmds.chu.extend(self.chu.iter().map(|i| (*i, true)));
            cmds.redundant.extend(self.redundant.iter().map(|i| (*i, true)));
            if let Some(t) = self.battery_temp {
                cmds.battery_temperature = t;
            }
        });
        Ok(())
    }
}

fn parse_bit(s: &str) -> Result<(usize, u8)> {
    let (byte, bit) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("expected BYTE:BIT, got '{s}'"))?;
    let byte = byte
        .trim()
        .parse::<usize>()
        .with_context(|| format!("invalid byte in '{s}'"))?;
    let bit = bit
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|b| *b < 8)
        .ok_or_else(|| anyhow!("bit in '{s}' must be 0-7"))?;
    Ok((byte, bit))
}

fn parse_assignments(items: &[String]) -> Result<Vec<(usize, f64)>> {
    items
        .iter()
        .map(|s| {
            let (offset, value) = s
                .split_once('=')
                .ok_or_else(|| anyhow!("expected OFFSET=VALUE, got '{s}'"))?;
            let offset = offset
                .trim()
                .parse::<usize>()
                .with_context(|| format!("invalid offset in '{s}'"))?;
            let value = value
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid value in '{s}'"))?;
            Ok((offset, value))
        })
        .collect()
}

fn parse_hex(items: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for item in items {
        let t = item.trim();
        let t = t.strip_prefix("0x").unwrap_or(t);
        let digits: Vec<u8> = t.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        if digits.len() % 2 != 0 {
            return Err(anyhow!("odd hex length in '{item}'"));
        }
        for pair in digits.chunks(2) {
            let s = std::str::from_utf8(pair).map_err(|e| anyhow!("invalid hex: {e}"))?;
            let b = u8::from_str_radix(s, 16)
                .map_err(|e| anyhow!("invalid hex byte '{s}' in '{item}': {e}"))?;
            out.push(b);
        }
    }
    Ok(out)
}

fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(16).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        out.push_str(&format!("{:04X}  {}\n", row * 16, bytes.join(" ")));
    }
    out
}
