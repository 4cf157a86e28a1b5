// gsmlink test application -- CLI tool for exercising a cellular module
// (or the scripted mock) through the gsmlink engine.
//
// Usage:
//   gsmlink-test-app list
//   gsmlink-test-app --model SIM800 --port /dev/ttyUSB0 status
//   gsmlink-test-app --model UC15 --port /dev/ttyUSB2 --pin 1234 sms +447700900123 "hello"
//   gsmlink-test-app --model M35 --port /dev/ttyS1 ussd "*100#"
//   gsmlink-test-app --mock dial 5551234 --hold 10
//   gsmlink-test-app --mock -v --debug at --debug state monitor --duration 60

use std::io;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use gsmlink::transport::SerialTransport;
use gsmlink::vendor::models::{ModemModel, all_models, by_name};
use gsmlink::{Cause, DebugFlags, Event, SessionBuilder, SessionIo, SmsMode, Transport};
use gsmlink_test_harness::{MockTransport, ScriptedModem};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// gsmlink test application -- drives one modem span from the command line.
#[derive(Parser)]
#[command(name = "gsmlink-test-app", version, about)]
struct Cli {
    /// Module model (SIM900, SIM800, M35, UC15).
    #[arg(long, default_value = "SIM800")]
    model: String,

    /// Serial port path (e.g. /dev/ttyUSB0, COM3). Required unless --mock.
    #[arg(long)]
    port: Option<String>,

    /// Override the model's default baud rate.
    #[arg(long)]
    baud: Option<u32>,

    /// Talk to a scripted SIM800 instead of a real port.
    #[arg(long)]
    mock: bool,

    /// SIM PIN, entered when the SIM asks for it.
    #[arg(long)]
    pin: Option<String>,

    /// SIM slot on dual-SIM modules.
    #[arg(long, default_value_t = 0)]
    sim_slot: u8,

    /// Span number used in logs.
    #[arg(long, default_value_t = 1)]
    span: u32,

    /// Engine subsystems to log at debug level (repeatable).
    #[arg(long, value_enum)]
    debug: Vec<DebugSubsystem>,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long)]
    verbose: bool,

    /// Seconds to wait for the span to become ready.
    #[arg(long, default_value_t = 90)]
    ready_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum DebugSubsystem {
    Raw,
    At,
    State,
    Sched,
    Calls,
    All,
}

impl From<DebugSubsystem> for DebugFlags {
    fn from(sub: DebugSubsystem) -> Self {
        match sub {
            DebugSubsystem::Raw => DebugFlags::RAW,
            DebugSubsystem::At => DebugFlags::AT,
            DebugSubsystem::State => DebugFlags::STATE,
            DebugSubsystem::Sched => DebugFlags::SCHED,
            DebugSubsystem::Calls => DebugFlags::CALLS,
            DebugSubsystem::All => DebugFlags::ALL,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SmsFormat {
    Pdu,
    Text,
}

#[derive(Subcommand)]
enum Command {
    /// List supported module models.
    List,

    /// Bring the span up and print its status.
    Status,

    /// Send a text message.
    Sms {
        destination: String,
        text: String,
        /// Delivery id reported back with the outcome.
        #[arg(long, default_value_t = 1)]
        id: u64,
        /// Submission format.
        #[arg(long, value_enum, default_value = "pdu")]
        format: SmsFormat,
    },

    /// Send a pre-encoded SMS-SUBMIT PDU (hex, with SMSC prefix).
    Pdu {
        hex: String,
        #[arg(long, default_value_t = 1)]
        id: u64,
    },

    /// Send a USSD request and print the network's answer.
    Ussd { code: String },

    /// Place a call, hold it, then hang up.
    Dial {
        number: String,
        /// Seconds to keep the call up once answered.
        #[arg(long, default_value_t = 10)]
        hold: u64,
        /// DTMF digits to send once answered.
        #[arg(long)]
        dtmf: Option<String>,
    },

    /// Scan for networks (can take minutes).
    Operators,

    /// Run an administrative AT command (e.g. "AT+CBC").
    SafeAt { command: String },

    /// Reset the module and wait for it to come back.
    Reset,

    /// Print engine events as they happen.
    Monitor {
        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn lookup_model(name: &str) -> Result<ModemModel> {
    by_name(name).ok_or_else(|| {
        let names: Vec<_> = all_models().iter().map(|m| m.name).collect();
        anyhow!("unknown model '{}'. Supported: {}", name, names.join(", "))
    })
}

async fn open_transport(cli: &Cli, model: &ModemModel) -> Result<Box<dyn Transport>> {
    if cli.mock {
        if cli.port.is_some() {
            bail!("--port and --mock are mutually exclusive");
        }
        return Ok(Box::new(MockTransport::new(ScriptedModem::new())));
    }
    let port = cli
        .port
        .as_deref()
        .context("--port is required (or use --mock)")?;
    let baud = cli.baud.unwrap_or(model.default_baud_rate);
    let transport = SerialTransport::open(port, baud)
        .await
        .with_context(|| format!("opening {port}"))?;
    Ok(Box::new(transport))
}

async fn create_session(cli: &Cli, sms_format: SmsFormat) -> Result<SessionIo> {
    let model = lookup_model(&cli.model)?;
    tracing::info!(model = model.name, mock = cli.mock, "opening span");
    let transport = open_transport(cli, &model).await?;
    let debug = cli
        .debug
        .iter()
        .fold(DebugFlags::NONE, |acc, sub| acc | DebugFlags::from(*sub));
    let sms_mode = match sms_format {
        SmsFormat::Pdu => SmsMode::Pdu,
        SmsFormat::Text => SmsMode::Text,
    };

    let mut builder = SessionBuilder::new(model)
        .span_id(cli.span)
        .sim_slot(cli.sim_slot)
        .sms_mode(sms_mode)
        .debug(debug);
    if let Some(pin) = &cli.pin {
        builder = builder.pin(pin);
    }
    Ok(builder.spawn(transport)?)
}

/// Wait until `pred` matches an event, printing the ones passed over.
async fn wait_for(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    pred: impl Fn(&Event) -> bool,
) -> Result<Event> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if pred(&event) => return Ok(event),
            Ok(Ok(event)) => println!("[event] {event:?}"),
            Ok(Err(RecvError::Lagged(n))) => println!("[warning] missed {n} events"),
            Ok(Err(RecvError::Closed)) => bail!("session task ended"),
            Err(_) => bail!("timed out after {}s", timeout.as_secs()),
        }
    }
}

async fn wait_ready(
    io: &SessionIo,
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
) -> Result<()> {
    if io.status().await?.state.is_ready() {
        return Ok(());
    }
    println!("Waiting for the span to come up...");
    let event = wait_for(events, timeout, |e| {
        matches!(
            e,
            Event::Ready | Event::ConfigError { .. } | Event::PinRequired { .. }
        )
    })
    .await?;
    match event {
        Event::Ready => Ok(()),
        Event::PinRequired { puk: true } => bail!("SIM is PUK locked"),
        Event::PinRequired { puk: false } => bail!("SIM wants a PIN (use --pin)"),
        other => bail!("bring-up failed: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_list() -> Result<()> {
    let models = all_models();
    println!(
        "{:<8}  {:<12}  {:>8}  {:<8}  SMS chunk",
        "Model", "Manufacturer", "Baud", "Dual SIM"
    );
    println!(
        "{:<8}  {:<12}  {:>8}  {:<8}  ---------",
        "-----", "------------", "----", "--------"
    );
    for m in &models {
        println!(
            "{:<8}  {:<12}  {:>8}  {:<8}  {}",
            m.name,
            m.manufacturer,
            m.default_baud_rate,
            if m.dual_sim { "yes" } else { "no" },
            m.sms_chunk_size
        );
    }
    println!();
    println!("{} models total.", models.len());
    Ok(())
}

async fn cmd_status(io: &SessionIo) -> Result<()> {
    print!("{}", io.status().await?);
    Ok(())
}

async fn cmd_sms(
    events: &mut broadcast::Receiver<Event>,
    submit: impl std::future::Future<Output = gsmlink::Result<()>>,
    id: u64,
) -> Result<()> {
    submit.await?;
    let event = wait_for(events, Duration::from_secs(120), |e| {
        matches!(e, Event::SmsSendOk { id: i, .. } | Event::SmsSendFailed { id: i, .. } if *i == id)
    })
    .await?;
    match event {
        Event::SmsSendOk { reference, .. } => {
            println!("Message {id} accepted (reference {reference:?})");
            Ok(())
        }
        Event::SmsSendFailed { reason, .. } => bail!("message {id} failed: {reason}"),
        _ => unreachable!("filtered by wait_for"),
    }
}

async fn cmd_ussd(
    io: &SessionIo,
    events: &mut broadcast::Receiver<Event>,
    code: &str,
) -> Result<()> {
    io.send_ussd(code).await?;
    let event = wait_for(events, Duration::from_secs(60), |e| {
        matches!(e, Event::UssdReceived { .. } | Event::UssdSendFailed { .. })
    })
    .await?;
    match event {
        Event::UssdReceived { status, text, .. } => {
            println!("[{status}] {text}");
            Ok(())
        }
        Event::UssdSendFailed { reason } => bail!("USSD failed: {reason}"),
        _ => unreachable!("filtered by wait_for"),
    }
}

async fn cmd_dial(
    io: &SessionIo,
    events: &mut broadcast::Receiver<Event>,
    number: &str,
    hold: u64,
    dtmf: Option<&str>,
) -> Result<()> {
    let call = io.dial(number).await?;
    println!("Dialing {number} (call {call})...");
    let event = wait_for(events, Duration::from_secs(60), |e| match e {
        Event::Answer { call: c } | Event::Hangup { call: c, .. } => *c == call,
        _ => false,
    })
    .await?;
    if let Event::Hangup { cause, .. } = event {
        bail!("call ended before answer: {cause}");
    }
    println!("Answered; holding for {hold}s");

    for digit in dtmf.unwrap_or_default().chars() {
        io.send_dtmf(call, digit).await?;
    }

    let ended = wait_for(events, Duration::from_secs(hold), |e| {
        matches!(e, Event::Hangup { call: c, .. } if *c == call)
    })
    .await;
    if let Ok(Event::Hangup { cause, .. }) = ended {
        println!("Far end hung up: {cause}");
        return Ok(());
    }
    io.hangup(call, Cause::NORMAL_CLEARING).await?;
    wait_for(events, Duration::from_secs(10), |e| {
        matches!(e, Event::HangupAck { call: c } | Event::Hangup { call: c, .. } if *c == call)
    })
    .await?;
    println!("Call released.");
    Ok(())
}

async fn cmd_operators(io: &SessionIo, events: &mut broadcast::Receiver<Event>) -> Result<()> {
    io.query_operators().await?;
    println!("Scanning networks...");
    let event = wait_for(events, Duration::from_secs(180), |e| {
        matches!(e, Event::OperatorList { .. } | Event::OperatorListFailed { .. })
    })
    .await?;
    match event {
        Event::OperatorList { operators } => {
            for op in &operators {
                println!("{op:?}");
            }
            println!("{} networks found.", operators.len());
            Ok(())
        }
        Event::OperatorListFailed { reason } => bail!("scan failed: {reason}"),
        _ => unreachable!("filtered by wait_for"),
    }
}

async fn cmd_safe_at(
    io: &SessionIo,
    events: &mut broadcast::Receiver<Event>,
    command: &str,
) -> Result<()> {
    io.send_safe_at(command).await?;
    let event = wait_for(events, Duration::from_secs(30), |e| {
        matches!(e, Event::SafeAtResponse { .. })
    })
    .await?;
    if let Event::SafeAtResponse { lines, ok, .. } = event {
        for line in &lines {
            println!("{line}");
        }
        println!("{}", if ok { "OK" } else { "ERROR" });
    }
    Ok(())
}

async fn cmd_reset(
    io: &SessionIo,
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
) -> Result<()> {
    io.reset().await?;
    println!("Module reset; waiting for bring-up...");
    wait_for(events, timeout, |e| *e == Event::Ready).await?;
    cmd_status(io).await
}

async fn cmd_monitor(events: &mut broadcast::Receiver<Event>, duration_secs: u64) -> Result<()> {
    println!("Monitoring span events (Ctrl-C to stop)...");
    let timeout = if duration_secs > 0 {
        Duration::from_secs(duration_secs)
    } else {
        Duration::from_secs(365 * 24 * 3600)
    };
    match wait_for(events, timeout, |_| false).await {
        Err(e) if e.to_string().starts_with("timed out") => {
            println!("Monitor duration elapsed.");
            Ok(())
        }
        other => other.map(|_| ()),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if matches!(cli.command, Command::List) {
        return cmd_list();
    }

    let sms_format = match &cli.command {
        Command::Sms { format, .. } => *format,
        _ => SmsFormat::Pdu,
    };
    let io = create_session(&cli, sms_format).await?;
    let mut events = io.subscribe();
    let ready_timeout = Duration::from_secs(cli.ready_timeout);

    if !matches!(cli.command, Command::Monitor { .. }) {
        wait_ready(&io, &mut events, ready_timeout).await?;
    }

    let result = match &cli.command {
        Command::List => unreachable!("handled above"),
        Command::Status => cmd_status(&io).await,
        Command::Sms {
            destination,
            text,
            id,
            ..
        } => cmd_sms(&mut events, io.send_text(destination, text, *id), *id).await,
        Command::Pdu { hex, id } => cmd_sms(&mut events, io.send_pdu(hex, *id), *id).await,
        Command::Ussd { code } => cmd_ussd(&io, &mut events, code).await,
        Command::Dial { number, hold, dtmf } => {
            cmd_dial(&io, &mut events, number, *hold, dtmf.as_deref()).await
        }
        Command::Operators => cmd_operators(&io, &mut events).await,
        Command::SafeAt { command } => cmd_safe_at(&io, &mut events, command).await,
        Command::Reset => cmd_reset(&io, &mut events, ready_timeout).await,
        Command::Monitor { duration } => cmd_monitor(&mut events, *duration).await,
    };

    if let Ok(mut transport) = io.shutdown().await {
        transport.close().await.ok();
    }
    result
}
