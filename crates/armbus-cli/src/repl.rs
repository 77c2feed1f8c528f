//! REPL – interactive shell over the hardware interface.
//!
//! Supported slash-commands:
//!   /status                      – connection, calibration and motor errors
//!   /position                    – current joint positions
//!   /move j1 j2 j3 j4 j5 j6      – command a joint position (radians)
//!   /learn on|off                – toggle learning mode (torque off)
//!   /calibrate                   – request a new motor calibration
//!   /allow auto|manual           – start the pending calibration
//!   /gripper open|close <id>     – drive a gripper tool
//!   /pump pull|push <id>         – drive a vacuum pump tool
//!   /leds a b c d                – set the four status LEDs
//!   /unplug|/plug stepper|servo  – simulate a bus cable fault
//!   /temp                        – controller CPU temperature
//!   /quit | /exit                – stop supervision and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use armbus_kernel::VersionCheck;
use armbus_types::{BusKind, CalibrationMode, GripperCommand, JOINT_COUNT, PositionVector, ToolStatus};

use crate::session::Session;

// Tool register values used by the shell.
const GRIPPER_OPEN_POSITION: u16 = 640;
const GRIPPER_CLOSE_POSITION: u16 = 400;
const GRIPPER_SPEED: u16 = 300;
const GRIPPER_HOLD_TORQUE: u16 = 128;
const GRIPPER_MAX_TORQUE: u16 = 1023;
const PUMP_PULL_POSITION: u16 = 200;
const PUMP_PUSH_POSITION: u16 = 500;
const PUMP_HOLD_TORQUE: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAction {
    Open,
    Close,
    Pull,
    Push,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    Position,
    Move(PositionVector),
    Learn(bool),
    Calibrate,
    Allow(CalibrationMode),
    Tool { action: ToolAction, id: u8 },
    Leds(Vec<i32>),
    Plug { bus: BusKind, plugged: bool },
    Temperature,
    Quit,
}

/// Parse one input line.
///
/// # Errors
///
/// Returns a user-facing message for unknown commands and malformed
/// arguments.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    match head {
        "/help" => Ok(Command::Help),
        "/status" => Ok(Command::Status),
        "/position" => Ok(Command::Position),
        "/calibrate" => Ok(Command::Calibrate),
        "/temp" => Ok(Command::Temperature),
        "/quit" | "/exit" => Ok(Command::Quit),
        "/move" => parse_move(&args),
        "/learn" => match args.as_slice() {
            ["on"] => Ok(Command::Learn(true)),
            ["off"] => Ok(Command::Learn(false)),
            _ => Err("usage: /learn on|off".to_string()),
        },
        "/allow" => match args.as_slice() {
            [mode] => mode
                .parse::<CalibrationMode>()
                .map(Command::Allow)
                .map_err(|_| "usage: /allow auto|manual".to_string()),
            _ => Err("usage: /allow auto|manual".to_string()),
        },
        "/gripper" => match args.as_slice() {
            ["open", id] => parse_tool(ToolAction::Open, id),
            ["close", id] => parse_tool(ToolAction::Close, id),
            _ => Err("usage: /gripper open|close <id>".to_string()),
        },
        "/pump" => match args.as_slice() {
            ["pull", id] => parse_tool(ToolAction::Pull, id),
            ["push", id] => parse_tool(ToolAction::Push, id),
            _ => Err("usage: /pump pull|push <id>".to_string()),
        },
        // The count is checked by the hardware layer.
        "/leds" => args
            .iter()
            .map(|v| v.parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
            .map(Command::Leds)
            .map_err(|_| "usage: /leds a b c d (integers)".to_string()),
        "/unplug" | "/plug" => {
            let bus = match args.as_slice() {
                ["stepper"] => BusKind::Stepper,
                ["servo"] => BusKind::Servo,
                _ => return Err(format!("usage: {head} stepper|servo")),
            };
            Ok(Command::Plug {
                bus,
                plugged: head == "/plug",
            })
        }
        other => Err(format!("Unknown command: '{other}'")),
    }
}

fn parse_move(args: &[&str]) -> Result<Command, String> {
    let usage = || format!("usage: /move followed by {JOINT_COUNT} joint positions");
    if args.len() != JOINT_COUNT {
        return Err(usage());
    }
    let mut cmd: PositionVector = [0.0; JOINT_COUNT];
    for (slot, raw) in cmd.iter_mut().zip(args) {
        *slot = raw.parse().map_err(|_| usage())?;
    }
    Ok(Command::Move(cmd))
}

fn parse_tool(action: ToolAction, id: &str) -> Result<Command, String> {
    id.parse::<u8>()
        .map(|id| Command::Tool { action, id })
        .map_err(|_| format!("invalid tool id '{id}'"))
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(session: &Session, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "armbus>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(cmd) => execute(session, cmd),
            Err(msg) => println!(
                "{} Type {} for available commands.",
                msg.red(),
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn execute(session: &Session, cmd: Command) {
    let hw = &session.hardware;
    match cmd {
        Command::Help => cmd_help(),
        Command::Status => cmd_status(session),
        Command::Position => print_position(&hw.position()),
        Command::Move(target) => {
            hw.send_position(&target);
            print_position(&hw.position());
        }
        Command::Learn(enable) => {
            hw.activate_learning_mode(enable);
            println!("  Learning mode {}", if enable { "on".yellow() } else { "off".green() });
        }
        Command::Calibrate => {
            hw.request_calibration();
            println!("  Calibration requested.");
        }
        Command::Allow(mode) => match hw.allow_calibration_start(mode) {
            Ok(msg) => println!("  {} {}", "✓".green().bold(), msg),
            Err(e) => println!("  {} [{}] {}", "✗".red().bold(), e.status_code(), e),
        },
        Command::Tool { action, id } => print_tool(cmd_tool(session, action, id)),
        Command::Leds(values) => match hw.set_leds(&values) {
            Ok(msg) => println!("  {} {}", "✓".green().bold(), msg),
            Err(e) => println!("  {} [{}] {}", "✗".red().bold(), e.status_code(), e),
        },
        Command::Plug { bus, plugged } => {
            if session.set_plugged(bus, plugged) {
                let what = if plugged { "plugged" } else { "unplugged" };
                println!("  {} bus {}.", bus, what.yellow());
            } else {
                println!("  {} bus is not simulated in this session.", bus);
            }
        }
        Command::Temperature => match session.cpu_temperature() {
            Some(degrees) => println!("  CPU temperature: {} °C", degrees.to_string().bold()),
            None => println!("  {}", "Diagnostics disabled.".dimmed()),
        },
        Command::Quit => {}
    }
}

fn cmd_help() {
    println!();
    println!("{}", "armbus Commands".bold().underline());
    println!("  {}                      – connection and calibration state", "/status".bold().cyan());
    println!("  {}                    – current joint positions", "/position".bold().cyan());
    println!("  {}      – command six joint positions", "/move j1 .. j6".bold().cyan());
    println!("  {}               – toggle learning mode", "/learn on|off".bold().cyan());
    println!("  {}                   – request a motor calibration", "/calibrate".bold().cyan());
    println!("  {}          – start the pending calibration", "/allow auto|manual".bold().cyan());
    println!("  {}    – drive a gripper", "/gripper open|close <id>".bold().cyan());
    println!("  {}        – drive a vacuum pump", "/pump pull|push <id>".bold().cyan());
    println!("  {}                – set the status LEDs", "/leds a b c d".bold().cyan());
    println!("  {} – simulate a cable fault", "/unplug|/plug stepper|servo".bold().cyan());
    println!("  {}                        – controller CPU temperature", "/temp".bold().cyan());
    println!("  {}                 – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(session: &Session) {
    let status = session.hardware.status();
    let flag = |ok: bool| if ok { "yes".green() } else { "no".red() };

    println!("{}", "Hardware Status".bold().underline());
    println!("  Connection ok      : {}", flag(status.connection_ok));
    println!("  Calibrated         : {}", flag(!status.calibration_needed));
    println!(
        "  Calibrating        : {}",
        status.calibration_in_progress || session.hardware.is_calibration_in_progress()
    );
    println!("  Limited mode       : {}", status.limited_mode);

    if let Some(arm) = &session.arm {
        let version = match arm.version_check() {
            None => "pending".dimmed(),
            Some(VersionCheck::Matched) => "matched".green(),
            Some(VersionCheck::Undetermined) => "undetermined".yellow(),
            Some(VersionCheck::Mismatch { configured, detected }) => {
                format!("MISMATCH (configured {configured}, detected v{detected})").red().bold()
            }
        };
        println!("  Hardware version   : {}", version);
    }

    if !status.error_message.is_empty() {
        println!("  {}", "Errors:".red());
        for line in status.error_message.lines() {
            println!("    • {}", line);
        }
    }
    for motor in &status.motors {
        println!(
            "  {:<10} {:<8} {:>3} °C  {:>5.2} V  err {}",
            motor.name, motor.motor_type, motor.temperature, motor.voltage, motor.hardware_error
        );
    }
}

fn cmd_tool(session: &Session, action: ToolAction, id: u8) -> ToolStatus {
    let hw = &session.hardware;
    match action {
        ToolAction::Open => hw.open_gripper(
            id,
            GripperCommand {
                position: GRIPPER_OPEN_POSITION,
                speed: GRIPPER_SPEED,
                hold_torque: GRIPPER_HOLD_TORQUE,
                max_torque: GRIPPER_MAX_TORQUE,
            },
        ),
        ToolAction::Close => hw.close_gripper(
            id,
            GripperCommand {
                position: GRIPPER_CLOSE_POSITION,
                speed: GRIPPER_SPEED,
                hold_torque: GRIPPER_HOLD_TORQUE,
                max_torque: GRIPPER_MAX_TORQUE,
            },
        ),
        ToolAction::Pull => hw.pull_air(id, PUMP_PULL_POSITION, PUMP_HOLD_TORQUE),
        ToolAction::Push => hw.push_air(id, PUMP_PUSH_POSITION),
    }
}

fn print_tool(status: ToolStatus) {
    println!("  Tool: {:?}", status);
}

fn print_position(position: &PositionVector) {
    let joints: Vec<String> = position.iter().map(|p| format!("{p:+.4}")).collect();
    println!("  [{}]", joints.join(", "));
}
