//! Vitrine CLI
//!
//! Operator command-line interface for the Vitrine kiosk daemon.
//!
//! Commands are sent to the daemon via IPC (named pipe); `stop` is the
//! sanctioned out-of-band exit for a controller that otherwise refuses to
//! die. `autostart` registers the daemon with the shell so the kiosk comes
//! up with the device.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::windows::named_pipe::ClientOptions;
use vitrine_ipc::{KioskCommand, KioskResponse, PIPE_NAME};

#[derive(Parser)]
#[command(name = "vitrine-cli")]
#[command(author, version, about = "Control the Vitrine kiosk display controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show controller status
    Status,
    /// Re-probe displays and re-apply the target geometry
    Reprobe,
    /// Force a geometry correction pass now
    Apply,
    /// Stop the daemon
    Stop,
    /// Manage autostart registration for the daemon
    Autostart {
        #[command(subcommand)]
        action: AutostartAction,
    },
}

#[derive(Subcommand)]
enum AutostartAction {
    /// Start the daemon at user logon
    Enable,
    /// Remove the autostart registration
    Disable,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => send_command(KioskCommand::Status).await,
        Commands::Reprobe => send_command(KioskCommand::Reprobe).await,
        Commands::Apply => send_command(KioskCommand::Apply).await,
        Commands::Stop => send_command(KioskCommand::Stop).await,
        Commands::Autostart { action } => autostart(action),
    }
}

/// Send one command line over the pipe and print the response line.
async fn send_command(cmd: KioskCommand) -> Result<()> {
    let pipe = ClientOptions::new()
        .open(PIPE_NAME)
        .context("Failed to connect - is the vitrine daemon running?")?;
    let (reader, mut writer) = tokio::io::split(pipe);

    let json = serde_json::to_string(&cmd)? + "\n";
    writer.write_all(json.as_bytes()).await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: KioskResponse =
        serde_json::from_str(line.trim()).context("Invalid response from daemon")?;
    print_response(&response);

    if matches!(response, KioskResponse::Error { .. }) {
        std::process::exit(1);
    }
    Ok(())
}

fn print_response(response: &KioskResponse) {
    match response {
        KioskResponse::Ok => println!("ok"),
        KioskResponse::Error { message } => eprintln!("error: {}", message),
        KioskResponse::Status {
            version,
            phase,
            target,
            fullscreen,
            scale_factor,
            corrections,
            suppressed_closes,
            content,
            uptime_seconds,
        } => {
            println!("vitrine {}", version);
            println!("  phase:             {}", phase);
            println!(
                "  target:            {}x{} at ({},{})",
                target.width, target.height, target.x, target.y
            );
            println!("  fullscreen:        {}", fullscreen);
            println!("  scale factor:      {}", scale_factor);
            println!("  corrections:       {}", corrections);
            println!("  suppressed closes: {}", suppressed_closes);
            println!("  content:           {}", content);
            println!("  uptime:            {}s", uptime_seconds);
        }
    }
}

/// Register or remove the daemon in the user's Run key.
fn autostart(action: AutostartAction) -> Result<()> {
    use winreg::enums::HKEY_CURRENT_USER;
    use winreg::RegKey;

    const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
    const VALUE_NAME: &str = "Vitrine";

    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let (key, _) = hkcu
        .create_subkey(RUN_KEY)
        .context("Failed to open the Run registry key")?;

    match action {
        AutostartAction::Enable => {
            // The daemon binary sits next to this CLI in an installed tree.
            let exe = std::env::current_exe().context("Failed to locate executable")?;
            let daemon = exe.with_file_name("vitrine.exe");
            key.set_value(VALUE_NAME, &daemon.to_string_lossy().to_string())
                .context("Failed to write the Run entry")?;
            println!("autostart enabled: {}", daemon.display());
        }
        AutostartAction::Disable => match key.delete_value(VALUE_NAME) {
            Ok(()) => println!("autostart disabled"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                println!("autostart was not enabled");
            }
            Err(e) => return Err(e).context("Failed to remove the Run entry"),
        },
    }
    Ok(())
}
