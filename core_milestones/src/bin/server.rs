use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{info, warn};

use core_milestones::{
    announce_status, build_headless_app, persist_on_shutdown, reload, run_sample,
    start_directive_server, HostDirective, HostLink, MilestoneConfigHandle, MilestoneState,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (host, directives) = HostLink::channel();
    let mut app = build_headless_app(host);

    let config = app.world.resource::<MilestoneConfigHandle>().get();

    let directive_server = start_directive_server(config.directive_bind);
    spawn_directive_pump(directives, directive_server);

    let (command_tx, command_rx) = unbounded::<Command>();
    spawn_command_listener(config.command_bind, command_tx.clone());
    spawn_announce_timer(
        Duration::from_secs(config.announce_period_secs.max(1)),
        command_tx,
    );

    info!(
        target: "peakwatch::server",
        command_bind = %config.command_bind,
        directive_bind = %config.directive_bind,
        thresholds = config.thresholds.len(),
        "Peakwatch milestone server ready"
    );

    while let Ok(command) = command_rx.recv() {
        match command {
            Command::Sample(online) => {
                run_sample(&mut app, online);
                info!(
                    target: "peakwatch::server",
                    online,
                    "sample.applied"
                );
            }
            Command::Announce => {
                announce_status(&mut app.world);
            }
            Command::Reload => {
                reload(&mut app.world);
            }
            Command::Status => {
                let state = app.world.resource::<MilestoneState>();
                info!(
                    target: "peakwatch::server",
                    record = state.record_online,
                    triggered = ?state.triggered,
                    "status.reported"
                );
            }
            Command::Shutdown => {
                persist_on_shutdown(&app.world);
                info!(target: "peakwatch::server", "shutdown.requested");
                break;
            }
        }
    }
}

#[derive(Debug)]
enum Command {
    Sample(u32),
    Announce,
    Reload,
    Status,
    Shutdown,
}

/// Forwards host directives to connected game-side clients and mirrors each
/// one into the log so a run without clients is still observable.
fn spawn_directive_pump(
    directives: Receiver<HostDirective>,
    server: Option<core_milestones::DirectiveServer>,
) {
    thread::spawn(move || {
        for directive in directives.iter() {
            match &directive {
                HostDirective::Execute(action) => info!(
                    target: "peakwatch::server",
                    action = %action,
                    "directive.execute"
                ),
                HostDirective::Broadcast(message) => info!(
                    target: "peakwatch::server",
                    message = %message,
                    "directive.broadcast"
                ),
            }
            if let Some(server) = server.as_ref() {
                server.forward(&directive);
            }
        }
    });
}

fn spawn_command_listener(bind_addr: std::net::SocketAddr, sender: Sender<Command>) {
    let listener = TcpListener::bind(bind_addr).expect("command listener bind failed");
    listener
        .set_nonblocking(true)
        .expect("set_nonblocking failed");

    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("Command client connected: {}", addr);
                let sender = sender.clone();
                thread::spawn(move || handle_client(stream, sender));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                warn!("Error accepting command client: {}", err);
                thread::sleep(Duration::from_millis(200));
            }
        }
    });
}

fn spawn_announce_timer(period: Duration, sender: Sender<Command>) {
    thread::spawn(move || {
        let ticker = crossbeam_channel::tick(period);
        for _ in ticker.iter() {
            if sender.send(Command::Announce).is_err() {
                break;
            }
        }
    });
}

fn handle_client(stream: std::net::TcpStream, sender: Sender<Command>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_command(trimmed) {
                    Some(command) => {
                        if sender.send(command).is_err() {
                            break;
                        }
                    }
                    None => warn!("Invalid command: {}", trimmed),
                }
            }
            Err(err) => {
                warn!("Command read error: {}", err);
                break;
            }
        }
    }
}

fn parse_command(input: &str) -> Option<Command> {
    let mut parts = input.split_whitespace();
    match parts.next()? {
        "sample" => {
            let online: u32 = parts.next()?.parse().ok()?;
            Some(Command::Sample(online))
        }
        "announce" => Some(Command::Announce),
        "reload" => Some(Command::Reload),
        "status" => Some(Command::Status),
        "shutdown" => Some(Command::Shutdown),
        _ => None,
    }
}
