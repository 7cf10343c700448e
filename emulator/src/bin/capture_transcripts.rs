use std::io;

#[allow(dead_code)]
#[path = "../plant.rs"]
mod plant;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, SessionConfig};

fn main() -> io::Result<()> {
    record("charge-cycle", Some(2), record_charge_cycle)?;
    record("invalid-battery", Some(2), record_invalid_battery)?;
    record("makita", Some(0), record_makita)?;
    record("power-supply", None, record_power_supply)?;
    Ok(())
}

fn record(
    scenario: &str,
    profile: Option<u8>,
    script: fn(&mut Session) -> io::Result<()>,
) -> io::Result<()> {
    let config = SessionConfig {
        scenario: scenario.to_string(),
        profile,
    };
    let mut session = Session::new(&config)?;
    script(&mut session)
}

fn run(session: &mut Session, lines: &[&str]) -> io::Result<()> {
    for line in lines {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}

fn record_charge_cycle(session: &mut Session) -> io::Result<()> {
    run(
        session,
        &[
            "profile show",
            "wait 1s",
            "battery insert 3600",
            "wait 2s",
            "status",
            "wait 30m",
            "status",
            "wait 2h",
            "status",
            "battery remove",
            "wait 2s",
            "events",
        ],
    )
}

fn record_invalid_battery(session: &mut Session) -> io::Result<()> {
    run(
        session,
        &[
            "battery insert 5000",
            "wait 2s",
            "status",
            "battery remove",
            "wait 3s",
            "status",
            "events",
        ],
    )
}

fn record_makita(session: &mut Session) -> io::Result<()> {
    run(
        session,
        &[
            "battery insert 18000",
            "wait 2s",
            "battery fault",
            "wait 1s",
            "status",
            "battery fault",
            "ack",
            "wait 2s",
            "status",
            "events",
        ],
    )
}

fn record_power_supply(session: &mut Session) -> io::Result<()> {
    run(
        session,
        &[
            "help",
            "supply enter preset=3",
            "supply on",
            "wait 1s",
            "status",
            "mode ccc",
            "supply off",
            "supply exit",
            "profile list",
            "events",
        ],
    )
}
