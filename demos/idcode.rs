use jtag_swd_bitbang::cable::am335x;
use jtag_swd_bitbang::config::Config;
use jtag_swd_bitbang::delay::BusyWait;
use jtag_swd_bitbang::driver::WireProtocol;
use jtag_swd_bitbang::jtag::{JtagCommand, Scan};
use jtag_swd_bitbang::statemachine::{Register, TapState};
use jtag_swd_bitbang::swd::{Port, Request, SpecialSequence};
use jtag_swd_bitbang::transport::{open_uio, DebugTransport, GpioTransport, PruTransport};
use tracing_subscriber::EnvFilter;

/// Usage: idcode <config.toml> [jtag|swd|pru] [khz]
fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "adapter.toml".into());
    let mode = args.next().unwrap_or_else(|| "swd".into());
    let khz: u32 = args.next().map_or(1000, |s| s.parse().expect("speed in kHz"));

    let config = Config::load(&path).expect("config");

    let mut transport: Box<dyn DebugTransport> = match mode.as_str() {
        "pru" => Box::new(PruTransport::new(config, BusyWait, open_uio)),
        _ => Box::new(GpioTransport::new(config, BusyWait, |cfg: &Config| {
            am335x::open(cfg.peripheral_base, cfg.pads)
        })),
    };

    let protocol = if mode == "jtag" { WireProtocol::Jtag } else { WireProtocol::Swd };
    transport.select(protocol).expect("protocol");
    let speed = transport.khz_to_speed(khz).expect("speed");
    transport.set_speed(speed).expect("speed");
    transport.init().expect("init");
    println!("{}: {} kHz", transport.name(), transport.speed_to_khz(speed).expect("speed"));

    match protocol {
        WireProtocol::Jtag => {
            let mut cmds = [
                JtagCommand::TmsSequence { bits: vec![true; 5] },
                JtagCommand::Scan(Scan::read(Register::Data, 32, TapState::Idle)),
            ];
            transport.execute_queue(&mut cmds).expect("scan");
            if let JtagCommand::Scan(scan) = &cmds[1] {
                println!("IDCODE {:08x}", scan.tdo_u64());
            }
        }
        WireProtocol::Swd => {
            let swd = transport.swd().expect("swd");
            swd.switch_seq(SpecialSequence::LineReset).expect("line reset");
            swd.switch_seq(SpecialSequence::JtagToSwd).expect("switch");
            swd.switch_seq(SpecialSequence::LineReset).expect("line reset");
            let dpidr = swd.read_reg(Request::read(Port::Debug, 0), 0);
            match swd.run() {
                Ok(()) => println!("DPIDR {:08x}", dpidr.unwrap_or_default()),
                Err(e) => println!("DPIDR read failed: {}", e),
            }
        }
    }

    transport.quit().expect("quit");
}
