//! Binary entry point: parses configuration, wires up the network thread
//! and the mixer's frame loop, and waits for Ctrl+C to request shutdown.

use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::Parser;
use log::{error, info};
use parking_lot::Mutex;

use spatial_mixer::domain::{DomainClient, NullDomainClient, UdpDomainClient};
use spatial_mixer::net::MixerSocket;
use spatial_mixer::stats::MixerStats;
use spatial_mixer::{Mixer, MixerConfig};

fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config = MixerConfig::parse();
    let listen_addr = config.listen_addr();

    let socket = match MixerSocket::bind(listen_addr) {
        Ok(s) => s,
        Err(err) => {
            error!(target: "audio_mixer", "failed to bind {listen_addr}: {err}");
            return ExitCode::FAILURE;
        }
    };
    info!(target: "audio_mixer", "listening on {}", socket.local_addr());

    let domain_client: Box<dyn DomainClient> = match config.domain_server_address {
        Some(addr) => Box::new(UdpDomainClient::new(addr, config.listen_port)),
        None => Box::new(NullDomainClient),
    };

    let stats = std::sync::Arc::new(MixerStats::new());
    let mut mixer = match Mixer::new(config, socket, domain_client, stats) {
        Ok(m) => m,
        Err(err) => {
            error!(target: "audio_mixer", "failed to start mixer: {err}");
            return ExitCode::FAILURE;
        }
    };

    let stop = mixer.stop_handle();
    install_ctrlc_handler(move || {
        stop.store(false, Ordering::SeqCst);
    });

    mixer.run();
    info!(target: "audio_mixer", "shutdown complete");
    ExitCode::SUCCESS
}

/// Platform-specific Ctrl+C hook: `SetConsoleCtrlHandler` on Windows,
/// `SIGINT` on everything else.
fn install_ctrlc_handler<F: Fn() + Send + 'static>(handler: F) {
    #[cfg(windows)]
    {
        static HANDLER: Mutex<Option<Box<dyn Fn() + Send>>> = Mutex::new(None);

        unsafe extern "system" fn ctrl_handler(_: u32) -> windows_sys::Win32::Foundation::BOOL {
            if let Some(ref f) = *HANDLER.lock() {
                f();
            }
            1
        }

        *HANDLER.lock() = Some(Box::new(handler));
        unsafe {
            windows_sys::Win32::System::Console::SetConsoleCtrlHandler(Some(ctrl_handler), 1);
        }
    }

    #[cfg(unix)]
    {
        static HANDLER: Mutex<Option<Box<dyn Fn() + Send>>> = Mutex::new(None);

        extern "C" fn signal_handler(_: i32) {
            if let Some(ref f) = *HANDLER.lock() {
                f();
            }
        }

        *HANDLER.lock() = Some(Box::new(handler));
        unsafe {
            libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
        }
    }
}
