use std::process::ExitCode;

use qjazz_worker::config::{self, QgisConfig};
use qjazz_worker::connection::StdioConnection;
use qjazz_worker::engine::{self, DummyEngine};
use qjazz_worker::rendezvous::RendezVous;
use qjazz_worker::runtime::Runtime;
use qjazz_worker::{signals, Error};

fn main() -> ExitCode {
    config::init_logging();

    // The supervisor passes the instance name as last argument
    let name = std::env::args().skip(1).last().unwrap_or_default();

    match run(&name) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::ConnectionClosed) => {
            // The supervisor went away: this is fatal
            log::error!("Connection closed by supervisor");
            ExitCode::FAILURE
        }
        Err(err) => {
            log::error!("Worker failed: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(name: &str) -> qjazz_worker::Result<()> {
    let conf = QgisConfig::from_env()?;

    // Take over stdio before anything may print to stdout
    let mut conn = StdioConnection::take_stdio()?;

    signals::install()?;
    engine::setup_environment(&conf.projects);

    let mut rendez_vous = RendezVous::from_env()?;

    let mut runtime = Runtime::new(DummyEngine::new(), conf, name)?;
    runtime.load_default_project();

    log::info!("Worker '{}' ready", name);
    runtime.run(&mut conn, &mut rendez_vous)
}
