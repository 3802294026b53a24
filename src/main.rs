use std::process::ExitCode;

use webserv::config;
use webserv::server::Server;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let config_path = match args.next() {
        Some(path) => path,
        None => {
            eprintln!("usage: webserv <config-file>");
            return ExitCode::FAILURE;
        }
    };

    match run(&config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &str) -> webserv::error::Result<()> {
    let source = std::fs::read_to_string(config_path)?;
    let app_config = config::load(&source)?;
    config::display_config(&app_config);

    let mut server = Server::new(app_config)?;
    server.run()
}
