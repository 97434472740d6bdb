use clap::Parser;
use log::info;

use keysigner::{
    cli::{fault_json, Options},
    commons::crypto,
    constants::{KEYSIGNER_APP, KEYSIGNER_VERSION},
    daemon::{config::Config, signer::Signer},
};

fn main() {
    let options = Options::parse();

    crypto::init();

    let config = match Config::create(&options.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            ::std::process::exit(1);
        }
    };

    if let Err(e) = config.init_logging() {
        eprintln!("{}", e);
        ::std::process::exit(1);
    }

    info!(
        "{} v{} uses configuration file: {}",
        KEYSIGNER_APP, KEYSIGNER_VERSION, options.config
    );

    let result = Signer::build(&config).and_then(|signer| options.command.run(&signer));

    match result {
        Ok(report) => match report.to_json() {
            Ok(Some(json)) => println!("{}", json),
            Ok(None) => {}
            Err(e) => {
                eprintln!("Could not render report: {}", e);
                ::std::process::exit(1);
            }
        },
        Err(e) => {
            println!("{}", fault_json(&e.to_fault()));
            ::std::process::exit(1);
        }
    }
}
