use clap::{App, Arg};
use log::info;
use std::thread;
use std::time::Duration;

use ledger::config::NodeConfig;
use ledger::p2p::node::Node;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = App::new("ledger_rs")
        .about("Peer-to-peer replicated ledger node")
        .arg(
            Arg::with_name("host")
                .long("host")
                .takes_value(true)
                .default_value("127.0.0.1")
                .help("Host address of this node (use 0.0.0.0 to listen on all interfaces)"),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .takes_value(true)
                .default_value("5000")
                .help("Port to listen on"),
        )
        .arg(
            Arg::with_name("peers")
                .long("peers")
                .takes_value(true)
                .default_value("")
                .help("Comma-separated list of peer addresses in host:port format"),
        )
        .get_matches();

    let host = matches.value_of("host").expect("host has a default");
    let port = matches
        .value_of("port")
        .expect("port has a default")
        .parse::<u16>()
        .unwrap_or_else(|e| {
            eprintln!("Invalid port: {}", e);
            std::process::exit(1);
        });
    let peers = matches.value_of("peers").expect("peers has a default");

    let node = Node::new(NodeConfig::new(host, port, peers));

    match node.run() {
        Ok(address) => info!("Node {} up and serving on {}", node.node_address(), address),
        Err(e) => {
            eprintln!("Failed to start node: {}", e);
            std::process::exit(1);
        }
    }

    // the listener and schedulers carry the process from here
    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}
